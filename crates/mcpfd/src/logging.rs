use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Targets that follow `--log-level` directly.
const PIPELINE_TARGETS: [&str; 3] = ["mcpfd", "mcpfd_tx", "mcpfd_frame"];

/// The bus logs every simulated transfer; it stays at info below trace.
const BUS_TARGET: &str = "mcpfd_bus";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Per-crate filter for this level. Crates outside the workspace never
    /// log below warn.
    pub fn targets(self) -> Targets {
        let level = self.as_filter();
        let bus = if self == LogLevel::Trace {
            LevelFilter::TRACE
        } else {
            level.min(LevelFilter::INFO)
        };

        PIPELINE_TARGETS
            .iter()
            .fold(Targets::new(), |targets, target| targets.with_target(*target, level))
            .with_target(BUS_TARGET, bus)
            .with_default(level.min(LevelFilter::WARN))
    }
}

/// Route pipeline logs to stderr so stdout stays machine-readable.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let layer = fmt::layer().with_writer(std::io::stderr).with_ansi(false);
    let registry = tracing_subscriber::registry().with(level.targets());

    let _ = match format {
        LogFormat::Text => registry.with(layer).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };
}
