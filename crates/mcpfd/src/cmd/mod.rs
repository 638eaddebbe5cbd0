use std::path::PathBuf;

use clap::{Args, Subcommand};
use mcpfd_tx::TxConfig;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID};
use crate::output::OutputFormat;

pub mod layout;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the slot registry for a configuration.
    Layout(LayoutArgs),
    /// Push frames through a pipeline attached to the simulated controller.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Layout(args) => layout::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Pipeline configuration: a JSON file, then individual overrides.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// JSON file holding a pipeline configuration.
    #[arg(long, value_name = "FILE", env = "MCPFD_CONFIG")]
    pub config: Option<PathBuf>,
    /// Number of transmit slots.
    #[arg(long)]
    pub slots: Option<usize>,
    /// Hardware FIFO backing slot 0.
    #[arg(long)]
    pub first_fifo: Option<u8>,
    /// Payload capacity of each slot.
    #[arg(long)]
    pub payload_size: Option<usize>,
    /// Length of the transmit-event ring (defaults to the slot count).
    #[arg(long)]
    pub tef_count: Option<usize>,
    /// Event records without timestamps.
    #[arg(long)]
    pub no_timestamp: bool,
}

impl ConfigArgs {
    pub fn load(&self) -> CliResult<TxConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|err| io_error(&format!("read {}", path.display()), err))?;
                serde_json::from_str(&text).map_err(|err| {
                    CliError::new(DATA_INVALID, format!("parse {}: {err}", path.display()))
                })?
            }
            None => TxConfig::default(),
        };

        if let Some(slots) = self.slots {
            config.slot_count = slots;
            if self.tef_count.is_none() {
                config.tef_count = config.tef_count.max(slots);
            }
        }
        if let Some(first_fifo) = self.first_fifo {
            config.first_fifo = first_fifo;
        }
        if let Some(payload_size) = self.payload_size {
            config.payload_size = payload_size;
        }
        if let Some(tef_count) = self.tef_count {
            config.tef_count = tef_count;
        }
        if self.no_timestamp {
            config.tef_timestamp = false;
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct LayoutArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Number of frames to transmit.
    #[arg(long, default_value_t = 16)]
    pub frames: usize,
    /// Payload length of every frame.
    #[arg(long, default_value_t = 8)]
    pub payload_len: usize,
    /// Send CAN-FD frames with bit-rate switching.
    #[arg(long)]
    pub fd: bool,
    /// Use 29-bit identifiers.
    #[arg(long)]
    pub extended_id: bool,
    /// Abort every k-th transmission on the controller (0 = never).
    #[arg(long, default_value_t = 0)]
    pub abort_every: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
