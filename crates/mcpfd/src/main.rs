mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "mcpfd", version, about = "MCP25xxFD transmit pipeline CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", env = "MCPFD_LOG_LEVEL", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simulate_subcommand() {
        let cli = Cli::try_parse_from([
            "mcpfd",
            "simulate",
            "--frames",
            "32",
            "--slots",
            "8",
            "--fd",
            "--abort-every",
            "5",
        ])
        .expect("simulate args should parse");

        match cli.command {
            Command::Simulate(args) => {
                assert_eq!(args.frames, 32);
                assert_eq!(args.config.slots, Some(8));
                assert!(args.fd);
                assert_eq!(args.abort_every, 5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_format_follows_subcommand() {
        let cli = Cli::try_parse_from(["mcpfd", "layout", "--format", "json"])
            .expect("layout args should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert!(matches!(cli.command, Command::Layout(_)));
    }

    #[test]
    fn rejects_non_numeric_slot_count() {
        let err = Cli::try_parse_from(["mcpfd", "layout", "--slots", "many"])
            .expect_err("non-numeric slots should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
