//! linkflash CLI - Command-line tool for updating gateway firmware.
//!
//! ## Features
//!
//! - Flash a raw firmware binary over a UART or USB packet link
//! - Echo-probe device discovery
//! - Serial port listing (human-readable or JSON)
//! - Config files and environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use linkflash::LinkKind;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars should be drawn (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Cancelled by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// linkflash - Flash firmware onto a gateway device over a serial link.
///
/// Environment variables:
///   LINKFLASH_PORT              - Serial port (skips auto-discovery)
///   LINKFLASH_BAUD              - Baud rate (default: 115200)
///   LINKFLASH_LINK              - Link type: uart or usb (default: usb)
///   LINKFLASH_NON_INTERACTIVE   - Never probe ports; require a port
#[derive(Parser)]
#[command(name = "linkflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Firmware binary to flash.
    #[arg(value_name = "FIRMWARE")]
    firmware: Option<PathBuf>,

    /// Serial port to use (auto-discovered if not specified).
    #[arg(short, long, global = true, env = "LINKFLASH_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "LINKFLASH_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Link type.
    #[arg(short, long, global = true, env = "LINKFLASH_LINK", value_name = "uart|usb")]
    pub(crate) link: Option<LinkKind>,

    /// Image bytes per block.
    #[arg(long, global = true, value_name = "BYTES")]
    pub(crate) block_size: Option<usize>,

    /// Transmissions allowed per failed block (0 = unlimited).
    #[arg(long, global = true, value_name = "N")]
    pub(crate) max_retries: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (require a port instead of probing for one).
    #[arg(long, global = true, env = "LINKFLASH_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports in probe order.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Check that a device answers the echo probe.
    Ping,
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = Config::load();
    if let Some(ref path) = cli.config_path {
        config.merge(Config::load_from_path(path));
    }
    let settings = commands::Settings::resolve(cli, &config)?;

    match &cli.command {
        Some(Commands::ListPorts { json }) => commands::ports::cmd_list_ports(*json),
        Some(Commands::Ping) => commands::ports::cmd_ping(cli, &settings),
        None => {
            let Some(ref firmware) = cli.firmware else {
                return Err(CliError::Usage(
                    "no firmware file given (usage: linkflash [OPTIONS] <FIRMWARE>)".into(),
                )
                .into());
            };
            commands::flash::cmd_flash(cli, &settings, firmware)
        },
    }
}

/// Exit code for a failed run.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    if matches!(
        err.downcast_ref::<linkflash::Error>(),
        Some(linkflash::Error::Interrupted)
    ) || was_interrupted()
    {
        return 130;
    }
    1
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&cli);
    debug!(
        "linkflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Failed to install Ctrl-C handler: {e}");
    }
    linkflash::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flash_invocation() {
        let cli = Cli::try_parse_from([
            "linkflash",
            "--port",
            "/dev/ttyACM0",
            "--link",
            "uart",
            "--block-size",
            "64",
            "fw.bin",
        ])
        .unwrap();
        assert_eq!(cli.firmware, Some(PathBuf::from("fw.bin")));
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.link, Some(LinkKind::Uart));
        assert_eq!(cli.block_size, Some(64));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_subcommand() {
        let cli = Cli::try_parse_from(["linkflash", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::ListPorts { json: true })));
        assert!(cli.firmware.is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_link() {
        assert!(Cli::try_parse_from(["linkflash", "--link", "spi", "fw.bin"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(exit_code(&linkflash::Error::Interrupted.into()), 130);
        assert_eq!(exit_code(&linkflash::Error::DeviceNotFound.into()), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }
}
