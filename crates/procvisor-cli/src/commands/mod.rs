//! CLI command definitions and dispatch.

pub mod mount;
pub mod nsenter;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// procvisor: per-container views of /proc and /sys.
#[derive(Parser, Debug)]
#[command(name = "procvisor", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file; flags override its values.
    #[arg(long, global = true, env = "PROCVISOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log line encoding.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount the virtualized tree and serve it until interrupted.
    Mount(mount::MountArgs),
    /// Serve one request inside a process's namespaces (internal).
    #[command(hide = true)]
    Nsenter(nsenter::NsenterArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Mount(args) => mount::execute(cli.config.as_deref(), args),
        Command::Nsenter(args) => nsenter::execute(&args),
    }
}
