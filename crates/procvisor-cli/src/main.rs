//! # procvisor
//!
//! Virtualizes `/proc` and `/sys` for system containers through a FUSE
//! mount. The same binary runs as the short-lived namespace helper when
//! invoked with the hidden `nsenter` subcommand.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;

use clap::Parser;

use crate::commands::{Cli, LogFormat};

fn init_tracing(format: LogFormat) {
    // Helper stdout carries the response, so logs always go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    commands::execute(cli)
}
