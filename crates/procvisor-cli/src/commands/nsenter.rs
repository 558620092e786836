//! `procvisor nsenter`: helper mode.
//!
//! Started by the supervisor for each namespaced request: reads one request
//! from stdin, joins the target's namespaces, and writes one response to
//! stdout. Never invoked by hand.

use clap::Args;
use procvisor_common::types::NamespaceSet;
use procvisor_ipc::helper::{self, HelperContext};

/// Arguments for the `nsenter` command.
#[derive(Args, Debug)]
pub struct NsenterArgs {
    /// Process whose namespaces to join.
    #[arg(long)]
    pub pid: u32,

    /// Comma-separated namespaces to join, e.g. `net,ipc`.
    #[arg(long, default_value = "")]
    pub namespaces: NamespaceSet,
}

/// Executes the `nsenter` command.
///
/// # Errors
///
/// Returns an error, and the process exits non-zero, if the request cannot
/// be read or the namespaces cannot be joined.
pub fn execute(args: &NsenterArgs) -> anyhow::Result<()> {
    let ctx = HelperContext::new(args.pid, args.namespaces.clone());
    tracing::debug!(pid = args.pid, namespaces = %args.namespaces, "helper started");
    helper::run(&ctx, std::io::stdin().lock(), std::io::stdout().lock())
        .map_err(|e| anyhow::anyhow!("nsenter into pid {} failed: {e}", args.pid))
}
