//! `procvisor mount`: serve the virtualized tree until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;

use anyhow::Context;
use clap::Args;
use procvisor_common::config::ProcvisorConfig;
use procvisor_common::constants::NSENTER_SUBCOMMAND;
use procvisor_core::namespace::pid::ProcPidNsResolver;
use procvisor_core::sysio::FileIo;
use procvisor_fs::adapter::FsService;
use procvisor_handler::context::HandlerContext;
use procvisor_handler::registry::HandlerService;
use procvisor_ipc::service::{HelperCommand, HelperNsenterService};
use procvisor_state::store::ContainerStateService;

/// Arguments for the `mount` command.
#[derive(Args, Debug)]
pub struct MountArgs {
    /// Directory to mount on.
    pub mountpoint: PathBuf,

    /// Host directory to mirror.
    #[arg(long)]
    pub host_root: Option<PathBuf>,

    /// Bound on one helper round trip, in milliseconds.
    #[arg(long)]
    pub nsenter_timeout_ms: Option<u64>,

    /// Helper executable, started with the `nsenter` subcommand.
    #[arg(long)]
    pub helper_exe: Option<PathBuf>,

    /// Filesystem name shown in the mount table.
    #[arg(long)]
    pub fs_name: Option<String>,

    /// Let other users access the mount.
    #[arg(long)]
    pub allow_other: bool,

    /// Register unknown pid namespaces on first access.
    #[arg(long)]
    pub auto_register: bool,
}

impl MountArgs {
    fn apply(&self, config: &mut ProcvisorConfig) {
        if let Some(root) = &self.host_root {
            config.host_root.clone_from(root);
        }
        if let Some(ms) = self.nsenter_timeout_ms {
            config.nsenter.timeout_ms = ms;
        }
        if let Some(exe) = &self.helper_exe {
            config.nsenter.helper_exe = Some(exe.clone());
        }
        if let Some(name) = &self.fs_name {
            config.mount.fs_name.clone_from(name);
        }
        config.mount.allow_other |= self.allow_other;
        config.auto_register |= self.auto_register;
    }
}

/// Loads the configuration file, if any, and applies flag overrides.
fn resolve_config(path: Option<&Path>, args: &MountArgs) -> anyhow::Result<ProcvisorConfig> {
    let mut config = match path {
        Some(path) => ProcvisorConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProcvisorConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn helper_command(config: &ProcvisorConfig) -> anyhow::Result<HelperCommand> {
    match &config.nsenter.helper_exe {
        Some(exe) => Ok(HelperCommand::new(exe).args([NSENTER_SUBCOMMAND])),
        None => Ok(HelperCommand::current_exe()?),
    }
}

fn build_service(config: &ProcvisorConfig) -> anyhow::Result<Arc<FsService>> {
    let proc_root = config.host_root.join("proc");
    let state = Arc::new(ContainerStateService::new(Arc::new(ProcPidNsResolver::new(
        &proc_root,
    ))));
    let nsenter = HelperNsenterService::new(helper_command(config)?, config.nsenter.timeout())?;

    let ctx = Arc::new(HandlerContext {
        state,
        nsenter: Arc::new(nsenter),
        io: Arc::new(FileIo::new(&config.host_root)),
        proc_root,
        auto_register: config.auto_register,
    });
    let handlers = HandlerService::with_defaults(ctx)?;
    tracing::debug!(handlers = handlers.len(), "handler table built");
    Ok(Arc::new(FsService::new(Arc::new(handlers))))
}

/// Executes the `mount` command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the mount fails.
pub fn execute(config_path: Option<&Path>, args: MountArgs) -> anyhow::Result<()> {
    let config = resolve_config(config_path, &args)?;
    let service = build_service(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("procvisor-fuse")
        .enable_all()
        .build()
        .context("failed to start request runtime")?;

    let session = procvisor_fs::fuse::mount(
        service,
        runtime.handle().clone(),
        &args.mountpoint,
        &config.mount,
    )?;
    tracing::info!(
        mountpoint = %args.mountpoint.display(),
        host_root = %config.host_root.display(),
        auto_register = config.auto_register,
        "procvisor running"
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("failed to set signal handler")?;
    let _ = rx.recv();

    tracing::info!(mountpoint = %args.mountpoint.display(), "unmounting");
    drop(session);
    runtime.shutdown_background();
    Ok(())
}
