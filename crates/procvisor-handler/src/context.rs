//! Collaborators shared by every handler.

use std::path::PathBuf;
use std::sync::Arc;

use procvisor_common::error::{ProcvisorError, Result};
use procvisor_core::namespace::pid::process_credentials;
use procvisor_core::sysio::HostIo;
use procvisor_ipc::protocol::MessageHeader;
use procvisor_ipc::service::NsenterService;
use procvisor_state::container::Container;
use procvisor_state::store::ContainerStateService;

/// Dispatch context: state store, namespace-entering service, and host I/O.
pub struct HandlerContext {
    /// Container registry.
    pub state: Arc<ContainerStateService>,
    /// Executes operations inside a caller's namespaces.
    pub nsenter: Arc<dyn NsenterService>,
    /// Access to the real host files.
    pub io: Arc<dyn HostIo>,
    /// Procfs consulted for caller credentials.
    pub proc_root: PathBuf,
    /// Register unknown containers on first access instead of failing.
    pub auto_register: bool,
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("state", &self.state)
            .field("io", &self.io)
            .field("proc_root", &self.proc_root)
            .field("auto_register", &self.auto_register)
            .finish_non_exhaustive()
    }
}

impl HandlerContext {
    /// Fails unless the pid namespace of `pid` can be determined.
    ///
    /// # Errors
    ///
    /// Returns [`ProcvisorError::PidNsUnresolved`].
    pub fn ensure_resolvable(&self, pid: u32) -> Result<()> {
        if self.state.find_pid_ns_inode(pid) == 0 {
            tracing::debug!(pid, "could not identify pid-namespace inode");
            return Err(ProcvisorError::PidNsUnresolved { pid });
        }
        Ok(())
    }

    /// Container the caller belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`ProcvisorError::ContainerNotFound`] when no container is
    /// registered for the caller and auto-registration is off.
    pub fn container(&self, pid: u32) -> Result<Arc<Container>> {
        if self.auto_register {
            self.state.register_by_pid(pid)
        } else {
            self.state.container_lookup_by_pid(pid)
        }
    }

    /// Credentials header for a helper acting on behalf of `pid`.
    ///
    /// `None` when the caller's credentials cannot be read; the helper then
    /// keeps the supervisor's.
    #[must_use]
    pub fn header_for(&self, pid: u32) -> Option<MessageHeader> {
        match process_credentials(&self.proc_root, pid) {
            Ok(creds) => Some(MessageHeader::new(pid, creds.uid, creds.gid)),
            Err(e) => {
                tracing::debug!(pid, error = %e, "caller credentials unavailable");
                None
            }
        }
    }
}
