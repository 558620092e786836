//! Linux namespace joining for namespace-entering helpers.
//!
//! Provides safe wrappers around `setns(2)`. Only short-lived helper
//! processes call into this module: joining a namespace cannot be undone and
//! would corrupt the view of a long-lived multi-threaded supervisor.

pub mod pid;

use std::fs::File;
use std::path::{Path, PathBuf};

use nix::sched::{CloneFlags, setns};
use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::{NamespaceKind, NamespaceSet};

/// An open handle on one namespace of a target process.
#[derive(Debug)]
pub struct NamespaceHandle {
    kind: NamespaceKind,
    path: PathBuf,
    file: File,
}

impl NamespaceHandle {
    /// Namespace kind this handle refers to.
    #[must_use]
    pub const fn kind(&self) -> NamespaceKind {
        self.kind
    }

    /// `/proc/<pid>/ns/<kind>` path the handle was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns the `clone(2)` flag matching a namespace kind.
#[must_use]
pub const fn clone_flag(kind: NamespaceKind) -> CloneFlags {
    match kind {
        NamespaceKind::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        NamespaceKind::Ipc => CloneFlags::CLONE_NEWIPC,
        NamespaceKind::Net => CloneFlags::CLONE_NEWNET,
        NamespaceKind::Pid => CloneFlags::CLONE_NEWPID,
        NamespaceKind::Uts => CloneFlags::CLONE_NEWUTS,
        NamespaceKind::User => CloneFlags::CLONE_NEWUSER,
        NamespaceKind::Mount => CloneFlags::CLONE_NEWNS,
    }
}

/// Opens every namespace of `pid` named in `namespaces`, in join order.
///
/// All handles are opened before any namespace is joined: once the mount
/// namespace changes, `/proc` may no longer show the target process.
///
/// # Errors
///
/// Returns an error if the target process is gone or a namespace file
/// cannot be opened.
pub fn open_namespaces(
    proc_root: &Path,
    pid: u32,
    namespaces: &NamespaceSet,
) -> Result<Vec<NamespaceHandle>> {
    namespaces
        .iter()
        .map(|kind| {
            let path = proc_root
                .join(pid.to_string())
                .join("ns")
                .join(kind.as_str());
            let file = File::open(&path).map_err(|e| ProcvisorError::io(&path, e))?;
            Ok(NamespaceHandle { kind, path, file })
        })
        .collect()
}

/// Joins the namespaces behind `handles`, in the order given.
///
/// # Errors
///
/// Returns [`ProcvisorError::PermissionDenied`] when `setns(2)` fails.
pub fn join_namespaces(handles: &[NamespaceHandle]) -> Result<()> {
    for handle in handles {
        setns(&handle.file, clone_flag(handle.kind)).map_err(|e| {
            ProcvisorError::PermissionDenied {
                message: format!("setns {} failed: {e}", handle.kind),
            }
        })?;
        tracing::debug!(ns = %handle.kind, path = %handle.path.display(), "joined namespace");
    }
    Ok(())
}

/// Opens and joins the namespaces of `pid` in join order.
///
/// # Errors
///
/// Returns an error if any namespace cannot be opened or joined.
pub fn enter_namespaces(proc_root: &Path, pid: u32, namespaces: &NamespaceSet) -> Result<()> {
    let handles = open_namespaces(proc_root, pid, namespaces)?;
    join_namespaces(&handles)?;
    tracing::debug!(pid, namespaces = %namespaces, "entered namespaces");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc_root() -> PathBuf {
        PathBuf::from(procvisor_common::constants::PROC_ROOT)
    }

    #[test]
    fn open_namespaces_follows_join_order() {
        let set: NamespaceSet = "net,uts,mnt".parse().expect("parse");
        let handles =
            open_namespaces(&proc_root(), std::process::id(), &set).expect("open own namespaces");
        let kinds: Vec<_> = handles.iter().map(NamespaceHandle::kind).collect();
        assert_eq!(
            kinds,
            vec![NamespaceKind::Mount, NamespaceKind::Net, NamespaceKind::Uts]
        );
        assert!(handles[0].path().ends_with("ns/mnt"));
    }

    #[test]
    fn open_namespaces_fails_for_missing_process() {
        let set: NamespaceSet = "net".parse().expect("parse");
        let dir = tempfile::tempdir().expect("tempdir");
        let err = open_namespaces(dir.path(), 42, &set).expect_err("no such pid");
        assert!(matches!(err, ProcvisorError::Io { .. }));
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn empty_set_joins_nothing() {
        enter_namespaces(&proc_root(), std::process::id(), &NamespaceSet::empty())
            .expect("empty set is a no-op");
    }

    #[test]
    fn clone_flags_match_kernel_names() {
        assert_eq!(clone_flag(NamespaceKind::Mount), CloneFlags::CLONE_NEWNS);
        assert_eq!(clone_flag(NamespaceKind::User), CloneFlags::CLONE_NEWUSER);
    }
}
