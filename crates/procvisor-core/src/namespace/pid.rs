//! PID namespace identity.
//!
//! A container is identified by the inode number of its pid namespace: it
//! stays stable for the lifetime of the container and is shared by every
//! process inside it.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use procvisor_common::error::{ProcvisorError, Result};

/// Resolves the pid-namespace inode of a process.
pub trait PidNsResolver: Send + Sync {
    /// Returns the pid-namespace inode of `pid`, or `0` when it cannot be
    /// resolved (process gone, no permission).
    fn find_pid_ns_inode(&self, pid: u32) -> u64;
}

/// Resolver reading `/proc/<pid>/ns/pid`.
#[derive(Debug, Clone)]
pub struct ProcPidNsResolver {
    proc_root: PathBuf,
}

impl ProcPidNsResolver {
    /// Creates a resolver over the given procfs mount.
    #[must_use]
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl Default for ProcPidNsResolver {
    fn default() -> Self {
        Self::new(procvisor_common::constants::PROC_ROOT)
    }
}

impl PidNsResolver for ProcPidNsResolver {
    fn find_pid_ns_inode(&self, pid: u32) -> u64 {
        if pid == 0 {
            return 0;
        }
        let path = self.proc_root.join(pid.to_string()).join("ns").join("pid");
        match std::fs::metadata(&path) {
            Ok(meta) => meta.ino(),
            Err(e) => {
                tracing::debug!(pid, path = %path.display(), error = %e, "pid-namespace lookup failed");
                0
            }
        }
    }
}

/// Effective credentials of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessCredentials {
    /// Effective user id.
    pub uid: u32,
    /// Effective group id.
    pub gid: u32,
}

/// Reads the effective uid/gid of `pid` from `/proc/<pid>/status`.
///
/// # Errors
///
/// Returns an error if the status file cannot be read or lacks the
/// `Uid:`/`Gid:` lines.
pub fn process_credentials(proc_root: &Path, pid: u32) -> Result<ProcessCredentials> {
    let path = proc_root.join(pid.to_string()).join("status");
    let status = std::fs::read_to_string(&path).map_err(|e| ProcvisorError::io(&path, e))?;

    // "Uid:\treal\teffective\tsaved\tfs"
    let effective = |key: &str| -> Option<u32> {
        status
            .lines()
            .find_map(|line| line.strip_prefix(key))
            .and_then(|rest| rest.split_whitespace().nth(1))
            .and_then(|field| field.parse().ok())
    };

    match (effective("Uid:"), effective("Gid:")) {
        (Some(uid), Some(gid)) => Ok(ProcessCredentials { uid, gid }),
        _ => Err(ProcvisorError::invalid(format!(
            "malformed credentials in {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_own_pid_namespace() {
        let resolver = ProcPidNsResolver::default();
        assert_ne!(resolver.find_pid_ns_inode(std::process::id()), 0);
    }

    #[test]
    fn unresolvable_pid_yields_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = ProcPidNsResolver::new(dir.path());
        assert_eq!(resolver.find_pid_ns_inode(1234), 0);
        assert_eq!(ProcPidNsResolver::default().find_pid_ns_inode(0), 0);
    }

    #[test]
    fn reads_effective_credentials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_dir = dir.path().join("77");
        std::fs::create_dir_all(&pid_dir).expect("mkdir");
        std::fs::write(
            pid_dir.join("status"),
            "Name:\tsh\nUid:\t1000\t100000\t1000\t1000\nGid:\t1000\t100001\t1000\t1000\n",
        )
        .expect("write");

        let creds = process_credentials(dir.path(), 77).expect("credentials");
        assert_eq!(creds, ProcessCredentials { uid: 100_000, gid: 100_001 });
    }

    #[test]
    fn malformed_status_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_dir = dir.path().join("78");
        std::fs::create_dir_all(&pid_dir).expect("mkdir");
        std::fs::write(pid_dir.join("status"), "Name:\tsh\n").expect("write");

        let err = process_credentials(dir.path(), 78).expect_err("no Uid line");
        assert_eq!(err.errno(), libc::EINVAL);
    }
}
