//! Container registry keyed by pid-namespace inode.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::PidNsInode;
use procvisor_core::namespace::pid::PidNsResolver;

use crate::container::Container;

/// Shared registry of every known container.
///
/// Records are handed out as `Arc<Container>`: removing a container only
/// drops the registry's reference, so a request still holding the record
/// finishes against it.
pub struct ContainerStateService {
    resolver: Arc<dyn PidNsResolver>,
    containers: RwLock<HashMap<PidNsInode, Arc<Container>>>,
}

impl std::fmt::Debug for ContainerStateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerStateService")
            .field("containers", &self.containers)
            .finish_non_exhaustive()
    }
}

impl ContainerStateService {
    /// Creates an empty registry resolving pids with `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<dyn PidNsResolver>) -> Self {
        Self {
            resolver,
            containers: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<PidNsInode, Arc<Container>>>> {
        self.containers.read().map_err(|_| ProcvisorError::Config {
            message: "container registry lock poisoned".into(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<PidNsInode, Arc<Container>>>> {
        self.containers.write().map_err(|_| ProcvisorError::Config {
            message: "container registry lock poisoned".into(),
        })
    }

    /// Pid-namespace inode of `pid`, `0` when unresolvable.
    #[must_use]
    pub fn find_pid_ns_inode(&self, pid: u32) -> u64 {
        self.resolver.find_pid_ns_inode(pid)
    }

    fn resolve(&self, pid: u32) -> Result<PidNsInode> {
        PidNsInode::new(self.find_pid_ns_inode(pid)).ok_or(ProcvisorError::PidNsUnresolved { pid })
    }

    /// Returns the container of `pid`, creating it on first reference.
    ///
    /// # Errors
    ///
    /// Returns [`ProcvisorError::PidNsUnresolved`] if the pid namespace of
    /// `pid` cannot be determined.
    pub fn register_by_pid(&self, pid: u32) -> Result<Arc<Container>> {
        let inode = self.resolve(pid)?;
        if let Some(existing) = self.read()?.get(&inode) {
            return Ok(Arc::clone(existing));
        }

        let mut containers = self.write()?;
        let container = containers.entry(inode).or_insert_with(|| {
            tracing::info!(pid, inode = %inode, "registered container");
            Arc::new(Container::new(inode))
        });
        Ok(Arc::clone(container))
    }

    /// Returns the container `pid` belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`ProcvisorError::PidNsUnresolved`] if the pid namespace of
    /// `pid` cannot be determined, or [`ProcvisorError::ContainerNotFound`]
    /// if no container is registered for it.
    pub fn container_lookup_by_pid(&self, pid: u32) -> Result<Arc<Container>> {
        let inode = self.resolve(pid)?;
        self.read()?.get(&inode).cloned().ok_or_else(|| {
            tracing::debug!(pid, inode = %inode, "no container registered");
            ProcvisorError::ContainerNotFound { pid }
        })
    }

    /// Returns the container with the given identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn container_lookup_by_inode(&self, inode: PidNsInode) -> Result<Option<Arc<Container>>> {
        Ok(self.read()?.get(&inode).cloned())
    }

    /// Forgets a container; in-flight holders keep their reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn remove_container(&self, inode: PidNsInode) -> Result<Option<Arc<Container>>> {
        let removed = self.write()?.remove(&inode);
        if removed.is_some() {
            tracing::info!(inode = %inode, "removed container");
        }
        Ok(removed)
    }

    /// Number of registered containers.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn container_count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver;

    impl PidNsResolver for FixedResolver {
        fn find_pid_ns_inode(&self, pid: u32) -> u64 {
            match pid {
                0 => 0,
                1..=99 => 1000,
                _ => 2000,
            }
        }
    }

    fn store() -> ContainerStateService {
        ContainerStateService::new(Arc::new(FixedResolver))
    }

    #[test]
    fn register_is_idempotent_per_namespace() {
        let s = store();
        let a = s.register_by_pid(10).expect("register");
        let b = s.register_by_pid(11).expect("register");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(s.container_count().expect("count"), 1);
    }

    #[test]
    fn distinct_namespaces_get_distinct_records() {
        let s = store();
        let a = s.register_by_pid(10).expect("register");
        let b = s.register_by_pid(100).expect("register");
        assert_ne!(a.inode(), b.inode());
    }

    #[test]
    fn lookup_of_unregistered_container_fails() {
        let err = store().container_lookup_by_pid(10).expect_err("not registered");
        assert!(matches!(err, ProcvisorError::ContainerNotFound { pid: 10 }));
    }

    #[test]
    fn unresolvable_pid_creates_nothing() {
        let s = store();
        let err = s.register_by_pid(0).expect_err("unresolvable");
        assert!(matches!(err, ProcvisorError::PidNsUnresolved { pid: 0 }));
        assert_eq!(s.container_count().expect("count"), 0);
    }

    #[test]
    fn removal_keeps_in_flight_references_alive() {
        let s = store();
        let held = s.register_by_pid(10).expect("register");
        held.set_data("/proc/sys/kernel/panic", "panic", "5").expect("set");

        let removed = s.remove_container(held.inode()).expect("remove");
        assert!(removed.is_some());
        assert!(s.container_lookup_by_inode(held.inode()).expect("lookup").is_none());
        assert_eq!(
            held.data("/proc/sys/kernel/panic", "panic").expect("data"),
            Some("5".into())
        );

        let fresh = s.register_by_pid(10).expect("re-register");
        assert!(!Arc::ptr_eq(&held, &fresh));
        assert!(fresh.data("/proc/sys/kernel/panic", "panic").expect("data").is_none());
    }
}
