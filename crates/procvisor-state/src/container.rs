//! Container record and its resource-value cache.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::PidNsInode;

type DataKey = (String, String);

/// State kept for one container.
///
/// Handlers share records through `Arc<Container>`; every record guards its
/// own cache, so traffic on one container never blocks another.
#[derive(Debug)]
pub struct Container {
    inode: PidNsInode,
    created_at: DateTime<Utc>,
    data: Mutex<HashMap<DataKey, String>>,
}

impl Container {
    /// Creates an empty record for the given pid namespace.
    #[must_use]
    pub fn new(inode: PidNsInode) -> Self {
        Self {
            inode,
            created_at: Utc::now(),
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Identity of the container.
    #[must_use]
    pub const fn inode(&self) -> PidNsInode {
        self.inode
    }

    /// When the record was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn lock_data(&self) -> Result<MutexGuard<'_, HashMap<DataKey, String>>> {
        self.data.lock().map_err(|_| ProcvisorError::Config {
            message: format!("data lock of container {} poisoned", self.inode),
        })
    }

    /// Returns the cached value of `field` for the resource at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned.
    pub fn data(&self, path: &str, field: &str) -> Result<Option<String>> {
        let data = self.lock_data()?;
        Ok(data.get(&(path.to_string(), field.to_string())).cloned())
    }

    /// Stores the value of `field` for the resource at `path`, replacing any
    /// earlier value.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned.
    pub fn set_data(&self, path: &str, field: &str, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        tracing::trace!(container = %self.inode, path, field, %value, "caching value");
        let _ = self
            .lock_data()?
            .insert((path.to_string(), field.to_string()), value);
        Ok(())
    }

    /// Stores `value` unless the field already holds one, and returns the
    /// value the field holds afterwards. A value set concurrently always wins
    /// over the seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned.
    pub fn seed_data(&self, path: &str, field: &str, value: impl Into<String>) -> Result<String> {
        let mut data = self.lock_data()?;
        let held = data
            .entry((path.to_string(), field.to_string()))
            .or_insert_with(|| value.into());
        Ok(held.clone())
    }

    /// Number of cached values.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned.
    pub fn data_len(&self) -> Result<usize> {
        Ok(self.lock_data()?.len())
    }
}
