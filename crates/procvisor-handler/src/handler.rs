//! The uniform operation set every resource handler implements.

use std::fmt;

use procvisor_common::error::Result;
use procvisor_common::types::{DirEntry, NamespaceKind, NodeAttr, Ownership};
use procvisor_core::sysio::IoNode;

/// Handler family and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Read-only pass-through to the host tree.
    Common,
    /// Single integer scalar with a container-local value.
    IntegerKnob {
        /// Smallest accepted value.
        min: i64,
        /// Largest accepted value.
        max: i64,
    },
    /// Resource made invisible to containers.
    Hidden,
    /// Subtree served from inside the caller's namespaces.
    Namespaced {
        /// Namespaces joined for every operation.
        namespaces: &'static [NamespaceKind],
    },
}

impl HandlerKind {
    /// Whether the handler also serves every path below its own.
    #[must_use]
    pub const fn is_prefix(&self) -> bool {
        matches!(self, Self::Common | Self::Namespaced { .. })
    }
}

/// Immutable configuration of one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSpec {
    /// Unique handler name.
    pub name: &'static str,
    /// Absolute path served; a subtree root for prefix handlers.
    pub path: &'static str,
    /// Family and parameters.
    pub kind: HandlerKind,
    /// Disabled handlers are invisible to lookup.
    pub enabled: bool,
    /// Values may be cached per container.
    pub cacheable: bool,
    /// Accepted writes are also applied to the host.
    pub write_through: bool,
}

/// Operations on one virtualized resource.
///
/// `pid` is the process issuing the filesystem request. Handlers keep no
/// per-request state; everything mutable lives in the container records.
pub trait Handler: Send + Sync + fmt::Debug {
    /// Configuration this handler was built from.
    fn spec(&self) -> &HandlerSpec;

    /// Attributes of the resource.
    ///
    /// # Errors
    ///
    /// Returns [`procvisor_common::error::ProcvisorError::NotFound`] for
    /// invisible or missing resources.
    fn lookup(&self, node: &IoNode, pid: u32) -> Result<NodeAttr>;

    /// Ownership presented to the caller, or `None` to keep the host's.
    ///
    /// # Errors
    ///
    /// Returns an error if the caller cannot be identified.
    fn getattr(&self, node: &IoNode, pid: u32) -> Result<Option<Ownership>>;

    /// Validates the open flags recorded on `node` and opens the resource.
    ///
    /// # Errors
    ///
    /// Returns [`procvisor_common::error::ProcvisorError::PermissionDenied`]
    /// for unsupported access modes.
    fn open(&self, node: &IoNode, pid: u32) -> Result<()>;

    /// Reads up to `size` bytes at `offset`; empty means end of file.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be produced.
    fn read(&self, node: &IoNode, pid: u32, size: usize, offset: u64) -> Result<Vec<u8>>;

    /// Writes `data`, returning the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`procvisor_common::error::ProcvisorError::InvalidArgument`]
    /// for malformed or out-of-range content.
    fn write(&self, node: &IoNode, pid: u32, data: &[u8]) -> Result<usize>;

    /// Lists a directory resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    fn read_dir_all(&self, _node: &IoNode, _pid: u32) -> Result<Vec<DirEntry>> {
        Ok(Vec::new())
    }

    /// Releases the resource.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing fails.
    fn close(&self, _node: &IoNode) -> Result<()> {
        Ok(())
    }
}
