//! Read-only pass-through to the host tree.

use std::sync::Arc;

use procvisor_common::constants::MAX_READ_SIZE;
use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::{DirEntry, NodeAttr, Ownership};
use procvisor_core::sysio::IoNode;

use crate::context::HandlerContext;
use crate::handler::{Handler, HandlerSpec};

/// Serves every resource without a dedicated handler.
#[derive(Debug)]
pub struct CommonHandler {
    spec: HandlerSpec,
    ctx: Arc<HandlerContext>,
}

impl CommonHandler {
    /// Creates the handler.
    #[must_use]
    pub const fn new(spec: HandlerSpec, ctx: Arc<HandlerContext>) -> Self {
        Self { spec, ctx }
    }
}

impl Handler for CommonHandler {
    fn spec(&self) -> &HandlerSpec {
        &self.spec
    }

    fn lookup(&self, node: &IoNode, pid: u32) -> Result<NodeAttr> {
        self.ctx.ensure_resolvable(pid)?;
        self.ctx.io.stat(node)
    }

    fn getattr(&self, _node: &IoNode, pid: u32) -> Result<Option<Ownership>> {
        self.ctx.ensure_resolvable(pid)?;
        Ok(None)
    }

    fn open(&self, node: &IoNode, pid: u32) -> Result<()> {
        if node.access_mode() != libc::O_RDONLY {
            return Err(ProcvisorError::PermissionDenied {
                message: format!("{} is read-only", node.path()),
            });
        }
        self.ctx.ensure_resolvable(pid)?;
        self.ctx.io.open(node)
    }

    fn read(&self, node: &IoNode, _pid: u32, size: usize, offset: u64) -> Result<Vec<u8>> {
        self.ctx.io.read_at(node, offset, size.min(MAX_READ_SIZE))
    }

    fn write(&self, node: &IoNode, _pid: u32, _data: &[u8]) -> Result<usize> {
        Err(ProcvisorError::PermissionDenied {
            message: format!("{} is read-only", node.path()),
        })
    }

    fn read_dir_all(&self, node: &IoNode, pid: u32) -> Result<Vec<DirEntry>> {
        self.ctx.ensure_resolvable(pid)?;
        self.ctx.io.read_dir(node)
    }
}
