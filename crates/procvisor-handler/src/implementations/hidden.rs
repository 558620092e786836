//! Resources made invisible to containers.

use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::{NodeAttr, Ownership};
use procvisor_core::sysio::IoNode;

use crate::handler::{Handler, HandlerSpec};

/// Answers every operation as if the resource did not exist.
#[derive(Debug)]
pub struct HiddenHandler {
    spec: HandlerSpec,
}

impl HiddenHandler {
    /// Creates the handler.
    #[must_use]
    pub const fn new(spec: HandlerSpec) -> Self {
        Self { spec }
    }
}

fn not_found(node: &IoNode) -> ProcvisorError {
    ProcvisorError::NotFound {
        kind: "resource",
        id: node.path().to_string(),
    }
}

impl Handler for HiddenHandler {
    fn spec(&self) -> &HandlerSpec {
        &self.spec
    }

    fn lookup(&self, node: &IoNode, _pid: u32) -> Result<NodeAttr> {
        Err(not_found(node))
    }

    fn getattr(&self, node: &IoNode, _pid: u32) -> Result<Option<Ownership>> {
        Err(not_found(node))
    }

    fn open(&self, node: &IoNode, _pid: u32) -> Result<()> {
        Err(not_found(node))
    }

    fn read(&self, node: &IoNode, _pid: u32, _size: usize, _offset: u64) -> Result<Vec<u8>> {
        Err(not_found(node))
    }

    fn write(&self, node: &IoNode, _pid: u32, _data: &[u8]) -> Result<usize> {
        Err(not_found(node))
    }
}
