//! Subtrees whose content depends on the caller's namespaces.
//!
//! `/proc/sys/net` shows the network namespace of the process reading it.
//! The supervisor lives in the host's namespaces, so every operation is
//! forwarded to a helper that joins the caller's.

use std::sync::Arc;

use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::{DirEntry, NamespaceSet, NodeAttr, Ownership};
use procvisor_core::sysio::IoNode;
use procvisor_ipc::protocol::{
    LookupPayload, Message, OpenFilePayload, ReadDirPayload, ReadFilePayload, WriteFilePayload,
};

use crate::context::HandlerContext;
use crate::handler::{Handler, HandlerSpec};

/// Forwards every operation into the caller's namespaces; nothing is
/// cached.
#[derive(Debug)]
pub struct NamespacedHandler {
    spec: HandlerSpec,
    namespaces: NamespaceSet,
    ctx: Arc<HandlerContext>,
}

impl NamespacedHandler {
    /// Creates the handler joining `namespaces` for each operation.
    #[must_use]
    pub const fn new(spec: HandlerSpec, namespaces: NamespaceSet, ctx: Arc<HandlerContext>) -> Self {
        Self {
            spec,
            namespaces,
            ctx,
        }
    }

    fn execute(&self, pid: u32, request: Message) -> Result<Message> {
        self.ctx.ensure_resolvable(pid)?;
        let name = request.name();
        let response = self
            .ctx
            .nsenter
            .execute(pid, self.namespaces.clone(), request)
            .into_result()?;
        tracing::trace!(pid, request = name, response = response.name(), "served in caller namespaces");
        Ok(response)
    }
}

fn unexpected(response: &Message) -> ProcvisorError {
    ProcvisorError::transport(format!("unexpected {}", response.name()))
}

impl Handler for NamespacedHandler {
    fn spec(&self) -> &HandlerSpec {
        &self.spec
    }

    fn lookup(&self, node: &IoNode, pid: u32) -> Result<NodeAttr> {
        let request = Message::LookupRequest(LookupPayload {
            entry: node.path().to_string(),
        });
        match self.execute(pid, request)? {
            Message::LookupResponse(attr) => Ok(attr),
            other => Err(unexpected(&other)),
        }
    }

    fn getattr(&self, _node: &IoNode, pid: u32) -> Result<Option<Ownership>> {
        self.ctx.ensure_resolvable(pid)?;
        Ok(None)
    }

    fn open(&self, node: &IoNode, pid: u32) -> Result<()> {
        let request = Message::OpenFileRequest(OpenFilePayload {
            header: self.ctx.header_for(pid),
            file: node.path().to_string(),
            flags: node.open_flags(),
            mode: 0,
        });
        match self.execute(pid, request)? {
            Message::OpenFileResponse => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn read(&self, node: &IoNode, pid: u32, size: usize, offset: u64) -> Result<Vec<u8>> {
        let request = Message::ReadFileRequest(ReadFilePayload {
            header: self.ctx.header_for(pid),
            file: node.path().to_string(),
            offset,
            size,
        });
        match self.execute(pid, request)? {
            Message::ReadFileResponse(reply) => Ok(reply.content),
            other => Err(unexpected(&other)),
        }
    }

    fn write(&self, node: &IoNode, pid: u32, data: &[u8]) -> Result<usize> {
        let request = Message::WriteFileRequest(WriteFilePayload {
            header: self.ctx.header_for(pid),
            file: node.path().to_string(),
            content: data.to_vec(),
        });
        match self.execute(pid, request)? {
            Message::WriteFileResponse(reply) => Ok(reply.written),
            other => Err(unexpected(&other)),
        }
    }

    fn read_dir_all(&self, node: &IoNode, pid: u32) -> Result<Vec<DirEntry>> {
        let request = Message::ReadDirRequest(ReadDirPayload {
            header: self.ctx.header_for(pid),
            dir: node.path().to_string(),
        });
        match self.execute(pid, request)? {
            Message::ReadDirResponse(reply) => Ok(reply.entries),
            other => Err(unexpected(&other)),
        }
    }
}
