//! Filesystem protocol adapter.
//!
//! Resolves the node a request targets, finds the handler serving its path,
//! invokes it on behalf of the calling process, and maps the outcome onto a
//! POSIX error number. The adapter holds no virtualization logic of its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use libc::c_int;
use procvisor_common::error::ProcvisorError;
use procvisor_common::types::{NodeAttr, NodeKind};
use procvisor_core::sysio::IoNode;
use procvisor_handler::handler::{Handler, HandlerKind};
use procvisor_handler::registry::HandlerService;

use crate::node::{Node, NodeTable, child_path};

/// Result of an adapter operation: a value or a POSIX error number.
pub type FsResult<T> = std::result::Result<T, c_int>;

/// Process issuing a filesystem request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    /// Process id.
    pub pid: u32,
    /// User id.
    pub uid: u32,
    /// Group id.
    pub gid: u32,
}

/// Attribute changes requested through `setattr`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrChange {
    /// New permission bits.
    pub mode: Option<u32>,
    /// New owner.
    pub uid: Option<u32>,
    /// New group.
    pub gid: Option<u32>,
    /// New length.
    pub size: Option<u64>,
}

/// A name returned by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    /// Inode number reported for the entry.
    pub ino: u64,
    /// Entry type.
    pub kind: NodeKind,
    /// Entry name.
    pub name: String,
}

#[derive(Debug)]
struct OpenFile {
    node: IoNode,
    handler: Arc<dyn Handler>,
}

/// Translates filesystem requests into dispatch calls.
#[derive(Debug)]
pub struct FsService {
    handlers: Arc<HandlerService>,
    nodes: Mutex<NodeTable>,
    open_files: Mutex<HashMap<u64, OpenFile>>,
    next_fh: AtomicU64,
}

fn errno(op: &'static str, path: &str, err: &ProcvisorError) -> c_int {
    let errno = err.errno();
    tracing::debug!(op, path, errno, error = %err, "request failed");
    errno
}

fn lock_failed<T>(_: T) -> c_int {
    tracing::error!("adapter lock poisoned");
    libc::EIO
}

impl FsService {
    /// Creates an adapter dispatching through `handlers`.
    #[must_use]
    pub fn new(handlers: Arc<HandlerService>) -> Self {
        Self {
            handlers,
            nodes: Mutex::new(NodeTable::new()),
            open_files: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    fn nodes(&self) -> FsResult<MutexGuard<'_, NodeTable>> {
        self.nodes.lock().map_err(lock_failed)
    }

    fn open_files(&self) -> FsResult<MutexGuard<'_, HashMap<u64, OpenFile>>> {
        self.open_files.lock().map_err(lock_failed)
    }

    fn node(&self, ino: u64) -> FsResult<Node> {
        self.nodes()?.get(ino).cloned().ok_or(libc::ENOENT)
    }

    fn handler(&self, path: &str) -> FsResult<Arc<dyn Handler>> {
        self.handlers.lookup_handler(path).ok_or_else(|| {
            tracing::debug!(path, "no handler serves path");
            libc::ENOENT
        })
    }

    /// Number of nodes the kernel currently references.
    ///
    /// # Errors
    ///
    /// Returns `EIO` if the node table lock is poisoned.
    pub fn node_count(&self) -> FsResult<usize> {
        Ok(self.nodes()?.len())
    }

    /// Resolves `name` inside directory `parent`, returning its inode number
    /// and attributes.
    ///
    /// # Errors
    ///
    /// Returns `ENOENT` for unknown parents, unserved or hidden paths, and
    /// the handler's error otherwise.
    pub fn lookup(&self, caller: Caller, parent: u64, name: &str) -> FsResult<(u64, NodeAttr)> {
        let parent = self.node(parent)?;
        let path = child_path(parent.path(), name);
        let handler = self.handler(&path)?;

        let mut attr = handler
            .lookup(&IoNode::new(path.as_str()), caller.pid)
            .map_err(|e| errno("lookup", &path, &e))?;
        let ino = self.nodes()?.remember(&path, name, attr.clone());
        attr.ino = ino;
        Ok((ino, attr))
    }

    /// Attributes of a node from its lookup snapshot, with the handler's
    /// ownership override applied. The handler is asked for a fresh
    /// snapshot only when none exists yet.
    ///
    /// # Errors
    ///
    /// Returns `ENOENT` for unknown nodes and the handler's error otherwise.
    pub fn getattr(&self, caller: Caller, ino: u64) -> FsResult<NodeAttr> {
        let node = self.node(ino)?;
        let handler = self.handler(node.path())?;
        let io = IoNode::new(node.path());

        let owner = handler
            .getattr(&io, caller.pid)
            .map_err(|e| errno("getattr", node.path(), &e))?;
        let mut attr = match node.attr() {
            Some(attr) => attr.clone(),
            None => {
                let attr = handler
                    .lookup(&io, caller.pid)
                    .map_err(|e| errno("getattr", node.path(), &e))?;
                self.nodes()?.set_attr(ino, attr.clone());
                attr
            }
        };
        if let Some(owner) = owner {
            attr.uid = owner.uid;
            attr.gid = owner.gid;
        }
        attr.ino = ino;
        Ok(attr)
    }

    /// Applies an attribute change. Only size changes are accepted; they are
    /// no-ops on pseudo-files, whose content is replaced by each write.
    ///
    /// # Errors
    ///
    /// Returns `EPERM` for mode or ownership changes.
    pub fn setattr(&self, caller: Caller, ino: u64, change: AttrChange) -> FsResult<NodeAttr> {
        if change.mode.is_some() || change.uid.is_some() || change.gid.is_some() {
            let node = self.node(ino)?;
            tracing::debug!(path = node.path(), ?change, "rejected attribute change");
            return Err(libc::EPERM);
        }
        self.getattr(caller, ino)
    }

    /// Opens a node with the given `open(2)` flags and returns a file handle.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, typically `EACCES` for unsupported
    /// access modes.
    pub fn open(&self, caller: Caller, ino: u64, flags: i32) -> FsResult<u64> {
        let node = self.node(ino)?;
        let handler = self.handler(node.path())?;
        let io = IoNode::new(node.path()).with_open_flags(flags);

        handler
            .open(&io, caller.pid)
            .map_err(|e| errno("open", node.path(), &e))?;

        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        let _ = self.open_files()?.insert(fh, OpenFile { node: io, handler });
        tracing::trace!(path = node.path(), fh, flags, pid = caller.pid, "opened");
        Ok(fh)
    }

    fn open_file(&self, fh: u64) -> FsResult<(IoNode, Arc<dyn Handler>)> {
        self.open_files()?
            .get(&fh)
            .map(|file| (file.node.clone(), Arc::clone(&file.handler)))
            .ok_or(libc::EBADF)
    }

    /// Reads from an open file.
    ///
    /// # Errors
    ///
    /// Returns `EBADF` for unknown handles, `EINVAL` for negative offsets,
    /// and the handler's error otherwise.
    pub fn read(&self, caller: Caller, fh: u64, offset: i64, size: u32) -> FsResult<Vec<u8>> {
        let offset = u64::try_from(offset).map_err(|_| libc::EINVAL)?;
        let (node, handler) = self.open_file(fh)?;
        handler
            .read(&node, caller.pid, size as usize, offset)
            .map_err(|e| errno("read", node.path(), &e))
    }

    /// Writes to an open file, returning the number of bytes accepted.
    ///
    /// # Errors
    ///
    /// Returns `EBADF` for unknown handles and the handler's error
    /// otherwise.
    pub fn write(&self, caller: Caller, fh: u64, data: &[u8]) -> FsResult<u32> {
        let (node, handler) = self.open_file(fh)?;
        let written = handler
            .write(&node, caller.pid, data)
            .map_err(|e| errno("write", node.path(), &e))?;
        u32::try_from(written).map_err(|_| libc::EIO)
    }

    /// Releases a file handle.
    ///
    /// # Errors
    ///
    /// Returns `EBADF` for unknown handles and the handler's error
    /// otherwise.
    pub fn release(&self, fh: u64) -> FsResult<()> {
        let file = self.open_files()?.remove(&fh).ok_or(libc::EBADF)?;
        file.handler
            .close(&file.node)
            .map_err(|e| errno("release", file.node.path(), &e))
    }

    /// Lists a directory, hiding entries served by hidden handlers.
    ///
    /// # Errors
    ///
    /// Returns `ENOENT` for unknown nodes and the handler's error otherwise.
    pub fn readdir(&self, caller: Caller, ino: u64) -> FsResult<Vec<ListedEntry>> {
        let node = self.node(ino)?;
        let handler = self.handler(node.path())?;
        let entries = handler
            .read_dir_all(&IoNode::new(node.path()), caller.pid)
            .map_err(|e| errno("readdir", node.path(), &e))?;

        let parent_ino = node
            .path()
            .rsplit_once('/')
            .map(|(parent, _)| if parent.is_empty() { "/" } else { parent })
            .and_then(|parent| self.nodes().ok()?.ino_of(parent))
            .unwrap_or(crate::node::ROOT_INO);

        let mut listing = vec![
            ListedEntry {
                ino,
                kind: NodeKind::Directory,
                name: ".".into(),
            },
            ListedEntry {
                ino: parent_ino,
                kind: NodeKind::Directory,
                name: "..".into(),
            },
        ];

        let nodes = self.nodes()?;
        for entry in entries {
            let path = child_path(node.path(), &entry.name);
            let hidden = self
                .handlers
                .lookup_handler(&path)
                .is_none_or(|h| h.spec().kind == HandlerKind::Hidden);
            if hidden {
                continue;
            }
            listing.push(ListedEntry {
                ino: nodes.ino_of(&path).unwrap_or(entry.attr.ino),
                kind: entry.attr.kind,
                name: entry.name,
            });
        }
        Ok(listing)
    }

    /// Drops kernel references to a node.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if let Ok(mut nodes) = self.nodes() {
            nodes.forget(ino, nlookup);
        }
    }
}
