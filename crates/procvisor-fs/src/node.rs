//! Node table shared between the kernel's inode numbers and our paths.

use std::collections::HashMap;

use procvisor_common::types::NodeAttr;

/// Inode number the kernel uses for the mount root.
pub const ROOT_INO: u64 = 1;

/// A filesystem-visible entry.
#[derive(Debug, Clone)]
pub struct Node {
    ino: u64,
    name: String,
    path: String,
    attr: Option<NodeAttr>,
    lookups: u64,
}

impl Node {
    /// Inode number handed to the kernel.
    #[must_use]
    pub const fn ino(&self) -> u64 {
        self.ino
    }

    /// Last path component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path inside the mirrored tree.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attributes from the most recent lookup.
    #[must_use]
    pub const fn attr(&self) -> Option<&NodeAttr> {
        self.attr.as_ref()
    }
}

/// Joins a child name onto a parent path.
#[must_use]
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Nodes the kernel holds references to, indexed both ways.
#[derive(Debug)]
pub struct NodeTable {
    by_ino: HashMap<u64, Node>,
    by_path: HashMap<String, u64>,
    next_ino: u64,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable {
    /// Creates a table holding only the root.
    #[must_use]
    pub fn new() -> Self {
        let root = Node {
            ino: ROOT_INO,
            name: "/".into(),
            path: "/".into(),
            attr: None,
            lookups: 1,
        };
        Self {
            by_ino: HashMap::from([(ROOT_INO, root)]),
            by_path: HashMap::from([("/".to_string(), ROOT_INO)]),
            next_ino: ROOT_INO + 1,
        }
    }

    /// Node with the given inode number.
    #[must_use]
    pub fn get(&self, ino: u64) -> Option<&Node> {
        self.by_ino.get(&ino)
    }

    /// Inode number of a known path.
    #[must_use]
    pub fn ino_of(&self, path: &str) -> Option<u64> {
        self.by_path.get(path).copied()
    }

    /// Records a successful lookup of `path`, creating the node if needed,
    /// and returns its inode number.
    pub fn remember(&mut self, path: &str, name: &str, attr: NodeAttr) -> u64 {
        if let Some(node) = self.by_path.get(path).and_then(|ino| self.by_ino.get_mut(ino)) {
            node.attr = Some(attr);
            node.lookups += 1;
            return node.ino;
        }

        let ino = self.next_ino;
        self.next_ino += 1;
        let _ = self.by_ino.insert(
            ino,
            Node {
                ino,
                name: name.to_string(),
                path: path.to_string(),
                attr: Some(attr),
                lookups: 1,
            },
        );
        let _ = self.by_path.insert(path.to_string(), ino);
        ino
    }

    /// Replaces the attribute snapshot of a known node.
    pub fn set_attr(&mut self, ino: u64, attr: NodeAttr) {
        if let Some(node) = self.by_ino.get_mut(&ino) {
            node.attr = Some(attr);
        }
    }

    /// Drops `nlookup` kernel references; the node goes away with the last
    /// one. The root is never removed.
    pub fn forget(&mut self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let Some(node) = self.by_ino.get_mut(&ino) else {
            return;
        };
        node.lookups = node.lookups.saturating_sub(nlookup);
        if node.lookups == 0 {
            if let Some(node) = self.by_ino.remove(&ino) {
                let _ = self.by_path.remove(&node.path);
                tracing::trace!(ino, path = %node.path, "forgot node");
            }
        }
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    /// Always false: the root is permanent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use procvisor_common::types::NodeKind;

    use super::*;

    fn attr() -> NodeAttr {
        NodeAttr {
            ino: 99,
            size: 0,
            blocks: 0,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            kind: NodeKind::File,
            perm: 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 4096,
        }
    }

    #[test]
    fn child_paths_join_without_double_slash() {
        assert_eq!(child_path("/", "proc"), "/proc");
        assert_eq!(child_path("/proc", "sys"), "/proc/sys");
    }

    #[test]
    fn repeated_lookup_reuses_inode() {
        let mut table = NodeTable::new();
        let a = table.remember("/proc", "proc", attr());
        let b = table.remember("/proc", "proc", attr());
        assert_eq!(a, b);
        assert_ne!(a, ROOT_INO);
        assert_eq!(table.ino_of("/proc"), Some(a));
    }

    #[test]
    fn node_is_dropped_after_last_forget() {
        let mut table = NodeTable::new();
        let ino = table.remember("/proc", "proc", attr());
        let _ = table.remember("/proc", "proc", attr());
        table.forget(ino, 1);
        assert!(table.get(ino).is_some());
        table.forget(ino, 1);
        assert!(table.get(ino).is_none());
        assert!(table.ino_of("/proc").is_none());
    }

    #[test]
    fn root_snapshot_is_filled_on_demand() {
        let mut table = NodeTable::new();
        assert!(table.get(ROOT_INO).and_then(Node::attr).is_none());
        table.set_attr(ROOT_INO, attr());
        assert_eq!(table.get(ROOT_INO).and_then(Node::attr).map(|a| a.perm), Some(0o644));
    }

    #[test]
    fn root_survives_forget() {
        let mut table = NodeTable::new();
        table.forget(ROOT_INO, 10);
        assert_eq!(table.get(ROOT_INO).map(Node::path), Some("/"));
        assert_eq!(table.len(), 1);
    }
}
