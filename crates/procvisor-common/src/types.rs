//! Domain primitive types used across the procvisor workspace.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::ProcvisorError;

/// Inode number of a pid namespace, the identity key of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PidNsInode(u64);

impl PidNsInode {
    /// Wraps a raw inode number; `0` means "unresolvable" and yields `None`.
    #[must_use]
    pub const fn new(inode: u64) -> Option<Self> {
        if inode == 0 { None } else { Some(Self(inode)) }
    }

    /// Returns the raw inode number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PidNsInode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kernel namespace kinds a helper may join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// Cgroup namespace.
    Cgroup,
    /// System V IPC / POSIX message queue namespace.
    Ipc,
    /// Network namespace.
    Net,
    /// PID namespace.
    Pid,
    /// Hostname / domain name namespace.
    Uts,
    /// User namespace.
    User,
    /// Mount namespace.
    #[serde(rename = "mnt")]
    Mount,
}

impl NamespaceKind {
    /// All kinds, in join order.
    pub const ALL: [Self; 7] = [
        Self::User,
        Self::Mount,
        Self::Cgroup,
        Self::Ipc,
        Self::Net,
        Self::Pid,
        Self::Uts,
    ];

    /// Name of the entry under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cgroup => "cgroup",
            Self::Ipc => "ipc",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::Uts => "uts",
            Self::User => "user",
            Self::Mount => "mnt",
        }
    }

    /// Position in the join sequence.
    ///
    /// Joining the user namespace changes the capability context every later
    /// `setns(2)` is checked against, so it goes first; the mount namespace
    /// follows because it decides which `/proc` the rest of the operation sees.
    #[must_use]
    pub const fn join_rank(self) -> u8 {
        match self {
            Self::User => 0,
            Self::Mount => 1,
            Self::Cgroup => 2,
            Self::Ipc => 3,
            Self::Net => 4,
            Self::Pid => 5,
            Self::Uts => 6,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NamespaceKind {
    type Err = ProcvisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProcvisorError::invalid(format!("unknown namespace kind: {s}")))
    }
}

/// De-duplicated set of namespaces, always iterated in join order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<NamespaceKind>", into = "Vec<NamespaceKind>")]
pub struct NamespaceSet(Vec<NamespaceKind>);

impl NamespaceSet {
    /// Creates an empty set; a helper given an empty set stays in the
    /// supervisor's namespaces.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Returns true when no namespace is requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns whether `kind` is part of the set.
    #[must_use]
    pub fn contains(&self, kind: NamespaceKind) -> bool {
        self.0.contains(&kind)
    }

    /// Iterates the kinds in join order.
    pub fn iter(&self) -> impl Iterator<Item = NamespaceKind> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<NamespaceKind> for NamespaceSet {
    fn from_iter<I: IntoIterator<Item = NamespaceKind>>(iter: I) -> Self {
        let mut kinds: Vec<NamespaceKind> = iter.into_iter().collect();
        kinds.sort_by_key(|kind| kind.join_rank());
        kinds.dedup();
        Self(kinds)
    }
}

impl From<Vec<NamespaceKind>> for NamespaceSet {
    fn from(kinds: Vec<NamespaceKind>) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<NamespaceSet> for Vec<NamespaceKind> {
    fn from(set: NamespaceSet) -> Self {
        set.0
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|kind| kind.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

impl FromStr for NamespaceSet {
    type Err = ProcvisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(NamespaceKind::from_str)
            .collect()
    }
}

/// File type of a filesystem node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Regular (pseudo-)file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

/// Attributes of a filesystem node, as collected from the host or from a
/// helper running inside a container's namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttr {
    /// Inode number on the backing filesystem.
    pub ino: u64,
    /// Size in bytes; pseudo-files usually report `0` or a page.
    pub size: u64,
    /// Allocated 512-byte blocks.
    pub blocks: u64,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
    /// File type.
    pub kind: NodeKind,
    /// Permission bits (without the file type bits).
    pub perm: u16,
    /// Hard link count.
    pub nlink: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Device id for special files.
    pub rdev: u32,
    /// Preferred I/O block size.
    pub blksize: u32,
}

impl NodeAttr {
    /// Returns true for directories.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// One directory entry returned by `read_dir_all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (no path separators).
    pub name: String,
    /// Entry attributes.
    pub attr: NodeAttr,
}

/// Ownership override returned by handlers that virtualize uid/gid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    /// Owner user id presented to the caller.
    pub uid: u32,
    /// Owner group id presented to the caller.
    pub gid: u32,
}
