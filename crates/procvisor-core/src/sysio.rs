//! Host file I/O for kernel-exported pseudo-files.
//!
//! `/proc` and `/sys` files misreport their size and generate content on
//! every read, so all access here is unbuffered: one `open`, positional
//! reads, and single `write(2)` calls that are never split or coalesced.

use std::fmt;
use std::fs::{File, Metadata, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::{DirEntry, NodeAttr, NodeKind};

/// I/O view of one resource: its name, absolute path inside the mirrored
/// tree, and the flags it is being opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoNode {
    name: String,
    path: String,
    open_flags: i32,
}

impl IoNode {
    /// Creates a node for an absolute path such as
    /// `/proc/sys/kernel/panic_on_oops`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("/")
            .to_string();
        Self {
            name,
            path,
            open_flags: libc::O_RDONLY,
        }
    }

    /// Returns the node with the given open flags.
    #[must_use]
    pub const fn with_open_flags(mut self, flags: i32) -> Self {
        self.open_flags = flags;
        self
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

    /// Flags passed to the last `open`.
    #[must_use]
    pub const fn open_flags(&self) -> i32 {
        self.open_flags
    }

    /// Records the flags of an incoming `open`.
    pub const fn set_open_flags(&mut self, flags: i32) {
        self.open_flags = flags;
    }

    /// Access mode bits of the open flags (`O_RDONLY`, `O_WRONLY`, `O_RDWR`).
    #[must_use]
    pub const fn access_mode(&self) -> i32 {
        self.open_flags & libc::O_ACCMODE
    }
}

/// Access to the real files backing the virtualized tree.
pub trait HostIo: Send + Sync + fmt::Debug {
    /// Collects the attributes of the host file without following a
    /// trailing symlink.
    ///
    /// # Errors
    ///
    /// Returns [`ProcvisorError::NotFound`] if the file does not exist and
    /// [`ProcvisorError::Io`] for any other failure.
    fn stat(&self, node: &IoNode) -> Result<NodeAttr>;

    /// Opens the host file with the node's flags, verifying access.
    ///
    /// # Errors
    ///
    /// Returns an error if the host refuses the open.
    fn open(&self, node: &IoNode) -> Result<()>;

    /// Reads the first line of the host file, without the line terminator.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    fn read_line(&self, node: &IoNode) -> Result<String>;

    /// Reads the whole host file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    fn read_all(&self, node: &IoNode) -> Result<Vec<u8>>;

    /// Reads up to `size` bytes starting at `offset`; an empty result means
    /// end of file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    fn read_at(&self, node: &IoNode, offset: u64, size: usize) -> Result<Vec<u8>>;

    /// Writes `data` with a single `write(2)`, returning the byte count.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written.
    fn write(&self, node: &IoNode, data: &[u8]) -> Result<usize>;

    /// Lists a host directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn read_dir(&self, node: &IoNode) -> Result<Vec<DirEntry>>;
}

/// [`HostIo`] over the real filesystem, rooted at a host directory.
#[derive(Debug, Clone)]
pub struct FileIo {
    root: PathBuf,
}

impl FileIo {
    /// Creates a file service resolving every node path under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Host directory the node paths are resolved under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a node path onto the host filesystem.
    #[must_use]
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn open_file(&self, node: &IoNode, flags: i32) -> Result<(PathBuf, File)> {
        let path = self.host_path(node.path());
        let mode = flags & libc::O_ACCMODE;
        let file = OpenOptions::new()
            .read(mode == libc::O_RDONLY || mode == libc::O_RDWR)
            .write(mode == libc::O_WRONLY || mode == libc::O_RDWR)
            .custom_flags(libc::O_CLOEXEC)
            .open(&path)
            .map_err(|e| ProcvisorError::io(&path, e))?;
        Ok((path, file))
    }
}

impl Default for FileIo {
    fn default() -> Self {
        Self::new(procvisor_common::constants::DEFAULT_HOST_ROOT)
    }
}

impl HostIo for FileIo {
    fn stat(&self, node: &IoNode) -> Result<NodeAttr> {
        let path = self.host_path(node.path());
        let meta = std::fs::symlink_metadata(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProcvisorError::NotFound {
                kind: "host file",
                id: node.path().to_string(),
            },
            _ => ProcvisorError::io(&path, e),
        })?;
        Ok(metadata_to_attr(&meta))
    }

    fn open(&self, node: &IoNode) -> Result<()> {
        let (path, _file) = self.open_file(node, node.open_flags())?;
        tracing::trace!(path = %path.display(), flags = node.open_flags(), "opened host file");
        Ok(())
    }

    fn read_line(&self, node: &IoNode) -> Result<String> {
        let content = self.read_all(node)?;
        let text = String::from_utf8_lossy(&content);
        Ok(text.lines().next().unwrap_or_default().to_string())
    }

    fn read_all(&self, node: &IoNode) -> Result<Vec<u8>> {
        let (path, mut file) = self.open_file(node, libc::O_RDONLY)?;
        let mut content = Vec::new();
        let _ = file
            .read_to_end(&mut content)
            .map_err(|e| ProcvisorError::io(&path, e))?;
        Ok(content)
    }

    fn read_at(&self, node: &IoNode, offset: u64, size: usize) -> Result<Vec<u8>> {
        let (path, file) = self.open_file(node, libc::O_RDONLY)?;
        let mut content = vec![0; size];
        let mut filled = 0;
        while filled < size {
            let at = offset.saturating_add(filled as u64);
            match file.read_at(&mut content[filled..], at) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(ProcvisorError::io(&path, e)),
            }
        }
        content.truncate(filled);
        Ok(content)
    }

    fn write(&self, node: &IoNode, data: &[u8]) -> Result<usize> {
        let (path, mut file) = self.open_file(node, libc::O_WRONLY)?;
        file.write(data).map_err(|e| ProcvisorError::io(&path, e))
    }

    fn read_dir(&self, node: &IoNode) -> Result<Vec<DirEntry>> {
        let path = self.host_path(node.path());
        let entries = std::fs::read_dir(&path).map_err(|e| ProcvisorError::io(&path, e))?;

        let mut listing = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ProcvisorError::io(&path, e))?;
            // Entries such as exited /proc/<pid> directories vanish between
            // readdir and stat.
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            listing.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                attr: metadata_to_attr(&meta),
            });
        }
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = u32::try_from(nsecs).unwrap_or(0);
    match u64::try_from(secs) {
        Ok(secs) => UNIX_EPOCH + Duration::new(secs, nanos),
        Err(_) => UNIX_EPOCH - Duration::new(secs.unsigned_abs(), 0),
    }
}

/// Translates host metadata into node attributes.
#[must_use]
pub fn metadata_to_attr(meta: &Metadata) -> NodeAttr {
    let file_type = meta.file_type();
    let kind = if file_type.is_dir() {
        NodeKind::Directory
    } else if file_type.is_symlink() {
        NodeKind::Symlink
    } else {
        // Character devices and FIFOs are served as plain files.
        NodeKind::File
    };

    NodeAttr {
        ino: meta.ino(),
        size: meta.size(),
        blocks: meta.blocks(),
        atime: system_time(meta.atime(), meta.atime_nsec()),
        mtime: system_time(meta.mtime(), meta.mtime_nsec()),
        ctime: system_time(meta.ctime(), meta.ctime_nsec()),
        kind,
        perm: u16::try_from(meta.mode() & 0o7777).unwrap_or(0),
        nlink: u32::try_from(meta.nlink()).unwrap_or(u32::MAX),
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: u32::try_from(meta.rdev()).unwrap_or(0),
        blksize: u32::try_from(meta.blksize()).unwrap_or(procvisor_common::constants::BLOCK_SIZE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with(path: &str, content: &str) -> (tempfile::TempDir, FileIo) {
        let dir = tempfile::tempdir().expect("tempdir");
        let io = FileIo::new(dir.path());
        let host = io.host_path(path);
        std::fs::create_dir_all(host.parent().expect("parent")).expect("mkdir");
        std::fs::write(&host, content).expect("write");
        (dir, io)
    }

    #[test]
    fn node_name_is_last_component() {
        let node = IoNode::new("/proc/sys/kernel/panic_on_oops");
        assert_eq!(node.name(), "panic_on_oops");
        assert_eq!(IoNode::new("/").name(), "/");
        assert_eq!(IoNode::new("/proc/sys/").name(), "sys");
    }

    #[test]
    fn access_mode_masks_other_flags() {
        let node = IoNode::new("/x").with_open_flags(libc::O_WRONLY | libc::O_TRUNC);
        assert_eq!(node.access_mode(), libc::O_WRONLY);
    }

    #[test]
    fn read_line_strips_terminator() {
        let (_dir, io) = host_with("/proc/sys/kernel/panic_on_oops", "0\n");
        let node = IoNode::new("/proc/sys/kernel/panic_on_oops");
        assert_eq!(io.read_line(&node).expect("read"), "0");
    }

    #[test]
    fn read_at_slices_and_signals_eof() {
        let (_dir, io) = host_with("/proc/cpuinfo", "processor\t: 0\n");
        let node = IoNode::new("/proc/cpuinfo");
        assert_eq!(io.read_at(&node, 0, 9).expect("read"), b"processor");
        assert_eq!(io.read_at(&node, 10, 100).expect("read"), b": 0\n");
        assert!(io.read_at(&node, 4096, 10).expect("read").is_empty());
    }

    #[test]
    fn write_replaces_content_in_one_call() {
        let (_dir, io) = host_with("/proc/sys/kernel/panic", "0\n");
        let node = IoNode::new("/proc/sys/kernel/panic");
        assert_eq!(io.write(&node, b"30").expect("write"), 2);
        assert_eq!(io.read_line(&node).expect("read"), "30");
    }

    #[test]
    fn read_at_serves_chunks_past_the_first_page() {
        let content: String = (0..2000).map(|i| format!("{i:05}\n")).collect();
        let (_dir, io) = host_with("/proc/kallsyms", &content);
        let node = IoNode::new("/proc/kallsyms");
        assert_eq!(io.read_at(&node, 6 * 1500, 12).expect("read"), b"01500\n01501\n");
        let tail = io.read_at(&node, 6 * 1999, 4096).expect("read");
        assert_eq!(tail, b"01999\n");
    }

    #[test]
    fn stat_missing_file_maps_to_enoent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let io = FileIo::new(dir.path());
        let err = io.stat(&IoNode::new("/proc/none")).expect_err("missing");
        assert!(matches!(err, ProcvisorError::NotFound { .. }));
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn read_of_missing_file_maps_to_eio() {
        let dir = tempfile::tempdir().expect("tempdir");
        let io = FileIo::new(dir.path());
        let err = io.read_all(&IoNode::new("/proc/none")).expect_err("missing");
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn stat_reports_symlinks_without_following_them() {
        let (_dir, io) = host_with("/proc/1/status", "Name:\tinit\n");
        std::os::unix::fs::symlink("1", io.host_path("/proc/self")).expect("symlink");

        let attr = io.stat(&IoNode::new("/proc/self")).expect("stat");
        assert_eq!(attr.kind, NodeKind::Symlink);
        let entries = io.read_dir(&IoNode::new("/proc")).expect("readdir");
        let listed = entries.iter().find(|e| e.name == "self").expect("self");
        assert_eq!(listed.attr.kind, NodeKind::Symlink);
    }

    #[test]
    fn read_dir_lists_sorted_entries() {
        let (_dir, io) = host_with("/proc/sys/kernel/panic", "0\n");
        std::fs::write(io.host_path("/proc/sys/kernel/ostype"), "Linux\n").expect("write");
        std::fs::create_dir_all(io.host_path("/proc/sys/kernel/random")).expect("mkdir");

        let entries = io.read_dir(&IoNode::new("/proc/sys/kernel")).expect("readdir");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["ostype", "panic", "random"]);
        assert!(entries[2].attr.is_dir());
    }

    #[test]
    fn open_honours_access_mode() {
        let (_dir, io) = host_with("/proc/sys/kernel/panic", "0\n");
        let path = io.host_path("/proc/sys/kernel/panic");
        let mut perms = std::fs::metadata(&path).expect("stat").permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o444);
        std::fs::set_permissions(&path, perms).expect("chmod");

        let reader = IoNode::new("/proc/sys/kernel/panic");
        io.open(&reader).expect("read-only open");
        if !nix::unistd::geteuid().is_root() {
            let writer = reader.with_open_flags(libc::O_WRONLY);
            assert!(io.open(&writer).is_err());
        }
    }
}
