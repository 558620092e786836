//! Kernel binding through `fuser`.
//!
//! Each callback captures the caller's credentials, then hands the request
//! to the blocking pool so a slow helper round trip does not stall the
//! session loop. Files are opened in direct-I/O mode: content is computed
//! per caller and must never be served from the page cache.

use std::ffi::{OsStr, c_int};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use procvisor_common::config::MountConfig;
use procvisor_common::constants::ATTR_TTL_SECS;
use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::{NodeAttr, NodeKind};
use tokio::runtime::Handle;

use crate::adapter::{AttrChange, Caller, FsService};

const TTL: Duration = Duration::from_secs(ATTR_TTL_SECS);

const fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::File => FileType::RegularFile,
        NodeKind::Directory => FileType::Directory,
        NodeKind::Symlink => FileType::Symlink,
    }
}

/// Converts adapter attributes into the kernel's representation.
#[must_use]
pub const fn to_file_attr(attr: &NodeAttr) -> FileAttr {
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        flags: 0,
        blksize: attr.blksize,
    }
}

fn caller(req: &Request<'_>) -> Caller {
    Caller {
        pid: req.pid(),
        uid: req.uid(),
        gid: req.gid(),
    }
}

/// `fuser` filesystem forwarding to an [`FsService`].
#[derive(Debug)]
pub struct ProcvisorFs {
    service: Arc<FsService>,
    runtime: Handle,
}

impl ProcvisorFs {
    /// Creates the binding; requests run on `runtime`'s blocking pool.
    #[must_use]
    pub const fn new(service: Arc<FsService>, runtime: Handle) -> Self {
        Self { service, runtime }
    }

    fn dispatch<F>(&self, job: F)
    where
        F: FnOnce(&FsService) + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let _ = self.runtime.spawn_blocking(move || job(&service));
    }
}

impl Filesystem for ProcvisorFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> std::result::Result<(), c_int> {
        tracing::info!("filesystem session started");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("filesystem session ended");
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let caller = caller(req);
        let name = name.to_string_lossy().into_owned();
        self.dispatch(move |fs| match fs.lookup(caller, parent, &name) {
            Ok((_, attr)) => reply.entry(&TTL, &to_file_attr(&attr), 0),
            Err(errno) => reply.error(errno),
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.service.forget(ino, nlookup);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let caller = caller(req);
        self.dispatch(move |fs| match fs.getattr(caller, ino) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
            Err(errno) => reply.error(errno),
        });
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let caller = caller(req);
        let change = AttrChange {
            mode,
            uid,
            gid,
            size,
        };
        self.dispatch(move |fs| match fs.setattr(caller, ino, change) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
            Err(errno) => reply.error(errno),
        });
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let caller = caller(req);
        self.dispatch(move |fs| match fs.open(caller, ino, flags) {
            Ok(fh) => reply.opened(fh, fuser::consts::FOPEN_DIRECT_IO),
            Err(errno) => reply.error(errno),
        });
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let caller = caller(req);
        self.dispatch(move |fs| match fs.read(caller, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        });
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let caller = caller(req);
        let data = data.to_vec();
        self.dispatch(move |fs| match fs.write(caller, fh, &data) {
            Ok(written) => reply.written(written),
            Err(errno) => reply.error(errno),
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.dispatch(move |fs| match fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let caller = caller(req);
        self.dispatch(move |fs| {
            let Ok(skip) = usize::try_from(offset) else {
                reply.error(libc::EINVAL);
                return;
            };
            let entries = match fs.readdir(caller, ino) {
                Ok(entries) => entries,
                Err(errno) => {
                    reply.error(errno);
                    return;
                }
            };
            for (idx, entry) in entries.into_iter().enumerate().skip(skip) {
                let next = i64::try_from(idx + 1).unwrap_or(i64::MAX);
                if reply.add(entry.ino, next, file_type(entry.kind), &entry.name) {
                    break;
                }
            }
            reply.ok();
        });
    }
}

/// Mounts the filesystem at `mountpoint` in the background. The mount lasts
/// until the returned session is dropped.
///
/// # Errors
///
/// Returns [`ProcvisorError::Io`] if the kernel refuses the mount.
pub fn mount(
    service: Arc<FsService>,
    runtime: Handle,
    mountpoint: &Path,
    config: &MountConfig,
) -> Result<fuser::BackgroundSession> {
    let mut options = vec![
        MountOption::FSName(config.fs_name.clone()),
        MountOption::AutoUnmount,
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }

    let fs = ProcvisorFs::new(service, runtime);
    let session = fuser::spawn_mount2(fs, mountpoint, &options)
        .map_err(|e| ProcvisorError::io(mountpoint, e))?;
    tracing::info!(
        mountpoint = %mountpoint.display(),
        fs_name = %config.fs_name,
        allow_other = config.allow_other,
        "filesystem mounted"
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;

    #[test]
    fn attributes_keep_kind_and_ownership() {
        let attr = NodeAttr {
            ino: 7,
            size: 2,
            blocks: 1,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            kind: NodeKind::Directory,
            perm: 0o555,
            nlink: 2,
            uid: 1000,
            gid: 100,
            rdev: 0,
            blksize: 4096,
        };
        let converted = to_file_attr(&attr);
        assert_eq!(converted.ino, 7);
        assert_eq!(converted.kind, FileType::Directory);
        assert_eq!(converted.perm, 0o555);
        assert_eq!((converted.uid, converted.gid), (1000, 100));
        assert_eq!(converted.crtime, UNIX_EPOCH);
    }
}
