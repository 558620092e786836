//! Namespace-entering helper.
//!
//! Runs in a short-lived child process: reads one request from stdin, joins
//! the target's namespaces, adopts the caller's credentials, performs the
//! operation, and writes one response to stdout.

use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{OFlag, open};
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sys::stat::Mode;
use nix::unistd::{Gid, Uid, chown, truncate};
use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::NamespaceSet;
use procvisor_core::capability::{self, Capability};
use procvisor_core::namespace;
use procvisor_core::sysio::{FileIo, HostIo, IoNode, metadata_to_attr};

use crate::protocol::{
    Decoder, Message, MessageHeader, MountPayload, OpenFilePayload, ReadDirReply,
    ReadFilePayload, ReadFileReply, SetAttrPayload, UmountPayload, WriteFilePayload,
    WriteFileReply,
};

/// Target context a helper was started for.
#[derive(Debug, Clone)]
pub struct HelperContext {
    /// Process whose namespaces are joined.
    pub pid: u32,
    /// Namespaces to join.
    pub namespaces: NamespaceSet,
    /// Procfs the namespace handles are opened from.
    pub proc_root: PathBuf,
}

impl HelperContext {
    /// Context for `pid` using the host's `/proc`.
    #[must_use]
    pub fn new(pid: u32, namespaces: NamespaceSet) -> Self {
        Self {
            pid,
            namespaces,
            proc_root: PathBuf::from(procvisor_common::constants::PROC_ROOT),
        }
    }
}

/// Serves one request.
///
/// # Errors
///
/// Returns an error, without writing anything, when the request cannot be
/// read or the namespace context cannot be established; the caller exits
/// non-zero. Failures of the operation itself are replied as `errorResponse`.
pub fn run(ctx: &HelperContext, mut input: impl Read, mut output: impl Write) -> Result<()> {
    let mut raw = Vec::new();
    let _ = input
        .read_to_end(&mut raw)
        .map_err(|e| ProcvisorError::io("<stdin>", e))?;
    let mut decoder = Decoder::new();
    decoder.feed(&raw);
    let request = decoder
        .next_message()?
        .ok_or_else(|| ProcvisorError::transport("incomplete request"))?;

    namespace::enter_namespaces(&ctx.proc_root, ctx.pid, &ctx.namespaces)?;

    let response = match request.header().map(apply_header).transpose() {
        Ok(_) => process_request(&request),
        Err(e) => Message::errno_error(remote_errno(&e), e.to_string()),
    };
    tracing::debug!(
        pid = ctx.pid,
        request = request.name(),
        response = response.name(),
        "helper served request"
    );

    output
        .write_all(&response.encode()?)
        .and_then(|()| output.flush())
        .map_err(|e| ProcvisorError::io("<stdout>", e))
}

fn apply_header(header: &MessageHeader) -> Result<()> {
    capability::switch_fs_credentials(header.uid, header.gid)?;

    let mut raise = Vec::new();
    if header.cap_dac_read {
        raise.push(Capability::DacReadSearch);
    }
    if header.cap_dac_override {
        raise.push(Capability::DacOverride);
    }
    if !raise.is_empty() {
        capability::set_effective(&raise, true)?;
    }
    Ok(())
}

/// Errno reported back to the supervisor for a failed operation.
fn remote_errno(err: &ProcvisorError) -> i32 {
    match err {
        ProcvisorError::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
        other => other.errno(),
    }
}

fn nix_failure(op: &str, path: &str, errno: nix::Error) -> ProcvisorError {
    ProcvisorError::Errno {
        errno: errno as i32,
        message: format!("{op} {path}: {errno}"),
    }
}

/// Performs the operation a request describes in the current namespaces.
#[must_use]
pub fn process_request(request: &Message) -> Message {
    let outcome = match request {
        Message::LookupRequest(p) => lookup(&p.entry),
        Message::OpenFileRequest(p) => open_file(p),
        Message::ReadFileRequest(p) => read_file(p),
        Message::WriteFileRequest(p) => write_file(p),
        Message::ReadDirRequest(p) => FileIo::default()
            .read_dir(&IoNode::new(p.dir.as_str()))
            .map(|entries| Message::ReadDirResponse(ReadDirReply { entries })),
        Message::SetAttrRequest(p) => set_attr(p),
        Message::MountSyscallRequest(p) => mount_fs(p),
        Message::UmountSyscallRequest(p) => umount_fs(p),
        other => Err(ProcvisorError::invalid(format!(
            "{} is not a request",
            other.name()
        ))),
    };
    outcome.unwrap_or_else(|e| Message::errno_error(remote_errno(&e), e.to_string()))
}

fn lookup(entry: &str) -> Result<Message> {
    let meta = std::fs::symlink_metadata(entry).map_err(|e| ProcvisorError::io(entry, e))?;
    Ok(Message::LookupResponse(metadata_to_attr(&meta)))
}

fn open_file(p: &OpenFilePayload) -> Result<Message> {
    let flags = OFlag::from_bits_truncate(p.flags) | OFlag::O_CLOEXEC;
    let _fd = open(Path::new(&p.file), flags, Mode::from_bits_truncate(p.mode))
        .map_err(|e| nix_failure("open", &p.file, e))?;
    Ok(Message::OpenFileResponse)
}

fn read_file(p: &ReadFilePayload) -> Result<Message> {
    let content = FileIo::default().read_at(&IoNode::new(p.file.as_str()), p.offset, p.size)?;
    Ok(Message::ReadFileResponse(ReadFileReply { content }))
}

fn write_file(p: &WriteFilePayload) -> Result<Message> {
    let written = FileIo::default().write(&IoNode::new(p.file.as_str()), &p.content)?;
    Ok(Message::WriteFileResponse(WriteFileReply { written }))
}

fn set_attr(p: &SetAttrPayload) -> Result<Message> {
    let path = Path::new(&p.file);
    if let Some(mode) = p.mode {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| ProcvisorError::io(path, e))?;
    }
    if p.uid.is_some() || p.gid.is_some() {
        chown(path, p.uid.map(Uid::from_raw), p.gid.map(Gid::from_raw))
            .map_err(|e| nix_failure("chown", &p.file, e))?;
    }
    if let Some(size) = p.size {
        let size = libc::off_t::try_from(size)
            .map_err(|_| ProcvisorError::invalid(format!("size {size} out of range")))?;
        truncate(path, size).map_err(|e| nix_failure("truncate", &p.file, e))?;
    }
    Ok(Message::SetAttrResponse)
}

fn mount_fs(p: &MountPayload) -> Result<Message> {
    let data = (!p.data.is_empty()).then_some(p.data.as_str());
    mount(
        Some(p.source.as_str()),
        p.target.as_str(),
        Some(p.fstype.as_str()),
        MsFlags::from_bits_truncate(p.flags),
        data,
    )
    .map_err(|e| nix_failure("mount", &p.target, e))?;
    Ok(Message::MountSyscallResponse)
}

fn umount_fs(p: &UmountPayload) -> Result<Message> {
    umount2(p.target.as_str(), MntFlags::from_bits_truncate(p.flags))
        .map_err(|e| nix_failure("umount", &p.target, e))?;
    Ok(Message::UmountSyscallResponse)
}
