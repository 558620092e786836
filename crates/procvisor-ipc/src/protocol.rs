//! Wire protocol between the supervisor and namespace-entering helpers.
//!
//! Every message is a JSON object `{"type": <name>, "payload": {...}}`
//! terminated by a newline. Readers go through [`Decoder`], which tolerates
//! messages split across arbitrary read boundaries.

use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::{DirEntry, NodeAttr};
use serde::{Deserialize, Serialize};

/// Credentials and capabilities the helper adopts before operating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// Process the request is made on behalf of.
    pub pid: u32,
    /// Filesystem uid to adopt.
    pub uid: u32,
    /// Filesystem gid to adopt.
    pub gid: u32,
    /// Raise `CAP_DAC_READ_SEARCH`.
    pub cap_dac_read: bool,
    /// Raise `CAP_DAC_OVERRIDE`.
    pub cap_dac_override: bool,
}

impl MessageHeader {
    /// Header adopting the given credentials with no extra capabilities.
    #[must_use]
    pub const fn new(pid: u32, uid: u32, gid: u32) -> Self {
        Self {
            pid,
            uid,
            gid,
            cap_dac_read: false,
            cap_dac_override: false,
        }
    }
}

/// Payload of `lookupRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupPayload {
    /// Absolute path to stat.
    pub entry: String,
}

/// Payload of `openFileRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFilePayload {
    /// Credentials to operate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<MessageHeader>,
    /// Absolute path to open.
    pub file: String,
    /// `open(2)` flags.
    pub flags: i32,
    /// Creation mode.
    pub mode: u32,
}

/// Payload of `readFileRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFilePayload {
    /// Credentials to operate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<MessageHeader>,
    /// Absolute path to read.
    pub file: String,
    /// Byte offset to start at.
    pub offset: u64,
    /// Maximum number of bytes to return.
    pub size: usize,
}

/// Payload of `writeFileRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFilePayload {
    /// Credentials to operate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<MessageHeader>,
    /// Absolute path to write.
    pub file: String,
    /// Bytes to write with a single `write(2)`.
    pub content: Vec<u8>,
}

/// Payload of `readDirRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadDirPayload {
    /// Credentials to operate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<MessageHeader>,
    /// Absolute path of the directory.
    pub dir: String,
}

/// Payload of `setAttrRequest`; absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAttrPayload {
    /// Credentials to operate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<MessageHeader>,
    /// Absolute path to modify.
    pub file: String,
    /// New permission bits.
    #[serde(default)]
    pub mode: Option<u32>,
    /// New owner.
    #[serde(default)]
    pub uid: Option<u32>,
    /// New group.
    #[serde(default)]
    pub gid: Option<u32>,
    /// New length.
    #[serde(default)]
    pub size: Option<u64>,
}

/// Payload of `mountSyscallRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPayload {
    /// Credentials to operate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<MessageHeader>,
    /// Mount source.
    pub source: String,
    /// Mount point.
    pub target: String,
    /// Filesystem type.
    pub fstype: String,
    /// `MS_*` flags.
    pub flags: libc::c_ulong,
    /// Filesystem-specific options.
    pub data: String,
}

/// Payload of `umountSyscallRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmountPayload {
    /// Credentials to operate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<MessageHeader>,
    /// Mount point to detach.
    pub target: String,
    /// `MNT_*` flags.
    pub flags: libc::c_int,
}

/// Payload of `readFileResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFileReply {
    /// Bytes read; empty at end of file.
    pub content: Vec<u8>,
}

/// Payload of `writeFileResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFileReply {
    /// Bytes accepted by the kernel.
    pub written: usize,
}

/// Payload of `readDirResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadDirReply {
    /// Directory entries.
    pub entries: Vec<DirEntry>,
}

/// Origin of an `errorResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The channel itself failed; synthesized by the supervisor.
    Transport,
    /// The operation ran and the kernel refused it.
    Errno,
}

/// Payload of `errorResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Failure origin.
    pub kind: ErrorKind,
    /// POSIX error number.
    pub errno: i32,
    /// Human-readable description.
    pub message: String,
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Message {
    /// Stat a path.
    LookupRequest(LookupPayload),
    /// Attributes of the looked-up path.
    LookupResponse(NodeAttr),
    /// Open a file to check access.
    OpenFileRequest(OpenFilePayload),
    /// The open succeeded.
    OpenFileResponse,
    /// Read a byte range.
    ReadFileRequest(ReadFilePayload),
    /// Bytes read.
    ReadFileResponse(ReadFileReply),
    /// Write bytes.
    WriteFileRequest(WriteFilePayload),
    /// Bytes written.
    WriteFileResponse(WriteFileReply),
    /// List a directory.
    ReadDirRequest(ReadDirPayload),
    /// Directory listing.
    ReadDirResponse(ReadDirReply),
    /// Change mode, ownership, or size.
    SetAttrRequest(SetAttrPayload),
    /// The attribute change succeeded.
    SetAttrResponse,
    /// Perform `mount(2)`.
    MountSyscallRequest(MountPayload),
    /// The mount succeeded.
    MountSyscallResponse,
    /// Perform `umount2(2)`.
    UmountSyscallRequest(UmountPayload),
    /// The unmount succeeded.
    UmountSyscallResponse,
    /// The request failed.
    ErrorResponse(ErrorPayload),
}

impl Message {
    /// Synthesizes a transport failure response.
    #[must_use]
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self::ErrorResponse(ErrorPayload {
            kind: ErrorKind::Transport,
            errno: libc::EIO,
            message: message.into(),
        })
    }

    /// Builds the response for an operation the kernel refused.
    #[must_use]
    pub fn errno_error(errno: i32, message: impl Into<String>) -> Self {
        Self::ErrorResponse(ErrorPayload {
            kind: ErrorKind::Errno,
            errno,
            message: message.into(),
        })
    }

    /// Wire name of the variant.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LookupRequest(_) => "lookupRequest",
            Self::LookupResponse(_) => "lookupResponse",
            Self::OpenFileRequest(_) => "openFileRequest",
            Self::OpenFileResponse => "openFileResponse",
            Self::ReadFileRequest(_) => "readFileRequest",
            Self::ReadFileResponse(_) => "readFileResponse",
            Self::WriteFileRequest(_) => "writeFileRequest",
            Self::WriteFileResponse(_) => "writeFileResponse",
            Self::ReadDirRequest(_) => "readDirRequest",
            Self::ReadDirResponse(_) => "readDirResponse",
            Self::SetAttrRequest(_) => "setAttrRequest",
            Self::SetAttrResponse => "setAttrResponse",
            Self::MountSyscallRequest(_) => "mountSyscallRequest",
            Self::MountSyscallResponse => "mountSyscallResponse",
            Self::UmountSyscallRequest(_) => "umountSyscallRequest",
            Self::UmountSyscallResponse => "umountSyscallResponse",
            Self::ErrorResponse(_) => "errorResponse",
        }
    }

    /// Returns true for request variants.
    #[must_use]
    pub const fn is_request(&self) -> bool {
        matches!(
            self,
            Self::LookupRequest(_)
                | Self::OpenFileRequest(_)
                | Self::ReadFileRequest(_)
                | Self::WriteFileRequest(_)
                | Self::ReadDirRequest(_)
                | Self::SetAttrRequest(_)
                | Self::MountSyscallRequest(_)
                | Self::UmountSyscallRequest(_)
        )
    }

    /// Credentials header carried by a request, if any.
    #[must_use]
    pub const fn header(&self) -> Option<&MessageHeader> {
        match self {
            Self::OpenFileRequest(p) => p.header.as_ref(),
            Self::ReadFileRequest(p) => p.header.as_ref(),
            Self::WriteFileRequest(p) => p.header.as_ref(),
            Self::ReadDirRequest(p) => p.header.as_ref(),
            Self::SetAttrRequest(p) => p.header.as_ref(),
            Self::MountSyscallRequest(p) => p.header.as_ref(),
            Self::UmountSyscallRequest(p) => p.header.as_ref(),
            _ => None,
        }
    }

    /// Returns whether `self` is an acceptable response to `request`:
    /// its matching response variant or an error.
    #[must_use]
    pub const fn answers(&self, request: &Self) -> bool {
        matches!(
            (request, self),
            (_, Self::ErrorResponse(_))
                | (Self::LookupRequest(_), Self::LookupResponse(_))
                | (Self::OpenFileRequest(_), Self::OpenFileResponse)
                | (Self::ReadFileRequest(_), Self::ReadFileResponse(_))
                | (Self::WriteFileRequest(_), Self::WriteFileResponse(_))
                | (Self::ReadDirRequest(_), Self::ReadDirResponse(_))
                | (Self::SetAttrRequest(_), Self::SetAttrResponse)
                | (Self::MountSyscallRequest(_), Self::MountSyscallResponse)
                | (Self::UmountSyscallRequest(_), Self::UmountSyscallResponse)
        )
    }

    /// Turns an `errorResponse` into the matching [`ProcvisorError`] and
    /// passes every other message through.
    ///
    /// # Errors
    ///
    /// Returns [`ProcvisorError::Transport`] or [`ProcvisorError::Errno`]
    /// for error responses.
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::ErrorResponse(ErrorPayload {
                kind: ErrorKind::Transport,
                message,
                ..
            }) => Err(ProcvisorError::Transport { message }),
            Self::ErrorResponse(ErrorPayload {
                kind: ErrorKind::Errno,
                errno,
                message,
            }) => Err(ProcvisorError::Errno { errno, message }),
            other => Ok(other),
        }
    }

    /// Encodes the message as one newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Reassembling stream decoder.
///
/// Bytes are fed as they arrive; [`Decoder::next_message`] yields a message
/// once a complete one is buffered and keeps any bytes that follow it.
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: Vec<u8>,
}

impl Decoder {
    /// Creates an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Appends freshly read bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns true when nothing but whitespace is buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }

    /// Pops the next complete message.
    ///
    /// Returns `Ok(None)` while the buffered bytes are only a prefix of a
    /// message.
    ///
    /// # Errors
    ///
    /// Returns [`ProcvisorError::Serialization`] if the buffered bytes can
    /// never form a valid message.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Message>();
        match stream.next() {
            None => Ok(None),
            Some(Ok(message)) => {
                let consumed = stream.byte_offset();
                self.buffer = self.buffer.split_off(consumed);
                Ok(Some(message))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(e.into()),
        }
    }
}
