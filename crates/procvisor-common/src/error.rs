//! Unified error types for the procvisor workspace.
//!
//! Every failure path inside the dispatch engine ends up as a
//! [`ProcvisorError`]; the filesystem adapter turns it into a POSIX error
//! number through [`ProcvisorError::errno`].

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ProcvisorError {
    /// An I/O operation against the host failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The pid-namespace of the requesting process could not be resolved.
    #[error("could not identify pid-namespace inode of pid {pid}")]
    PidNsUnresolved {
        /// Requesting process.
        pid: u32,
    },

    /// No container is registered for the requesting process.
    #[error("container not found for pid {pid}")]
    ContainerNotFound {
        /// Requesting process.
        pid: u32,
    },

    /// Malformed or out-of-range content.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the rejected value.
        message: String,
    },

    /// The requested access mode is not supported by the resource.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// The operation itself is not permitted (e.g. attribute changes).
    #[error("operation not permitted: {message}")]
    NotPermitted {
        /// Description of the rejected operation.
        message: String,
    },

    /// The resource does not implement the operation.
    #[error("operation not supported: {message}")]
    Unsupported {
        /// Description of the unsupported operation.
        message: String,
    },

    /// The namespace-entering channel failed (helper crash, timeout,
    /// truncated or unparseable message).
    #[error("transport failure: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// An operation executed inside a container's namespaces failed with
    /// the given errno.
    #[error("remote operation failed (errno {errno}): {message}")]
    Errno {
        /// POSIX error number reported by the helper.
        errno: i32,
        /// Description reported by the helper.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl ProcvisorError {
    /// Builds an [`ProcvisorError::InvalidArgument`] from any message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Builds a [`ProcvisorError::Transport`] from any message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Builds a [`ProcvisorError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Maps the error onto the POSIX error number returned to the
    /// filesystem protocol layer.
    ///
    /// Host I/O failures collapse to `EIO`. A missing file surfaces as
    /// `ENOENT` only where the host stat reports it as
    /// [`ProcvisorError::NotFound`].
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound { .. } => libc::ENOENT,
            Self::InvalidArgument { .. } => libc::EINVAL,
            Self::PermissionDenied { .. } => libc::EACCES,
            Self::NotPermitted { .. } => libc::EPERM,
            Self::Unsupported { .. } => libc::ENOTSUP,
            Self::Errno { errno, .. } => *errno,
            Self::Io { .. }
            | Self::Config { .. }
            | Self::PidNsUnresolved { .. }
            | Self::ContainerNotFound { .. }
            | Self::Transport { .. }
            | Self::Serialization { .. } => libc::EIO,
        }
    }

    /// Returns true for failures of the namespace-entering channel.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ProcvisorError>;
