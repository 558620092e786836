//! System-wide constants and default paths.

/// Application name used in log output and the FUSE `fsname`.
pub const APP_NAME: &str = "procvisor";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "procvisor";

/// Hidden subcommand that turns the binary into a namespace-entering helper.
pub const NSENTER_SUBCOMMAND: &str = "nsenter";

/// Host directory mirrored by the filesystem.
pub const DEFAULT_HOST_ROOT: &str = "/";

/// Procfs mount point consulted for per-process namespace handles.
pub const PROC_ROOT: &str = "/proc";

/// Default upper bound for one helper round trip, in milliseconds.
pub const DEFAULT_NSENTER_TIMEOUT_MS: u64 = 5_000;

/// Attribute and entry cache validity handed to the kernel, in seconds.
///
/// Pseudo-file attributes change under our feet, so this stays short.
pub const ATTR_TTL_SECS: u64 = 1;

/// Block size reported for every node.
pub const BLOCK_SIZE: u32 = 4096;

/// Largest single read served for a pass-through resource.
pub const MAX_READ_SIZE: usize = 1 << 20;
