//! # procvisor-core
//!
//! Low-level Linux primitives for the procvisor supervisor and its helpers.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: joining a target process's namespaces via `setns(2)` and
//!   resolving the pid-namespace inode that identifies a container.
//! - **Capabilities**: switching filesystem credentials and toggling the
//!   DAC-bypass capabilities a helper runs with.
//! - **Host I/O**: unbuffered access to the real `/proc` and `/sys` files.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod namespace;
pub mod sysio;
