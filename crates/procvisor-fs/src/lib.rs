//! # procvisor-fs
//!
//! The filesystem-protocol boundary of procvisor.
//!
//! - [`node`]: inode ↔ path table of the nodes the kernel knows about.
//! - [`adapter`]: translates filesystem requests into handler calls and
//!   handler errors into POSIX error numbers.
//! - [`fuse`]: binds the adapter to the kernel through `fuser`.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod adapter;
pub mod fuse;
pub mod node;
