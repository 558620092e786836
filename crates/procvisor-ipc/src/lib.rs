//! # procvisor-ipc
//!
//! Executes privileged operations inside a container's namespaces.
//!
//! - [`protocol`]: tagged JSON messages and a reassembling stream decoder.
//! - [`event`]: one in-flight transaction and the helper process serving it.
//! - [`service`]: the supervisor side, forking one helper per request.
//! - [`helper`]: the helper side, joining namespaces and performing the call.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod event;
pub mod helper;
pub mod protocol;
pub mod service;
