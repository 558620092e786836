//! # procvisor-handler
//!
//! Decides, per path, how an operation on the virtualized tree is served:
//! read through to the host, answered from a container-local cache, run
//! inside the caller's namespaces, or rejected.
//!
//! Handlers are built once at startup from a static table of
//! [`handler::HandlerSpec`] rows and looked up by path through
//! [`registry::HandlerService`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod context;
pub mod handler;
pub mod implementations;
pub mod registry;
