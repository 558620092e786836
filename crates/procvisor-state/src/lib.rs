//! Container identity and per-resource state for procvisor.
//!
//! A container is known by the inode of its pid namespace. Each record
//! caches the container-local values of virtualized resources, keyed by
//! `(path, field)`, for as long as the container is registered.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod store;
