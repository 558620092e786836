//! # procvisor-common
//!
//! Error type, configuration model, constants, and the plain data types
//! (namespace sets, node attributes) exchanged between procvisor crates.
//!
//! Depends on no other procvisor crate.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
