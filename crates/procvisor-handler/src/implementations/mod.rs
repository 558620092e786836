//! Shipped handler families.

pub mod common;
pub mod hidden;
pub mod integer_knob;
pub mod namespaced;
