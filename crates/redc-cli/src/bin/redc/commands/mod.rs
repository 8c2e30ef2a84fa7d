//! Command implementations.

pub mod compose;
pub mod cost;
