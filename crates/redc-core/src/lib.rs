//! Shared primitives for the redc workspace.
//!
//! - [`DynValue`]: tagged union for values decoded from provisioning outputs
//!   and pricing metadata, with typed accessors.
//! - [`time`]: panic-free wall clock helpers.
//!
//! # Tiger Style
//!
//! - No `.expect()` or `.unwrap()` outside tests
//! - Accessors fail with a typed error instead of coercing

#![warn(missing_docs)]

pub mod time;
pub mod value;

pub use time::current_time_ms;
pub use time::format_timestamp;
pub use value::DynValue;
pub use value::ValueError;
