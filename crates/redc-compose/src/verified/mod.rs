//! Pure decision logic for compose orchestration.
//!
//! # Tiger Style
//!
//! - No I/O, no async, no clocks
//! - Borrowed inputs only; callers own the service map
//! - Deterministic for a given input

pub mod naming;
pub mod placeholder;
pub mod scheduling;

pub use naming::expand_instances;
pub use naming::truncate_display;
pub use naming::InstanceName;
pub use placeholder::parse_output_ref;
pub use placeholder::OutputRef;
pub use scheduling::can_deploy;
pub use scheduling::can_destroy;
pub use scheduling::InstanceState;
