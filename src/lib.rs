//! A hierarchical test execution engine in Rust.
//!
//! Canopy runs a tree of test descriptors, giving each node a fixed
//! lifecycle and scheduling siblings in parallel where their declared
//! exclusive resources allow it.

pub use canopy_core::{LOG_FILTER, LOG_FORMAT, LOG_LEVEL, TracingFormat, TracingSetup};
pub use canopy_engine::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use canopy_core::{TracingFormat, TracingSetup};
    pub use canopy_engine::prelude::*;
}
