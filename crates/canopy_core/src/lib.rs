//! Ambient infrastructure for Canopy.
//!
//! This crate provides what a Canopy binary needs around the engine itself:
//!
//! - [`TracingSetup`] - Installs the `tracing` subscriber, from builder calls
//!   or from `canopy.log.*` configuration parameters
//! - [`TracingFormat`] - Pretty, compact or JSON output
//!
//! # Example
//!
//! ```
//! use canopy_core::TracingSetup;
//! use canopy_engine::config::ConfigurationParameters;
//!
//! let params = ConfigurationParameters::from_properties(
//!     "canopy.log.level=debug\ncanopy.log.format=compact\n",
//! )?;
//! TracingSetup::from_parameters(&params)?.init();
//! # Ok::<(), canopy_engine::config::ConfigError>(())
//! ```

mod tracing_setup;

pub use tracing_setup::{LOG_FILTER, LOG_FORMAT, LOG_LEVEL, TracingFormat, TracingSetup};
