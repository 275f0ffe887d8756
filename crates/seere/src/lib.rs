//! # Seere
//!
//! *"The Prince reports faithfully and rides swiftly"*
//!
//! Seere provides run reporting for the Phenex pipeline: structured
//! logging initialization and the experiment-run tracker.
//!
//! Tracking is configured with an explicit [`TrackerConfig`] passed to the
//! client constructor; no process-wide environment state is mutated.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod logging;
pub mod tracker;

pub use logging::{init_logging, LogConfig};
pub use tracker::{LogModelMode, RunTracker, TrackerConfig};
