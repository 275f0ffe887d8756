//! # Phenex Core
//!
//! Core types and errors shared across the Phenex fine-tuning pipeline.
//!
//! This crate provides the foundational abstractions used by all Phenex
//! components:
//! - Common error types
//! - Model source and device descriptors
//! - The quantization policy applied at model load
//! - The persisted run summary record

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    ComputeDtype, DeviceType, ModelSource, QuantVariant, QuantizationPolicy, RunSummary,
};
