//! # Vapula
//!
//! *"The Duchess teaches all handicrafts and professions"*
//!
//! Vapula is the adaptation layer for the Phenex pipeline, providing
//! low-rank adapter injection and the supervised fine-tuning loop.
//!
//! ## Features
//!
//! - **LoRA**: low-rank adapters over a frozen quantized base
//! - **Sequence Packing**: fixed-length training windows from short records
//! - **NEFTune**: embedding-noise regularization
//! - **SFT Loop**: AdamW with cosine decay, warmup, clipping, and
//!   gradient accumulation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod packing;
pub mod trainer;

pub use adapter::{AdaptedModel, AdapterBias, AdapterConfig, LoraLayer, TaskType, TARGET_MODULES};
pub use packing::pack_sequences;
pub use trainer::{
    AdamW, DataLoader, LRScheduler, NullReport, OptimizerKind, SchedulerKind, SftTrainer,
    TrainerArgs, TrainerStats, TrainingReport,
};
