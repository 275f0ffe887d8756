//! # Vassago
//!
//! *"The Prince discovers things hidden and lost"*
//!
//! Vassago resolves and loads the artifacts a fine-tuning run needs:
//! base model weights under a quantization policy, the model
//! configuration, and a tokenizer configured for causal-LM training.
//!
//! ## Features
//!
//! - **Hub Resolution**: HuggingFace Hub download with sharded
//!   safetensors support, or local paths
//! - **Quantized Loading**: weights held at the policy's compute dtype
//!   with the storage policy recorded on the model
//! - **Training Tokenizer**: padding token aliased to EOS, right-side
//!   padding

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod loader;
pub mod model;
pub mod tokenizer;

pub use loader::{ModelFiles, ModelLoader, WeightFiles};
pub use model::{CausalModel, ModelConfig};
pub use tokenizer::{PaddingSide, Tokenizer};
