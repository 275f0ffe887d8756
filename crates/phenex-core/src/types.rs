//! Common types used across the Phenex pipeline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Source location for a model or dataset repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSource {
    /// HuggingFace Hub repository.
    HuggingFace {
        /// Repository ID (e.g., "meta-llama/Llama-2-7b-hf").
        repo_id: String,
        /// Optional revision (branch, tag, or commit).
        revision: Option<String>,
    },
    /// Local filesystem path.
    LocalPath {
        /// Path to the directory or file.
        path: PathBuf,
    },
}

impl ModelSource {
    /// Creates a HuggingFace source.
    #[must_use]
    pub fn huggingface(repo_id: impl Into<String>) -> Self {
        Self::HuggingFace {
            repo_id: repo_id.into(),
            revision: None,
        }
    }

    /// Creates a local path source.
    #[must_use]
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::LocalPath { path: path.into() }
    }

    /// Interprets an identifier string: an existing local path stays local,
    /// anything else is treated as a Hub repository ID.
    #[must_use]
    pub fn from_identifier(id: &str) -> Self {
        let path = Path::new(id);
        if path.exists() {
            Self::local(path)
        } else {
            Self::huggingface(id)
        }
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HuggingFace { repo_id, .. } => write!(f, "{repo_id}"),
            Self::LocalPath { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Device type for computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// CPU computation.
    Cpu,
    /// CUDA GPU computation.
    Cuda {
        /// GPU device index.
        device_id: usize,
    },
}

impl Default for DeviceType {
    fn default() -> Self {
        Self::Cpu
    }
}

/// Quantization variant for 4-bit storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantVariant {
    /// Normal-float 4-bit.
    Nf4,
    /// Plain 4-bit floating point.
    Fp4,
}

/// Compute dtype used alongside quantized storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDtype {
    /// Brain floating point (16-bit).
    Bf16,
    /// Half precision (16-bit).
    F16,
    /// Full precision (32-bit).
    F32,
}

/// Quantization policy applied when loading base model weights.
///
/// Immutable once constructed; the policy travels with the loaded model so
/// downstream stages can see how the weights were stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationPolicy {
    /// Storage bit width.
    pub bits: u8,
    /// Quantization variant.
    pub variant: QuantVariant,
    /// Whether quantization constants are themselves quantized.
    pub double_quant: bool,
    /// Working precision for compute.
    pub compute_dtype: ComputeDtype,
}

impl QuantizationPolicy {
    /// The 4-bit NF4 policy with double quantization and BF16 compute.
    #[must_use]
    pub fn four_bit() -> Self {
        Self {
            bits: 4,
            variant: QuantVariant::Nf4,
            double_quant: true,
            compute_dtype: ComputeDtype::Bf16,
        }
    }
}

impl Default for QuantizationPolicy {
    fn default() -> Self {
        Self::four_bit()
    }
}

/// Schema version for [`RunSummary`] records on disk.
pub const RUN_SUMMARY_VERSION: u32 = 1;

/// Persisted summary of a completed fine-tuning run.
///
/// Written as a self-describing JSON record with named fields and an
/// explicit version tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Record schema version.
    pub version: u32,
    /// Number of training epochs.
    pub epochs: usize,
    /// Adapter rank.
    pub lora_r: usize,
    /// Adapter dropout probability.
    pub dropout: f32,
    /// Final training loss.
    pub final_loss: f64,
}

impl RunSummary {
    /// Creates a summary for the current schema version.
    #[must_use]
    pub fn new(epochs: usize, lora_r: usize, dropout: f32, final_loss: f64) -> Self {
        Self {
            version: RUN_SUMMARY_VERSION,
            epochs,
            lora_r,
            dropout,
            final_loss,
        }
    }

    /// Writes the summary as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), data)?;
        Ok(())
    }

    /// Reads a summary back from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_bit_policy() {
        let policy = QuantizationPolicy::four_bit();
        assert_eq!(policy.bits, 4);
        assert_eq!(policy.variant, QuantVariant::Nf4);
        assert!(policy.double_quant);
        assert_eq!(policy.compute_dtype, ComputeDtype::Bf16);
    }

    #[test]
    fn test_model_source_display() {
        let source = ModelSource::huggingface("org/model");
        assert_eq!(source.to_string(), "org/model");
    }

    #[test]
    fn test_run_summary_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");

        let summary = RunSummary::new(1, 8, 0.05, 1.23);
        summary.write_json(&path).unwrap();

        let loaded = RunSummary::read_json(&path).unwrap();
        assert_eq!(loaded.version, RUN_SUMMARY_VERSION);
        assert_eq!(loaded.epochs, 1);
        assert_eq!(loaded.lora_r, 8);
        assert_eq!(loaded, summary);
    }

    #[test]
    fn test_run_summary_named_fields() {
        let summary = RunSummary::new(3, 64, 0.1, 0.87);
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["version"], 1);
        assert_eq!(json["epochs"], 3);
        assert_eq!(json["lora_r"], 64);
        assert_eq!(json["final_loss"], 0.87);
    }
}
