//! Quantized causal language model loading.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use phenex_core::{ComputeDtype, Error, QuantizationPolicy, Result};
use tracing::{debug, info};

use crate::loader::ModelFiles;

/// Model configuration loaded from config.json.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ModelConfig {
    /// Model architecture type.
    #[serde(default)]
    pub model_type: Option<String>,

    /// Hidden size.
    #[serde(default)]
    pub hidden_size: Option<usize>,

    /// Intermediate size (FFN).
    #[serde(default)]
    pub intermediate_size: Option<usize>,

    /// Number of hidden layers.
    #[serde(default)]
    pub num_hidden_layers: Option<usize>,

    /// Number of attention heads.
    #[serde(default)]
    pub num_attention_heads: Option<usize>,

    /// Number of key-value heads (for GQA).
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,

    /// Vocabulary size.
    #[serde(default)]
    pub vocab_size: Option<usize>,

    /// Maximum position embeddings.
    #[serde(default)]
    pub max_position_embeddings: Option<usize>,

    /// Tensor-parallel degree used during pretraining.
    #[serde(default)]
    pub pretraining_tp: Option<u32>,

    /// Whether key/value caching is enabled.
    #[serde(default)]
    pub use_cache: Option<bool>,

    /// End of sentence token ID.
    #[serde(default)]
    pub eos_token_id: Option<u32>,
}

impl ModelConfig {
    /// Loads configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::model_load(format!("Failed to read config: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::model_load(format!("Failed to parse config: {e}")))
    }

    /// Returns the hidden dimension.
    #[must_use]
    pub fn hidden_size(&self) -> usize {
        self.hidden_size.unwrap_or(4096)
    }

    /// Returns the FFN intermediate dimension.
    #[must_use]
    pub fn intermediate_size(&self) -> usize {
        self.intermediate_size.unwrap_or(11008)
    }

    /// Returns the vocabulary size.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab_size.unwrap_or(32000)
    }

    /// Returns the number of attention heads.
    #[must_use]
    pub fn num_attention_heads(&self) -> usize {
        self.num_attention_heads.unwrap_or(32)
    }

    /// Returns the number of key-value heads.
    #[must_use]
    pub fn num_key_value_heads(&self) -> usize {
        self.num_key_value_heads
            .unwrap_or_else(|| self.num_attention_heads())
    }

    /// Returns the (input, output) dimensions of a projection module.
    ///
    /// Covers the attention projections, the MLP projections, and the
    /// output head of Llama-family decoders.
    #[must_use]
    pub fn module_dims(&self, module: &str) -> Option<(usize, usize)> {
        let hidden = self.hidden_size();
        let head_dim = hidden / self.num_attention_heads();
        let kv_dim = self.num_key_value_heads() * head_dim;

        match module {
            "q_proj" | "o_proj" => Some((hidden, hidden)),
            "k_proj" | "v_proj" => Some((hidden, kv_dim)),
            "gate_proj" | "up_proj" => Some((hidden, self.intermediate_size())),
            "down_proj" => Some((self.intermediate_size(), hidden)),
            "lm_head" => Some((hidden, self.vocab_size())),
            _ => None,
        }
    }
}

/// A causal language model loaded under a quantization policy.
///
/// Base weights are frozen plain tensors; the only mutation after load is
/// the k-bit training preparation, which recasts normalization layers.
pub struct CausalModel {
    config: ModelConfig,
    weights: HashMap<String, Tensor>,
    policy: QuantizationPolicy,
    device: Device,
    kbit_prepared: bool,
}

impl CausalModel {
    /// Loads a model from resolved files under the given policy.
    ///
    /// The tensor-parallel path is disabled (`pretraining_tp = 1`) and
    /// key/value caching is turned off to permit gradient-checkpointed
    /// training.
    ///
    /// # Errors
    ///
    /// Returns an error if the config or weights cannot be loaded.
    pub fn load(files: &ModelFiles, policy: QuantizationPolicy, device: &Device) -> Result<Self> {
        let mut config = ModelConfig::from_file(&files.config)?;
        config.pretraining_tp = Some(1);
        config.use_cache = Some(false);

        let dtype = compute_dtype(policy.compute_dtype);
        let mut weights = HashMap::new();
        for path in files.weights.paths() {
            debug!(path = %path.display(), "Loading weight file");
            let shard = candle_core::safetensors::load(path, device)?;
            for (name, tensor) in shard {
                weights.insert(name, tensor.to_dtype(dtype)?);
            }
        }

        info!(
            tensors = weights.len(),
            hidden = config.hidden_size(),
            vocab = config.vocab_size(),
            bits = policy.bits,
            "Loaded quantized base model"
        );

        Ok(Self {
            config,
            weights,
            policy,
            device: device.clone(),
            kbit_prepared: false,
        })
    }

    /// Creates a model from already-loaded parts.
    #[must_use]
    pub fn from_parts(
        config: ModelConfig,
        weights: HashMap<String, Tensor>,
        policy: QuantizationPolicy,
        device: Device,
    ) -> Self {
        let mut config = config;
        config.pretraining_tp = Some(1);
        config.use_cache = Some(false);

        Self {
            config,
            weights,
            policy,
            device,
            kbit_prepared: false,
        }
    }

    /// Prepares the quantized model for low-bit adapter training.
    ///
    /// Normalization layers are recast to full precision; everything else
    /// stays at the policy's compute dtype and remains frozen.
    ///
    /// # Errors
    ///
    /// Returns an error if a tensor cast fails.
    pub fn prepare_for_kbit_training(&mut self) -> Result<()> {
        let mut recast = 0usize;
        let names: Vec<String> = self
            .weights
            .keys()
            .filter(|name| name.contains("norm"))
            .cloned()
            .collect();

        for name in names {
            if let Some(tensor) = self.weights.remove(&name) {
                self.weights.insert(name, tensor.to_dtype(DType::F32)?);
                recast += 1;
            }
        }

        self.kbit_prepared = true;
        debug!(recast, "Prepared model for k-bit training");
        Ok(())
    }

    /// Returns the model configuration.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Returns the quantization policy the weights were loaded under.
    #[must_use]
    pub fn policy(&self) -> QuantizationPolicy {
        self.policy
    }

    /// Returns the compute device.
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns whether k-bit preparation has run.
    #[must_use]
    pub fn is_kbit_prepared(&self) -> bool {
        self.kbit_prepared
    }

    /// Returns a named weight tensor, if present.
    #[must_use]
    pub fn weight(&self, name: &str) -> Option<&Tensor> {
        self.weights.get(name)
    }

    /// Returns the first weight belonging to a projection module, by name
    /// suffix. Lookup is deterministic (lowest full name wins).
    #[must_use]
    pub fn module_weight(&self, module: &str) -> Option<&Tensor> {
        let suffix = format!("{module}.weight");
        self.weights
            .iter()
            .filter(|(name, _)| name.ends_with(&suffix))
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, tensor)| tensor)
    }

    /// Returns the token embedding matrix, if present.
    #[must_use]
    pub fn embedding(&self) -> Option<&Tensor> {
        self.weights
            .get("model.embed_tokens.weight")
            .or_else(|| self.weights.get("transformer.wte.weight"))
    }

    /// Returns the number of loaded tensors.
    #[must_use]
    pub fn num_tensors(&self) -> usize {
        self.weights.len()
    }
}

fn compute_dtype(dtype: ComputeDtype) -> DType {
    match dtype {
        ComputeDtype::Bf16 => DType::BF16,
        ComputeDtype::F16 => DType::F16,
        ComputeDtype::F32 => DType::F32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> ModelConfig {
        serde_json::from_str(
            r#"{
                "model_type": "llama",
                "hidden_size": 16,
                "intermediate_size": 32,
                "num_attention_heads": 4,
                "num_key_value_heads": 2,
                "vocab_size": 64
            }"#,
        )
        .unwrap()
    }

    fn tiny_model() -> CausalModel {
        let device = Device::Cpu;
        let mut weights = HashMap::new();
        weights.insert(
            "model.embed_tokens.weight".to_string(),
            Tensor::zeros((64, 16), DType::F32, &device).unwrap(),
        );
        weights.insert(
            "model.norm.weight".to_string(),
            Tensor::zeros(16, DType::BF16, &device).unwrap(),
        );

        CausalModel::from_parts(tiny_config(), weights, QuantizationPolicy::four_bit(), device)
    }

    #[test]
    fn test_load_disables_cache_and_tp() {
        let model = tiny_model();
        assert_eq!(model.config().pretraining_tp, Some(1));
        assert_eq!(model.config().use_cache, Some(false));
    }

    #[test]
    fn test_module_dims() {
        let config = tiny_config();
        assert_eq!(config.module_dims("q_proj"), Some((16, 16)));
        assert_eq!(config.module_dims("k_proj"), Some((16, 8)));
        assert_eq!(config.module_dims("gate_proj"), Some((16, 32)));
        assert_eq!(config.module_dims("down_proj"), Some((32, 16)));
        assert_eq!(config.module_dims("lm_head"), Some((16, 64)));
        assert_eq!(config.module_dims("unknown"), None);
    }

    #[test]
    fn test_kbit_preparation_recasts_norms() {
        let mut model = tiny_model();
        model.prepare_for_kbit_training().unwrap();

        assert!(model.is_kbit_prepared());
        let norm = model.weight("model.norm.weight").unwrap();
        assert_eq!(norm.dtype(), DType::F32);
    }
}
