//! Low-rank adapter configuration and injection.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use phenex_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use vassago::CausalModel;

/// The fixed set of adapted projection modules: four attention
/// projections, three MLP projections, and the output head.
pub const TARGET_MODULES: [&str; 8] = [
    "q_proj",
    "k_proj",
    "v_proj",
    "o_proj",
    "gate_proj",
    "up_proj",
    "down_proj",
    "lm_head",
];

/// Bias training strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterBias {
    /// Don't train any bias.
    None,
    /// Train all biases.
    All,
    /// Train only adapter biases.
    LoraOnly,
}

/// Task type the adapter is trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Causal language modeling.
    CausalLm,
}

/// Configuration for low-rank adaptation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Rank of the adaptation matrices.
    pub r: usize,
    /// Scaling factor (alpha).
    pub lora_alpha: f32,
    /// Dropout probability on adapter inputs.
    pub lora_dropout: f32,
    /// Bias strategy.
    pub bias: AdapterBias,
    /// Task type.
    pub task_type: TaskType,
    /// Target modules to adapt.
    pub target_modules: Vec<String>,
}

impl AdapterConfig {
    /// Creates a configuration with the fixed alpha and target list.
    ///
    /// Rank and dropout come from run configuration; everything else is
    /// pinned: alpha 128, no bias adaptation, causal-LM task, the eight
    /// target modules.
    #[must_use]
    pub fn new(r: usize, dropout: f32) -> Self {
        Self {
            r,
            lora_alpha: 128.0,
            lora_dropout: dropout,
            bias: AdapterBias::None,
            task_type: TaskType::CausalLm,
            target_modules: TARGET_MODULES.iter().map(|m| (*m).to_string()).collect(),
        }
    }

    /// Returns the effective scaling factor (alpha / r).
    #[must_use]
    pub fn scaling(&self) -> f64 {
        f64::from(self.lora_alpha) / self.r as f64
    }
}

/// A trainable low-rank adapter pair for one projection module.
pub struct LoraLayer {
    /// Adapted module name.
    pub name: String,
    /// Down-projection matrix, shape (r, in_features). Gaussian init.
    pub a: Var,
    /// Up-projection matrix, shape (out_features, r). Zero init.
    pub b: Var,
    in_features: usize,
    out_features: usize,
}

impl LoraLayer {
    /// Creates a new adapter pair for a module with the given dimensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensors cannot be allocated.
    pub fn new(
        name: impl Into<String>,
        in_features: usize,
        out_features: usize,
        r: usize,
        device: &Device,
    ) -> Result<Self> {
        let a = Var::randn(0f32, 0.02f32, (r, in_features), device)?;
        let b = Var::zeros((out_features, r), DType::F32, device)?;

        Ok(Self {
            name: name.into(),
            a,
            b,
            in_features,
            out_features,
        })
    }

    /// Applies the adapter to a column input, shape (in_features, 1).
    ///
    /// Returns `scaling * B(Ax)`, shape (out_features, 1).
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch.
    pub fn forward(&self, x: &Tensor, scaling: f64) -> Result<Tensor> {
        let down = self.a.matmul(x)?;
        let up = self.b.matmul(&down)?;
        Ok(up.affine(scaling, 0.0)?)
    }

    /// Returns the adapter input dimension.
    #[must_use]
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Returns the adapter output dimension.
    #[must_use]
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Returns the number of trainable parameters.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        let r = self.a.dims()[0];
        r * (self.in_features + self.out_features)
    }
}

/// A base model augmented with trainable low-rank adapters.
///
/// The base weights stay frozen; the adapter tensors are the only
/// trainable parameters.
pub struct AdaptedModel {
    base: CausalModel,
    config: AdapterConfig,
    layers: Vec<LoraLayer>,
}

impl AdaptedModel {
    /// Injects adapters for every target module of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a target module has no known dimensions or a
    /// tensor cannot be allocated.
    pub fn attach(base: CausalModel, config: AdapterConfig) -> Result<Self> {
        let mut layers = Vec::with_capacity(config.target_modules.len());

        for module in &config.target_modules {
            let (in_features, out_features) =
                base.config().module_dims(module).ok_or_else(|| {
                    Error::training(format!("Unknown target module: {module}"))
                })?;

            layers.push(LoraLayer::new(
                module.clone(),
                in_features,
                out_features,
                config.r,
                base.device(),
            )?);
        }

        info!(
            adapters = layers.len(),
            r = config.r,
            alpha = config.lora_alpha,
            "Injected low-rank adapters"
        );

        Ok(Self {
            base,
            config,
            layers,
        })
    }

    /// Returns the frozen base model.
    #[must_use]
    pub fn base(&self) -> &CausalModel {
        &self.base
    }

    /// Returns the adapter configuration.
    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Returns the adapter layers.
    #[must_use]
    pub fn layers(&self) -> &[LoraLayer] {
        &self.layers
    }

    /// Returns the total number of trainable parameters.
    #[must_use]
    pub fn trainable_parameters(&self) -> usize {
        self.layers.iter().map(LoraLayer::num_parameters).sum()
    }

    /// Saves adapter weights and configuration under a directory.
    ///
    /// Writes `adapter_model.safetensors` with one A/B tensor pair per
    /// module, and `adapter_config.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or files cannot be written.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let mut tensors: HashMap<String, Tensor> = HashMap::new();
        for layer in &self.layers {
            tensors.insert(format!("{}.lora_a.weight", layer.name), layer.a.as_tensor().clone());
            tensors.insert(format!("{}.lora_b.weight", layer.name), layer.b.as_tensor().clone());
        }

        let weights_path = dir.join("adapter_model.safetensors");
        candle_core::safetensors::save(&tensors, &weights_path)?;

        let config_path = dir.join("adapter_config.json");
        std::fs::write(&config_path, serde_json::to_string_pretty(&self.config)?)?;

        info!(dir = %dir.display(), "Saved adapter");
        Ok(())
    }
}
