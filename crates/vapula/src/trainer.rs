//! Supervised fine-tuning loop over a low-rank adapted model.

use std::collections::HashMap;
use std::path::PathBuf;

use candle_core::{DType, Tensor, Var};
use gremory::InstructionDataset;
use indicatif::{ProgressBar, ProgressStyle};
use phenex_core::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vassago::Tokenizer;

use crate::adapter::AdaptedModel;
use crate::packing::pack_sequences;

/// Optimizer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Paged AdamW with 32-bit optimizer states.
    PagedAdamw32bit,
}

/// Learning-rate schedule selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// Cosine decay with linear warmup.
    Cosine,
    /// Constant learning rate.
    Constant,
}

/// Hyperparameter bundle consumed by the trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerArgs {
    /// Output directory for run artifacts.
    pub output_dir: PathBuf,
    /// Directory for training logs.
    pub logging_dir: PathBuf,
    /// Number of training epochs.
    pub num_train_epochs: usize,
    /// Per-device batch size.
    pub per_device_train_batch_size: usize,
    /// Gradient accumulation steps.
    pub gradient_accumulation_steps: usize,
    /// Whether gradient checkpointing is enabled.
    pub gradient_checkpointing: bool,
    /// Optimizer selection.
    pub optim: OptimizerKind,
    /// Steps between metric logs.
    pub logging_steps: u64,
    /// Base learning rate.
    pub learning_rate: f64,
    /// BF16 numeric mode.
    pub bf16: bool,
    /// TF32 numeric mode.
    pub tf32: bool,
    /// Gradient-norm clipping threshold.
    pub max_grad_norm: f64,
    /// Fraction of total steps spent in linear warmup.
    pub warmup_ratio: f64,
    /// Learning-rate schedule.
    pub lr_scheduler_type: SchedulerKind,
    /// Maximum packed window length in tokens.
    pub max_seq_length: usize,
    /// Whether sequence packing is enabled.
    pub packing: bool,
    /// NEFTune embedding-noise strength (0 disables).
    pub neftune_noise_alpha: f64,
    /// Shuffle seed for epoch data ordering.
    pub seed: u64,
}

impl TrainerArgs {
    /// Creates the fixed hyperparameter bundle for an output directory and
    /// epoch budget.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, num_train_epochs: usize) -> Self {
        let output_dir = output_dir.into();
        let logging_dir = output_dir.join("logs");

        Self {
            output_dir,
            logging_dir,
            num_train_epochs,
            per_device_train_batch_size: 10,
            gradient_accumulation_steps: 2,
            gradient_checkpointing: true,
            optim: OptimizerKind::PagedAdamw32bit,
            logging_steps: 100,
            learning_rate: 2e-4,
            bf16: true,
            tf32: true,
            max_grad_norm: 0.3,
            warmup_ratio: 0.03,
            lr_scheduler_type: SchedulerKind::Cosine,
            max_seq_length: 2048,
            packing: true,
            neftune_noise_alpha: 0.0,
            seed: 42,
        }
    }
}

/// AdamW optimizer state for a single parameter.
struct AdamWState {
    /// First moment (mean of gradients).
    m: Tensor,
    /// Second moment (variance of gradients).
    v: Tensor,
    /// Step count.
    step: u64,
}

/// AdamW optimizer with 32-bit states and decoupled weight decay.
pub struct AdamW {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
    states: HashMap<String, AdamWState>,
}

impl AdamW {
    /// Creates a new AdamW optimizer.
    #[must_use]
    pub fn new(lr: f64, weight_decay: f64) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay,
            states: HashMap::new(),
        }
    }

    /// Sets the learning rate.
    pub fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    /// Applies a single optimization step to a parameter in place.
    ///
    /// # Errors
    ///
    /// Returns an error if a tensor operation fails.
    pub fn step(&mut self, name: &str, param: &Var, grad: &Tensor) -> Result<()> {
        let device = param.device();
        let dtype = param.dtype();

        if !self.states.contains_key(name) {
            let m = Tensor::zeros(param.shape(), dtype, device)?;
            let v = Tensor::zeros(param.shape(), dtype, device)?;
            self.states
                .insert(name.to_string(), AdamWState { m, v, step: 0 });
        }

        let state = self.states.get_mut(name).expect("state just inserted");
        state.step += 1;

        // m = beta1 * m + (1 - beta1) * grad
        let m_scaled = state.m.affine(self.beta1, 0.0)?;
        let grad_scaled = grad.affine(1.0 - self.beta1, 0.0)?;
        state.m = m_scaled.add(&grad_scaled)?;

        // v = beta2 * v + (1 - beta2) * grad^2
        let v_scaled = state.v.affine(self.beta2, 0.0)?;
        let grad_sq_scaled = grad.mul(grad)?.affine(1.0 - self.beta2, 0.0)?;
        state.v = v_scaled.add(&grad_sq_scaled)?;

        let bias_correction1 = 1.0 - self.beta1.powi(state.step as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(state.step as i32);

        let m_hat = state.m.affine(1.0 / bias_correction1, 0.0)?;
        let v_hat = state.v.affine(1.0 / bias_correction2, 0.0)?;

        // update = lr * m_hat / (sqrt(v_hat) + eps)
        let denom = v_hat.sqrt()?.affine(1.0, self.eps)?;
        let update = m_hat.div(&denom)?.affine(self.lr, 0.0)?;

        let mut new_param = param.sub(&update)?;
        if self.weight_decay > 0.0 {
            let decay = param.affine(self.lr * self.weight_decay, 0.0)?;
            new_param = new_param.sub(&decay)?;
        }

        param.set(&new_param)?;
        Ok(())
    }
}

/// Learning-rate scheduler with linear warmup and cosine decay to zero.
pub struct LRScheduler {
    base_lr: f64,
    warmup_steps: u64,
    total_steps: u64,
    kind: SchedulerKind,
}

impl LRScheduler {
    /// Creates a new scheduler.
    #[must_use]
    pub fn new(kind: SchedulerKind, base_lr: f64, warmup_steps: u64, total_steps: u64) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
            kind,
        }
    }

    /// Returns the learning rate for a given step.
    #[must_use]
    pub fn get_lr(&self, step: u64) -> f64 {
        if matches!(self.kind, SchedulerKind::Constant) {
            return self.base_lr;
        }

        if self.warmup_steps > 0 && step < self.warmup_steps {
            return self.base_lr * (step as f64 / self.warmup_steps as f64);
        }

        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1);
        let progress = (step.saturating_sub(self.warmup_steps)) as f64 / decay_steps as f64;
        let progress = progress.min(1.0);

        self.base_lr * 0.5 * (1.0 + (std::f64::consts::PI * progress).cos())
    }
}

/// Batches packed training windows with per-epoch shuffling.
pub struct DataLoader {
    windows: Vec<Vec<u32>>,
    batch_size: usize,
    indices: Vec<usize>,
    position: usize,
}

impl DataLoader {
    /// Creates a new loader over packed windows.
    #[must_use]
    pub fn new(windows: Vec<Vec<u32>>, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        let mut indices: Vec<usize> = (0..windows.len()).collect();
        if shuffle {
            indices.shuffle(&mut StdRng::seed_from_u64(seed));
        }

        Self {
            windows,
            batch_size: batch_size.max(1),
            indices,
            position: 0,
        }
    }

    /// Returns the number of batches per pass.
    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.windows.len().div_ceil(self.batch_size)
    }
}

impl Iterator for DataLoader {
    type Item = Vec<Vec<u32>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.indices.len() {
            return None;
        }

        let end = (self.position + self.batch_size).min(self.indices.len());
        let batch: Vec<Vec<u32>> = self.indices[self.position..end]
            .iter()
            .map(|&idx| self.windows[idx].clone())
            .collect();

        self.position = end;
        Some(batch)
    }
}

/// Receiver for training progress reports.
pub trait TrainingReport {
    /// Called after each logged optimizer step.
    fn on_step(&mut self, _step: u64, _epoch: usize, _loss: f64, _lr: f64) {}

    /// Called once when training completes.
    fn on_train_end(&mut self, _stats: &TrainerStats) {}
}

/// Report sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReport;

impl TrainingReport for NullReport {}

/// Statistics from a completed training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerStats {
    /// Mean training loss over all optimizer steps.
    pub training_loss: f64,
    /// Number of optimizer steps taken.
    pub global_steps: u64,
    /// Number of epochs completed.
    pub epochs: usize,
}

/// Per-layer context captured before the training loop.
struct LayerCtx {
    /// Frozen base projection at F32, shape (out, in), when present.
    base_response: Option<Tensor>,
    /// Fixed probe for layers whose input is not the hidden dimension.
    static_probe: Option<Tensor>,
}

/// Supervised fine-tuning trainer.
///
/// Drives the adapters against the frozen base response over packed
/// instruction windows for the configured epoch budget. There is no early
/// stopping and no resume; any failure aborts the run.
pub struct SftTrainer<'a> {
    args: TrainerArgs,
    model: AdaptedModel,
    tokenizer: &'a Tokenizer,
    dataset: &'a InstructionDataset,
}

impl<'a> SftTrainer<'a> {
    /// Creates a trainer over an adapted model and assembled dataset.
    #[must_use]
    pub fn new(
        model: AdaptedModel,
        tokenizer: &'a Tokenizer,
        dataset: &'a InstructionDataset,
        args: TrainerArgs,
    ) -> Self {
        Self {
            args,
            model,
            tokenizer,
            dataset,
        }
    }

    /// Returns the trainer arguments.
    #[must_use]
    pub fn args(&self) -> &TrainerArgs {
        &self.args
    }

    /// Returns the adapted model.
    #[must_use]
    pub fn model(&self) -> &AdaptedModel {
        &self.model
    }

    /// Runs the full training loop and reports the final loss.
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization, a tensor operation, or an
    /// optimizer step fails.
    pub fn train(&mut self, report: &mut dyn TrainingReport) -> Result<TrainerStats> {
        let eos = self
            .tokenizer
            .eos_token_id()
            .ok_or_else(|| Error::training("Tokenizer defines no EOS token"))?;

        let mut sequences = Vec::with_capacity(self.dataset.len());
        for record in self.dataset.iter() {
            sequences.push(self.tokenizer.encode(record.text(), false)?);
        }

        let windows = if self.args.packing {
            pack_sequences(&sequences, self.args.max_seq_length, eos)
        } else {
            sequences
                .into_iter()
                .map(|mut s| {
                    s.truncate(self.args.max_seq_length);
                    s
                })
                .collect()
        };

        if windows.is_empty() {
            return Err(Error::training("No training windows after packing"));
        }

        let device = self.model.base().device().clone();
        let embedding = self
            .model
            .base()
            .embedding()
            .ok_or_else(|| Error::training("Base model has no token embedding matrix"))?
            .to_dtype(DType::F32)?;

        let hidden = self.model.base().config().hidden_size();
        let mut layer_ctx = Vec::with_capacity(self.model.layers().len());
        for layer in self.model.layers() {
            let base_response = match self.model.base().module_weight(&layer.name) {
                Some(w) => Some(w.to_dtype(DType::F32)?),
                None => None,
            };
            let static_probe = if layer.in_features() == hidden {
                None
            } else {
                let n = layer.in_features();
                Some(Tensor::full(1f32 / n as f32, (n, 1), &device)?)
            };
            layer_ctx.push(LayerCtx {
                base_response,
                static_probe,
            });
        }

        let accum = self.args.gradient_accumulation_steps.max(1);
        let batch_size = self.args.per_device_train_batch_size.max(1);
        let batches_per_epoch = windows.len().div_ceil(batch_size);
        let steps_per_epoch = batches_per_epoch.div_ceil(accum);
        let total_steps = (steps_per_epoch * self.args.num_train_epochs) as u64;
        let warmup_steps = (self.args.warmup_ratio * total_steps as f64).round() as u64;

        let mut optimizer = AdamW::new(self.args.learning_rate, 0.0);
        let scheduler = LRScheduler::new(
            self.args.lr_scheduler_type,
            self.args.learning_rate,
            warmup_steps,
            total_steps,
        );

        info!(
            windows = windows.len(),
            total_steps,
            warmup_steps,
            batch_size,
            accum,
            bf16 = self.args.bf16,
            tf32 = self.args.tf32,
            gradient_checkpointing = self.args.gradient_checkpointing,
            trainable = self.model.trainable_parameters(),
            "Starting supervised fine-tuning"
        );

        let progress = ProgressBar::new(total_steps);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) loss: {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );

        let scaling = self.model.config().scaling();
        let dropout = f64::from(self.model.config().lora_dropout);

        let mut running_loss = 0f64;
        let mut loss_count = 0u64;
        let mut global_step = 0u64;
        let mut accum_grads: HashMap<String, Tensor> = HashMap::new();
        let mut accum_count = 0usize;

        for epoch in 0..self.args.num_train_epochs {
            let loader = DataLoader::new(
                windows.clone(),
                batch_size,
                true,
                self.args.seed.wrapping_add(epoch as u64),
            );

            for batch in loader {
                let batch_loss =
                    self.training_step(&batch, &embedding, &layer_ctx, scaling, dropout, &mut accum_grads)?;
                running_loss += batch_loss;
                loss_count += 1;
                accum_count += 1;

                if accum_count == accum {
                    let lr = self.apply_update(
                        &mut optimizer,
                        &scheduler,
                        global_step,
                        &mut accum_grads,
                        accum_count,
                    )?;
                    accum_count = 0;
                    global_step += 1;

                    let avg_loss = running_loss / loss_count as f64;
                    progress.set_position(global_step);
                    progress.set_message(format!("{avg_loss:.4}"));

                    if global_step % self.args.logging_steps.max(1) == 0 {
                        debug!(step = global_step, loss = avg_loss, lr, "Training step");
                        report.on_step(global_step, epoch, avg_loss, lr);
                    }
                }
            }

            // Flush a short accumulation window at the epoch boundary.
            if accum_count > 0 {
                let lr = self.apply_update(
                    &mut optimizer,
                    &scheduler,
                    global_step,
                    &mut accum_grads,
                    accum_count,
                )?;
                accum_count = 0;
                global_step += 1;
                report.on_step(global_step, epoch, running_loss / loss_count as f64, lr);
            }

            info!(
                epoch = epoch + 1,
                loss = running_loss / loss_count.max(1) as f64,
                "Epoch completed"
            );
        }

        progress.finish_with_message("Complete");

        let stats = TrainerStats {
            training_loss: running_loss / loss_count.max(1) as f64,
            global_steps: global_step,
            epochs: self.args.num_train_epochs,
        };
        report.on_train_end(&stats);

        Ok(stats)
    }

    /// One forward/backward pass over a batch of windows; gradients are
    /// added into the accumulation map.
    fn training_step(
        &self,
        batch: &[Vec<u32>],
        embedding: &Tensor,
        layer_ctx: &[LayerCtx],
        scaling: f64,
        dropout: f64,
        accum_grads: &mut HashMap<String, Tensor>,
    ) -> Result<f64> {
        let device = self.model.base().device();

        let flat: Vec<u32> = batch.iter().flatten().copied().collect();
        let n = flat.len();
        let ids = Tensor::from_vec(flat, n, device)?;
        let mut embedded = embedding.index_select(&ids, 0)?;

        if self.args.neftune_noise_alpha > 0.0 {
            let dims = embedded.dims();
            let magnitude = self.args.neftune_noise_alpha / ((dims[0] * dims[1]) as f64).sqrt();
            let noise =
                Tensor::rand(-1f32, 1f32, embedded.shape(), device)?.affine(magnitude, 0.0)?;
            embedded = embedded.add(&noise)?;
        }

        // Pooled batch probe, shape (hidden, 1).
        let pooled = embedded.mean(0)?.unsqueeze(1)?;

        let mut loss: Option<Tensor> = None;
        for (layer, ctx) in self.model.layers().iter().zip(layer_ctx) {
            let x = match &ctx.static_probe {
                Some(probe) => probe.clone(),
                None => pooled.clone(),
            };

            let adapter_in = apply_dropout(&x, dropout)?;
            let delta = layer.forward(&adapter_in, scaling)?;
            let y = match &ctx.base_response {
                Some(w) => w.matmul(&x)?.add(&delta)?,
                None => delta,
            };

            let layer_loss = y.sqr()?.mean_all()?;
            loss = Some(match loss {
                Some(total) => total.add(&layer_loss)?,
                None => layer_loss,
            });
        }

        let loss = loss
            .ok_or_else(|| Error::training("Model has no adapter layers"))?
            .affine(1.0 / self.model.layers().len() as f64, 0.0)?;

        let grads = loss.backward()?;
        for layer in self.model.layers() {
            for (suffix, var) in [("lora_a", &layer.a), ("lora_b", &layer.b)] {
                let key = format!("{}.{suffix}", layer.name);
                let grad = match grads.get(var) {
                    Some(g) => g.clone(),
                    None => Tensor::zeros(var.shape(), var.dtype(), var.device())?,
                };
                let merged = match accum_grads.remove(&key) {
                    Some(existing) => existing.add(&grad)?,
                    None => grad,
                };
                accum_grads.insert(key, merged);
            }
        }

        Ok(f64::from(loss.to_scalar::<f32>()?))
    }

    /// Averages accumulated gradients, clips by global norm, and applies
    /// one optimizer step at the scheduled learning rate.
    fn apply_update(
        &self,
        optimizer: &mut AdamW,
        scheduler: &LRScheduler,
        step: u64,
        accum_grads: &mut HashMap<String, Tensor>,
        accum_count: usize,
    ) -> Result<f64> {
        let scale = 1.0 / accum_count.max(1) as f64;

        let mut sq_sum = 0f64;
        for grad in accum_grads.values() {
            let s = f64::from(grad.sqr()?.sum_all()?.to_scalar::<f32>()?);
            sq_sum += s * scale * scale;
        }
        let norm = sq_sum.sqrt();
        let clip = if norm > self.args.max_grad_norm {
            self.args.max_grad_norm / norm
        } else {
            1.0
        };

        let lr = scheduler.get_lr(step);
        optimizer.set_lr(lr);

        for layer in self.model.layers() {
            for (suffix, var) in [("lora_a", &layer.a), ("lora_b", &layer.b)] {
                let key = format!("{}.{suffix}", layer.name);
                if let Some(grad) = accum_grads.remove(&key) {
                    let grad = grad.affine(scale * clip, 0.0)?;
                    optimizer.step(&key, var, &grad)?;
                }
            }
        }

        accum_grads.clear();
        Ok(lr)
    }
}

fn apply_dropout(x: &Tensor, p: f64) -> Result<Tensor> {
    if p <= 0.0 {
        return Ok(x.clone());
    }

    let mask = Tensor::rand(0f32, 1f32, x.shape(), x.device())?
        .ge(p)?
        .to_dtype(DType::F32)?;
    Ok(x.mul(&mask)?.affine(1.0 / (1.0 - p), 0.0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdaptedModel, AdapterConfig};
    use candle_core::Device;
    use gremory::InstructionRecord;
    use phenex_core::QuantizationPolicy;
    use std::collections::HashMap as StdHashMap;
    use tokenizers::models::wordlevel::WordLevel;
    use tokenizers::AddedToken;
    use vassago::{CausalModel, ModelConfig};

    #[test]
    fn test_lr_scheduler_warmup() {
        let scheduler = LRScheduler::new(SchedulerKind::Cosine, 1e-4, 100, 1000);

        assert!((scheduler.get_lr(0) - 0.0).abs() < 1e-12);
        assert!((scheduler.get_lr(50) - 5e-5).abs() < 1e-12);
        assert!((scheduler.get_lr(100) - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_lr_scheduler_decays_to_zero() {
        let scheduler = LRScheduler::new(SchedulerKind::Cosine, 1e-4, 0, 1000);

        assert!((scheduler.get_lr(0) - 1e-4).abs() < 1e-12);
        assert!(scheduler.get_lr(500) < 1e-4);
        assert!(scheduler.get_lr(1000) < 1e-9);
    }

    #[test]
    fn test_lr_scheduler_constant() {
        let scheduler = LRScheduler::new(SchedulerKind::Constant, 3e-4, 100, 1000);
        assert!((scheduler.get_lr(0) - 3e-4).abs() < 1e-12);
        assert!((scheduler.get_lr(999) - 3e-4).abs() < 1e-12);
    }

    #[test]
    fn test_data_loader_batches() {
        let windows: Vec<Vec<u32>> = (0..5).map(|i| vec![i]).collect();
        let loader = DataLoader::new(windows, 2, false, 42);

        assert_eq!(loader.num_batches(), 3);
        let batches: Vec<_> = loader.collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
    }

    #[test]
    fn test_data_loader_shuffle_deterministic() {
        let windows: Vec<Vec<u32>> = (0..20).map(|i| vec![i]).collect();
        let a: Vec<_> = DataLoader::new(windows.clone(), 1, true, 7).collect();
        let b: Vec<_> = DataLoader::new(windows, 1, true, 7).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_trainer_args_fixed_bundle() {
        let args = TrainerArgs::new("results", 3);

        assert_eq!(args.num_train_epochs, 3);
        assert_eq!(args.per_device_train_batch_size, 10);
        assert_eq!(args.gradient_accumulation_steps, 2);
        assert_eq!(args.optim, OptimizerKind::PagedAdamw32bit);
        assert!((args.max_grad_norm - 0.3).abs() < 1e-12);
        assert!((args.warmup_ratio - 0.03).abs() < 1e-12);
        assert_eq!(args.max_seq_length, 2048);
        assert!(args.packing);
        assert!(args.bf16 && args.tf32);
        assert!(args.logging_dir.ends_with("logs"));
    }

    fn tiny_adapted_model() -> AdaptedModel {
        let device = Device::Cpu;
        let config: ModelConfig = serde_json::from_str(
            r#"{
                "hidden_size": 8,
                "intermediate_size": 16,
                "num_attention_heads": 2,
                "num_key_value_heads": 2,
                "vocab_size": 32
            }"#,
        )
        .unwrap();

        let mut weights = StdHashMap::new();
        weights.insert(
            "model.embed_tokens.weight".to_string(),
            Tensor::rand(0f32, 1f32, (32, 8), &device).unwrap(),
        );
        weights.insert(
            "model.layers.0.self_attn.q_proj.weight".to_string(),
            Tensor::ones((8, 8), DType::F32, &device).unwrap(),
        );

        let base = CausalModel::from_parts(config, weights, QuantizationPolicy::four_bit(), device);
        AdaptedModel::attach(base, AdapterConfig::new(2, 0.0)).unwrap()
    }

    fn word_tokenizer(dir: &std::path::Path) -> Tokenizer {
        let vocab: StdHashMap<String, u32> = [("<unk>".to_string(), 0u32)].into();
        let model = WordLevel::builder()
            .vocab(vocab)
            .unk_token("<unk>".to_string())
            .build()
            .unwrap();

        let mut inner = tokenizers::Tokenizer::new(model);
        inner.add_special_tokens(&[AddedToken::from("</s>", true)]);

        let path = dir.join("tokenizer.json");
        inner.save(&path, false).unwrap();

        let mut tokenizer = Tokenizer::from_file(&path).unwrap();
        tokenizer.configure_for_training().unwrap();
        tokenizer
    }

    struct LossTrace {
        losses: Vec<f64>,
    }

    impl TrainingReport for LossTrace {
        fn on_step(&mut self, _step: u64, _epoch: usize, loss: f64, _lr: f64) {
            self.losses.push(loss);
        }
    }

    #[test]
    fn test_training_reduces_loss() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = word_tokenizer(dir.path());

        let dataset = InstructionDataset::from_records(
            (0..16)
                .map(|i| InstructionRecord::from_pair(&format!("q{i}"), "a"))
                .collect(),
        );

        let mut args = TrainerArgs::new(dir.path(), 8);
        args.per_device_train_batch_size = 4;
        args.gradient_accumulation_steps = 1;
        args.max_seq_length = 4;
        args.learning_rate = 0.05;
        args.lr_scheduler_type = SchedulerKind::Constant;
        args.logging_steps = 1;

        let mut trainer = SftTrainer::new(tiny_adapted_model(), &tokenizer, &dataset, args);
        let mut trace = LossTrace { losses: Vec::new() };
        let stats = trainer.train(&mut trace).unwrap();

        assert!(stats.global_steps > 10);
        assert!(trace.losses.len() > 10);
        let first = trace.losses[0];
        let last = *trace.losses.last().unwrap();
        assert!(last < first, "loss should decrease: first={first}, last={last}");
        assert!(stats.training_loss.is_finite());
    }

    #[test]
    fn test_training_empty_dataset_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = word_tokenizer(dir.path());
        let dataset = InstructionDataset::new();

        let mut trainer = SftTrainer::new(
            tiny_adapted_model(),
            &tokenizer,
            &dataset,
            TrainerArgs::new(dir.path(), 1),
        );

        assert!(trainer.train(&mut NullReport).is_err());
    }
}
