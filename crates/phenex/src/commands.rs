//! CLI command implementations.

use std::path::Path;

use color_eyre::eyre::{eyre, Result};
use indicatif::{ProgressBar, ProgressStyle};

use candle_core::Device;
use gremory::{assemble, AssemblyPlan};
use phenex_core::{DeviceType, ModelSource, QuantizationPolicy, RunSummary};
use seere::RunTracker;
use vapula::{AdaptedModel, AdapterConfig, SftTrainer, TrainerArgs, TrainerStats, TrainingReport};
use vassago::{CausalModel, ModelLoader, Tokenizer};

use crate::config::RunConfig;

/// Forwards trainer step metrics to the run tracker.
struct TrackerReport<'a>(&'a mut RunTracker);

impl TrainingReport for TrackerReport<'_> {
    fn on_step(&mut self, step: u64, epoch: usize, loss: f64, lr: f64) {
        if let Err(e) = self.0.log_metrics(step, epoch, loss, lr) {
            tracing::warn!(error = %e, "Failed to record step metrics");
        }
    }

    fn on_train_end(&mut self, stats: &TrainerStats) {
        tracing::info!(
            loss = stats.training_loss,
            steps = stats.global_steps,
            "Training finished"
        );
    }
}

/// Runs the full fine-tuning pipeline from a configuration file.
pub fn run(config_path: &Path) -> Result<()> {
    let config = RunConfig::load(config_path)?;
    config.validate()?;

    let mut tracker = RunTracker::create(
        config.tracker.clone(),
        config.results_dir.join("logs"),
    )?;

    // Dataset assembly.
    let spinner = make_spinner("Assembling training set...");
    let plan = AssemblyPlan {
        dataset_repo: config.dataset_repo.clone(),
        dataset_repo_v2: config.dataset_repo_v2.clone(),
        exam_questions_repo: config.exam_questions_repo.clone(),
        include_first_generation: config.include_first_generation,
        seed: config.seed,
    };
    let dataset = assemble(&plan)?;
    spinner.finish_and_clear();
    println!("Training set: {} records\n", dataset.len());

    // Model and tokenizer.
    let spinner = make_spinner(format!("Loading model {}...", config.pretrained_ckpt));
    let loader = ModelLoader::default_cache()?;
    let files = loader.resolve(&ModelSource::from_identifier(&config.pretrained_ckpt))?;
    let device = device(config.device)?;
    let mut model = CausalModel::load(&files, QuantizationPolicy::four_bit(), &device)?;

    let tokenizer_path = files
        .tokenizer
        .as_ref()
        .ok_or_else(|| eyre!("Checkpoint {} has no tokenizer.json", config.pretrained_ckpt))?;
    let mut tokenizer = Tokenizer::from_file(tokenizer_path)?;
    tokenizer.configure_for_training()?;
    spinner.finish_and_clear();
    println!("Model loaded: {}\n", config.pretrained_ckpt);

    // Adapter injection.
    model.prepare_for_kbit_training()?;
    let adapter_config = AdapterConfig::new(config.lora_r, config.dropout);
    let adapted = AdaptedModel::attach(model, adapter_config)?;

    // Training.
    let mut args = TrainerArgs::new(&config.results_dir, config.epochs);
    args.learning_rate = config.learning_rate;
    args.neftune_noise_alpha = config.neftune;
    args.seed = config.seed;

    let mut trainer = SftTrainer::new(adapted, &tokenizer, &dataset, args);
    let stats = trainer.train(&mut TrackerReport(&mut tracker))?;
    println!("Training loss: {:.4}", stats.training_loss);

    // Persistence.
    let assets_dir = config.results_dir.join("assets");
    trainer.model().save(&assets_dir)?;
    tokenizer.save(assets_dir.join("tokenizer.json"))?;
    tracker.log_artifact(&assets_dir)?;

    let summary = RunSummary::new(
        config.epochs,
        config.lora_r,
        config.dropout,
        stats.training_loss,
    );
    summary.write_json(config.results_dir.join("results.json"))?;
    tracker.finish(&summary)?;

    println!("Experiment over");
    Ok(())
}

/// Displays version and build info.
pub fn version() {
    println!("phenex {}", env!("CARGO_PKG_VERSION"));
}

fn device(device: DeviceType) -> Result<Device> {
    match device {
        DeviceType::Cpu => Ok(Device::Cpu),
        DeviceType::Cuda { device_id } => {
            Device::new_cuda(device_id).map_err(|e| eyre!("Failed to open CUDA device: {e}"))
        }
    }
}

fn make_spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    spinner.set_message(message.into());
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner
}
