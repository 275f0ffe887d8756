//! Run configuration for the fine-tuning pipeline.
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables (PHENEX_*)
//! 2. JSON config file (training_config.json by default)
//! 3. Default values

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Json, Serialized},
    Figment,
};
use phenex_core::{DeviceType, Error, Result};
use seere::TrackerConfig;
use serde::{Deserialize, Serialize};

/// Default path of the run configuration file.
pub const TRAINING_CONFIG_PATH: &str = "training_config.json";

/// Parameters of one fine-tuning run.
///
/// Loaded once at process start and immutable for the run's duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// First-generation dataset repository.
    #[serde(default)]
    pub dataset_repo: String,

    /// Second-generation dataset repository.
    #[serde(default)]
    pub dataset_repo_v2: String,

    /// Exam question dataset repository.
    #[serde(default)]
    pub exam_questions_repo: String,

    /// Pretrained checkpoint identifier (Hub repo ID or local path).
    #[serde(default)]
    pub pretrained_ckpt: String,

    /// Output directory for run artifacts.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Number of training epochs.
    #[serde(default = "default_epochs")]
    pub epochs: usize,

    /// Adapter rank.
    #[serde(default = "default_lora_r")]
    pub lora_r: usize,

    /// Adapter dropout probability.
    #[serde(default = "default_dropout")]
    pub dropout: f32,

    /// NEFTune embedding-noise strength (0 disables).
    #[serde(default)]
    pub neftune: f64,

    /// Whether the first-generation minority splits join the training mix.
    #[serde(default)]
    pub include_first_generation: bool,

    /// Shuffle seed for dataset assembly and epoch ordering.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Compute device.
    #[serde(default)]
    pub device: DeviceType,

    /// Base learning rate.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Experiment tracker configuration.
    #[serde(default = "default_tracker")]
    pub tracker: TrackerConfig,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_epochs() -> usize {
    3
}

fn default_lora_r() -> usize {
    64
}

fn default_dropout() -> f32 {
    0.05
}

fn default_seed() -> u64 {
    42
}

fn default_learning_rate() -> f64 {
    2e-4
}

fn default_tracker() -> TrackerConfig {
    TrackerConfig::new("phenex-finetune")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dataset_repo: String::new(),
            dataset_repo_v2: String::new(),
            exam_questions_repo: String::new(),
            pretrained_ckpt: String::new(),
            results_dir: default_results_dir(),
            epochs: default_epochs(),
            lora_r: default_lora_r(),
            dropout: default_dropout(),
            neftune: 0.0,
            include_first_generation: false,
            seed: default_seed(),
            device: DeviceType::default(),
            learning_rate: default_learning_rate(),
            tracker: default_tracker(),
        }
    }
}

impl RunConfig {
    /// Loads configuration from defaults, the JSON file, and environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be extracted.
    pub fn load(path: &Path) -> Result<Self> {
        Figment::new()
            .merge(Serialized::defaults(RunConfig::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed("PHENEX_"))
            .extract()
            .map_err(|e| Error::invalid_config(e.to_string()))
    }

    /// Checks that the run can actually start.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first missing or out-of-range value.
    pub fn validate(&self) -> Result<()> {
        if self.pretrained_ckpt.is_empty() {
            return Err(Error::invalid_config("pretrained_ckpt is required"));
        }
        if self.dataset_repo_v2.is_empty() {
            return Err(Error::invalid_config("dataset_repo_v2 is required"));
        }
        if self.exam_questions_repo.is_empty() {
            return Err(Error::invalid_config("exam_questions_repo is required"));
        }
        if self.include_first_generation && self.dataset_repo.is_empty() {
            return Err(Error::invalid_config(
                "dataset_repo is required when include_first_generation is set",
            ));
        }
        if self.epochs == 0 {
            return Err(Error::invalid_config("epochs must be at least 1"));
        }
        if self.lora_r == 0 {
            return Err(Error::invalid_config("lora_r must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::invalid_config("dropout must be in [0, 1)"));
        }
        if self.neftune < 0.0 {
            return Err(Error::invalid_config("neftune must be non-negative"));
        }
        Ok(())
    }
}

/// Prints the current configuration.
pub fn show_config(path: &Path) {
    match RunConfig::load(path) {
        Ok(config) => {
            println!("Phenex Run Configuration");
            println!("========================\n");

            println!("Config file: {}", path.display());
            if path.exists() {
                println!("Status: Found\n");
            } else {
                println!("Status: Not found (using defaults)\n");
            }

            println!("Current settings:");
            println!("  dataset_repo: {}", display_or_unset(&config.dataset_repo));
            println!(
                "  dataset_repo_v2: {}",
                display_or_unset(&config.dataset_repo_v2)
            );
            println!(
                "  exam_questions_repo: {}",
                display_or_unset(&config.exam_questions_repo)
            );
            println!(
                "  pretrained_ckpt: {}",
                display_or_unset(&config.pretrained_ckpt)
            );
            println!("  results_dir: {}", config.results_dir.display());
            println!("  epochs: {}", config.epochs);
            println!("  lora_r: {}", config.lora_r);
            println!("  dropout: {}", config.dropout);
            println!("  neftune: {}", config.neftune);
            println!(
                "  include_first_generation: {}",
                config.include_first_generation
            );
            println!("  seed: {}", config.seed);
            println!("  learning_rate: {}", config.learning_rate);
            println!("  tracker.project: {}", config.tracker.project);
        }
        Err(e) => {
            eprintln!("Configuration error: {e}");
        }
    }
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(not set)"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RunConfig {
        RunConfig {
            dataset_repo_v2: "org/data-v2".to_string(),
            exam_questions_repo: "org/exams".to_string(),
            pretrained_ckpt: "org/model".to_string(),
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_load_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training_config.json");
        std::fs::write(
            &path,
            r#"{
                "dataset_repo": "org/data",
                "dataset_repo_v2": "org/data-v2",
                "exam_questions_repo": "org/exams",
                "pretrained_ckpt": "org/model",
                "results_dir": "out",
                "epochs": 1,
                "lora_r": 8,
                "dropout": 0.05,
                "neftune": 5.0
            }"#,
        )
        .unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.epochs, 1);
        assert_eq!(config.lora_r, 8);
        assert_eq!(config.dropout, 0.05);
        assert_eq!(config.neftune, 5.0);
        assert_eq!(config.results_dir, PathBuf::from("out"));
        assert!(!config.include_first_generation);
        assert_eq!(config.seed, 42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training_config.json");
        std::fs::write(
            &path,
            r#"{
                "dataset_repo_v2": "org/data-v2",
                "exam_questions_repo": "org/exams",
                "pretrained_ckpt": "org/model",
                "some_future_key": true
            }"#,
        )
        .unwrap();

        assert!(RunConfig::load(&path).is_ok());
    }

    #[test]
    fn test_validate_requires_checkpoint() {
        let mut config = valid_config();
        config.pretrained_ckpt.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_first_generation_needs_repo() {
        let mut config = valid_config();
        config.include_first_generation = true;
        assert!(config.validate().is_err());

        config.dataset_repo = "org/data".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_dropout() {
        let mut config = valid_config();
        config.dropout = 1.0;
        assert!(config.validate().is_err());
    }
}
