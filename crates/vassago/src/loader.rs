//! Checkpoint resolution with HuggingFace Hub integration.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::{Api, ApiBuilder};
use hf_hub::{Repo, RepoType};
use phenex_core::{Error, ModelSource, Result};
use tracing::{debug, info};

/// Resolves model sources to local files.
pub struct ModelLoader {
    api: Api,
}

impl ModelLoader {
    /// Creates a new loader with the given cache directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the HuggingFace API cannot be initialized.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let api = ApiBuilder::new()
            .with_cache_dir(cache_dir.into())
            .build()
            .map_err(|e| Error::model_load(format!("Failed to initialize HuggingFace API: {e}")))?;

        Ok(Self { api })
    }

    /// Creates a loader with the default cache directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the API cannot be initialized.
    pub fn default_cache() -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("phenex")
            .join("models");
        Self::new(cache_dir)
    }

    /// Resolves a model source to local paths for all required files.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be resolved or downloaded.
    pub fn resolve(&self, source: &ModelSource) -> Result<ModelFiles> {
        match source {
            ModelSource::HuggingFace { repo_id, revision } => {
                self.resolve_huggingface(repo_id, revision.as_deref())
            }
            ModelSource::LocalPath { path } => Self::resolve_local(path),
        }
    }

    fn resolve_huggingface(&self, repo_id: &str, revision: Option<&str>) -> Result<ModelFiles> {
        info!(repo_id, revision, "Resolving HuggingFace checkpoint");

        let repo = self.api.repo(Repo::with_revision(
            repo_id.to_string(),
            RepoType::Model,
            revision.unwrap_or("main").to_string(),
        ));

        let config_path = repo
            .get("config.json")
            .map_err(|e| Error::model_load(format!("Failed to download config.json: {e}")))?;
        debug!(?config_path, "Downloaded config.json");

        let tokenizer_path = repo.get("tokenizer.json").ok();
        let tokenizer_config_path = repo.get("tokenizer_config.json").ok();

        let weights = if let Ok(path) = repo.get("model.safetensors") {
            info!("Found single safetensors file");
            WeightFiles::Single(path)
        } else if let Ok(index_path) = repo.get("model.safetensors.index.json") {
            info!("Found sharded safetensors");
            let shard_names = read_shard_names(&index_path)?;
            let mut shards = Vec::with_capacity(shard_names.len());
            for (i, name) in shard_names.iter().enumerate() {
                debug!(shard = %name, progress = format!("{}/{}", i + 1, shard_names.len()), "Downloading shard");
                let path = repo
                    .get(name)
                    .map_err(|e| Error::model_load(format!("Failed to download shard {name}: {e}")))?;
                shards.push(path);
            }
            WeightFiles::Sharded {
                index: index_path,
                shards,
            }
        } else {
            return Err(Error::model_load(format!(
                "No safetensors weight files found in {repo_id}"
            )));
        };

        Ok(ModelFiles {
            config: config_path,
            weights,
            tokenizer: tokenizer_path,
            tokenizer_config: tokenizer_config_path,
        })
    }

    fn resolve_local(path: &Path) -> Result<ModelFiles> {
        debug!(?path, "Resolving local checkpoint");

        if !path.exists() {
            return Err(Error::ModelNotFound {
                model_id: path.display().to_string(),
            });
        }

        let config = path.join("config.json");
        if !config.exists() {
            return Err(Error::model_load(format!(
                "config.json not found in {}",
                path.display()
            )));
        }

        let weights = if path.join("model.safetensors").exists() {
            WeightFiles::Single(path.join("model.safetensors"))
        } else if path.join("model.safetensors.index.json").exists() {
            let index = path.join("model.safetensors.index.json");
            let shards = read_shard_names(&index)?
                .into_iter()
                .map(|name| path.join(name))
                .collect();
            WeightFiles::Sharded { index, shards }
        } else {
            return Err(Error::model_load(format!(
                "No safetensors weight files found in {}",
                path.display()
            )));
        };

        Ok(ModelFiles {
            config,
            weights,
            tokenizer: Some(path.join("tokenizer.json")).filter(|p| p.exists()),
            tokenizer_config: Some(path.join("tokenizer_config.json")).filter(|p| p.exists()),
        })
    }
}

/// Reads unique shard file names from a safetensors index.
fn read_shard_names(index_path: &Path) -> Result<Vec<String>> {
    let index_content = std::fs::read_to_string(index_path)
        .map_err(|e| Error::model_load(format!("Failed to read index file: {e}")))?;

    let index: serde_json::Value = serde_json::from_str(&index_content)
        .map_err(|e| Error::model_load(format!("Failed to parse index file: {e}")))?;

    let weight_map = index
        .get("weight_map")
        .and_then(|w| w.as_object())
        .ok_or_else(|| Error::model_load("Invalid index file: missing weight_map"))?;

    let mut shard_names: Vec<String> = weight_map
        .values()
        .filter_map(|v| v.as_str())
        .map(String::from)
        .collect();
    shard_names.sort();
    shard_names.dedup();

    Ok(shard_names)
}

/// Collection of files needed to load a checkpoint.
#[derive(Debug)]
pub struct ModelFiles {
    /// Path to config.json.
    pub config: PathBuf,
    /// Weight files.
    pub weights: WeightFiles,
    /// Optional tokenizer.json.
    pub tokenizer: Option<PathBuf>,
    /// Optional tokenizer_config.json.
    pub tokenizer_config: Option<PathBuf>,
}

/// Safetensors weight file layout.
#[derive(Debug)]
pub enum WeightFiles {
    /// Single safetensors file.
    Single(PathBuf),
    /// Sharded safetensors files.
    Sharded {
        /// Index file.
        index: PathBuf,
        /// Shard files.
        shards: Vec<PathBuf>,
    },
}

impl WeightFiles {
    /// Returns all weight file paths.
    #[must_use]
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Self::Single(p) => vec![p.as_path()],
            Self::Sharded { shards, .. } => shards.iter().map(PathBuf::as_path).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_local_missing_path() {
        let result = ModelLoader::resolve_local(Path::new("/nonexistent/model"));
        assert!(matches!(result, Err(Error::ModelNotFound { .. })));
    }

    #[test]
    fn test_resolve_local_single_safetensors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"").unwrap();

        let files = ModelLoader::resolve_local(dir.path()).unwrap();
        assert_eq!(files.weights.paths().len(), 1);
        assert!(files.tokenizer.is_none());
    }

    #[test]
    fn test_read_shard_names_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("model.safetensors.index.json");
        let mut file = std::fs::File::create(&index).unwrap();
        write!(
            file,
            r#"{{"weight_map": {{"a": "model-00001.safetensors", "b": "model-00001.safetensors", "c": "model-00002.safetensors"}}}}"#
        )
        .unwrap();

        let names = read_shard_names(&index).unwrap();
        assert_eq!(
            names,
            vec!["model-00001.safetensors", "model-00002.safetensors"]
        );
    }
}
