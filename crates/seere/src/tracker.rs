//! Experiment-run tracking client.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use phenex_core::{Result, RunSummary};
use serde::{Deserialize, Serialize};
use tracing::info;

/// What model artifacts the tracker records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogModelMode {
    /// Record nothing about model artifacts.
    Disabled,
    /// Record every checkpoint path.
    #[default]
    Checkpoint,
    /// Record only the final artifact path.
    Final,
}

/// Configuration for the experiment-run tracker.
///
/// Passed explicitly to [`RunTracker::create`]; the tracker holds no
/// hidden global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Project name the run is filed under.
    pub project: String,
    /// Checkpoint-logging mode.
    #[serde(default)]
    pub log_model: LogModelMode,
}

impl TrackerConfig {
    /// Creates a configuration for a project.
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            log_model: LogModelMode::default(),
        }
    }

    /// Sets the checkpoint-logging mode.
    #[must_use]
    pub fn with_log_model(mut self, mode: LogModelMode) -> Self {
        self.log_model = mode;
        self
    }
}

/// One tracked event, appended as a JSON line.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TrackedEvent<'a> {
    RunStarted {
        project: &'a str,
    },
    Metrics {
        step: u64,
        epoch: usize,
        loss: f64,
        lr: f64,
    },
    Artifact {
        path: &'a str,
    },
    Summary {
        summary: &'a RunSummary,
        elapsed_secs: f64,
    },
}

/// Appends run events to a JSONL log under the run's log directory.
pub struct RunTracker {
    config: TrackerConfig,
    writer: BufWriter<File>,
    log_path: PathBuf,
    started: Instant,
}

impl RunTracker {
    /// File name of the run log inside the log directory.
    pub const LOG_FILE: &'static str = "run.jsonl";

    /// Creates a tracker writing under `logging_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory or file cannot be created.
    pub fn create(config: TrackerConfig, logging_dir: impl AsRef<Path>) -> Result<Self> {
        let logging_dir = logging_dir.as_ref();
        std::fs::create_dir_all(logging_dir)?;

        let log_path = logging_dir.join(Self::LOG_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let mut tracker = Self {
            config,
            writer: BufWriter::new(file),
            log_path,
            started: Instant::now(),
        };

        let project = tracker.config.project.clone();
        tracker.append(&TrackedEvent::RunStarted { project: &project })?;
        info!(project = %tracker.config.project, log = %tracker.log_path.display(), "Run tracking started");

        Ok(tracker)
    }

    /// Returns the tracker configuration.
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Returns the path of the run log.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Records step metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be written.
    pub fn log_metrics(&mut self, step: u64, epoch: usize, loss: f64, lr: f64) -> Result<()> {
        self.append(&TrackedEvent::Metrics {
            step,
            epoch,
            loss,
            lr,
        })
    }

    /// Records a model artifact path, subject to the logging mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be written.
    pub fn log_artifact(&mut self, path: &Path) -> Result<()> {
        if self.config.log_model == LogModelMode::Disabled {
            return Ok(());
        }
        self.append(&TrackedEvent::Artifact {
            path: &path.display().to_string(),
        })
    }

    /// Records the run summary and flushes the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be written.
    pub fn finish(mut self, summary: &RunSummary) -> Result<()> {
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        self.append(&TrackedEvent::Summary {
            summary,
            elapsed_secs,
        })?;
        self.writer.flush()?;

        info!(
            final_loss = summary.final_loss,
            elapsed_secs, "Run tracking finished"
        );
        Ok(())
    }

    fn append(&mut self, event: &TrackedEvent<'_>) -> Result<()> {
        let line = serde_json::to_string(event)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_events(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_tracker_writes_run_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackerConfig::new("phenex-finetune");

        let mut tracker = RunTracker::create(config, dir.path().join("logs")).unwrap();
        tracker.log_metrics(1, 0, 2.5, 1e-4).unwrap();
        tracker
            .finish(&RunSummary::new(1, 8, 0.05, 1.23))
            .unwrap();

        let events = read_events(&dir.path().join("logs").join(RunTracker::LOG_FILE));
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["event"], "run_started");
        assert_eq!(events[0]["project"], "phenex-finetune");
        assert_eq!(events[1]["event"], "metrics");
        assert_eq!(events[1]["loss"], 2.5);
        assert_eq!(events[2]["event"], "summary");
        assert_eq!(events[2]["summary"]["final_loss"], 1.23);
    }

    #[test]
    fn test_artifact_logging_respects_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackerConfig::new("p").with_log_model(LogModelMode::Disabled);

        let mut tracker = RunTracker::create(config, dir.path()).unwrap();
        tracker.log_artifact(Path::new("assets")).unwrap();
        tracker.finish(&RunSummary::new(1, 8, 0.0, 0.0)).unwrap();

        let events = read_events(&dir.path().join(RunTracker::LOG_FILE));
        assert!(events.iter().all(|e| e["event"] != "artifact"));
    }

    #[test]
    fn test_artifact_logged_in_checkpoint_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackerConfig::new("p");

        let mut tracker = RunTracker::create(config, dir.path()).unwrap();
        tracker.log_artifact(Path::new("results/assets")).unwrap();

        let events = read_events(&dir.path().join(RunTracker::LOG_FILE));
        assert_eq!(events[1]["event"], "artifact");
        assert_eq!(events[1]["path"], "results/assets");
    }
}
