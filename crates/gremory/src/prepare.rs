//! Source preparation: resolving dataset repositories and formatting records.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use phenex_core::{Error, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::dataset::InstructionDataset;
use crate::record::InstructionRecord;

/// File names probed inside a dataset repository, in order of preference.
const DATA_FILES: [&str; 3] = ["train.jsonl", "data.jsonl", "dataset.jsonl"];

/// Resolves dataset identifiers to local JSONL files.
pub struct DatasetFetcher {
    api: Api,
}

impl DatasetFetcher {
    /// Creates a new fetcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the HuggingFace API cannot be initialized.
    pub fn new() -> Result<Self> {
        let api = Api::new().map_err(|e| {
            Error::dataset(format!("Failed to initialize HuggingFace API: {e}"))
        })?;
        Ok(Self { api })
    }

    /// Resolves a dataset identifier to a local JSONL file.
    ///
    /// An existing local path is used directly (a directory is probed for
    /// the conventional data file names); anything else is treated as a Hub
    /// dataset repository and downloaded.
    ///
    /// # Errors
    ///
    /// Returns an error if no data file can be resolved.
    pub fn resolve(&self, identifier: &str) -> Result<PathBuf> {
        let local = Path::new(identifier);
        if local.exists() {
            return Self::resolve_local(local);
        }

        info!(repo_id = identifier, "Resolving Hub dataset repository");
        let repo = self.api.repo(Repo::new(identifier.to_string(), RepoType::Dataset));

        for name in DATA_FILES {
            if let Ok(path) = repo.get(name) {
                debug!(file = name, "Downloaded dataset file");
                return Ok(path);
            }
        }

        Err(Error::dataset(format!(
            "No data file found in dataset repository {identifier}"
        )))
    }

    fn resolve_local(path: &Path) -> Result<PathBuf> {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }

        for name in DATA_FILES {
            let candidate = path.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(Error::dataset(format!(
            "No data file found under {}",
            path.display()
        )))
    }
}

/// Prepares an instruction dataset from input/output field pairs.
///
/// Each JSONL record must carry both named fields as strings; a missing or
/// non-string field surfaces as a dataset error, which is the only schema
/// validation performed.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a record cannot be decoded.
pub fn prepare_pairs(
    data_file: &Path,
    input_field: &str,
    output_field: &str,
) -> Result<InstructionDataset> {
    let mut dataset = InstructionDataset::new();

    for (line_no, line) in read_lines(data_file)?.iter().enumerate() {
        let value: Value = serde_json::from_str(line).map_err(|e| {
            Error::dataset(format!(
                "{}:{}: invalid record: {e}",
                data_file.display(),
                line_no + 1
            ))
        })?;

        let input = string_field(&value, input_field, data_file, line_no)?;
        let output = string_field(&value, output_field, data_file, line_no)?;
        dataset.push(InstructionRecord::from_pair(input, output));
    }

    info!(
        file = %data_file.display(),
        records = dataset.len(),
        input = input_field,
        output = output_field,
        "Prepared instruction pairs"
    );

    Ok(dataset)
}

/// Prepares an instruction dataset from exam questions.
///
/// Each record carries a question, a list of answer options, and the
/// correct answer; the options are rendered into the prompt and the correct
/// answer becomes the response.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a record cannot be decoded.
pub fn prepare_exam(
    data_file: &Path,
    question_field: &str,
    answers_field: &str,
    correct_field: &str,
) -> Result<InstructionDataset> {
    let mut dataset = InstructionDataset::new();

    for (line_no, line) in read_lines(data_file)?.iter().enumerate() {
        let value: Value = serde_json::from_str(line).map_err(|e| {
            Error::dataset(format!(
                "{}:{}: invalid record: {e}",
                data_file.display(),
                line_no + 1
            ))
        })?;

        let question = string_field(&value, question_field, data_file, line_no)?;
        let correct = string_field(&value, correct_field, data_file, line_no)?;
        let answers: Vec<String> = value
            .get(answers_field)
            .and_then(Value::as_array)
            .map(|options| {
                options
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        dataset.push(InstructionRecord::from_exam(question, &answers, correct));
    }

    info!(
        file = %data_file.display(),
        records = dataset.len(),
        "Prepared exam records"
    );

    Ok(dataset)
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(String::from)
        .collect())
}

fn string_field<'a>(value: &'a Value, field: &str, file: &Path, line_no: usize) -> Result<&'a str> {
    value.get(field).and_then(Value::as_str).ok_or_else(|| {
        Error::dataset(format!(
            "{}:{}: missing string field `{field}`",
            file.display(),
            line_no + 1
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_jsonl(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn test_prepare_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_jsonl(
            dir.path(),
            "train.jsonl",
            &[
                r#"{"prompt": "p1", "question": "q1"}"#,
                r#"{"prompt": "p2", "question": "q2"}"#,
            ],
        );

        let dataset = prepare_pairs(&file, "prompt", "question").unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(dataset.get(0).unwrap().instructions.contains("p1"));
        assert!(dataset.get(0).unwrap().instructions.contains("q1"));
    }

    #[test]
    fn test_prepare_pairs_missing_field() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_jsonl(dir.path(), "train.jsonl", &[r#"{"prompt": "p1"}"#]);

        let result = prepare_pairs(&file, "prompt", "question");
        assert!(result.is_err());
    }

    #[test]
    fn test_prepare_exam() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_jsonl(
            dir.path(),
            "train.jsonl",
            &[r#"{"question": "Capital?", "answers": ["Kyiv", "Lviv"], "correct_answers": "Kyiv"}"#],
        );

        let dataset = prepare_exam(&file, "question", "answers", "correct_answers").unwrap();
        assert_eq!(dataset.len(), 1);

        let text = &dataset.get(0).unwrap().instructions;
        assert!(text.contains("Capital?"));
        assert!(text.contains("- Lviv"));
        assert!(text.ends_with("Kyiv"));
    }

    #[test]
    fn test_resolve_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_jsonl(dir.path(), "train.jsonl", &[r#"{"a": "b"}"#]);

        let resolved = DatasetFetcher::resolve_local(dir.path()).unwrap();
        assert!(resolved.ends_with("train.jsonl"));
    }

    #[test]
    fn test_resolve_local_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DatasetFetcher::resolve_local(dir.path()).is_err());
    }
}
