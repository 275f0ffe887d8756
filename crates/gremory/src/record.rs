//! Instruction-formatted training records.

use serde::{Deserialize, Serialize};

/// A single training record exposing one instruction-formatted text field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRecord {
    /// The formatted instruction text consumed by the trainer.
    pub instructions: String,
}

impl InstructionRecord {
    /// Formats an input/output pair into the instruction template.
    #[must_use]
    pub fn from_pair(input: &str, output: &str) -> Self {
        Self {
            instructions: format!(
                "### Instruction:\n{}\n\n### Response:\n{}",
                input, output
            ),
        }
    }

    /// Formats an exam question with its answer options and the correct
    /// answer as the response.
    #[must_use]
    pub fn from_exam(question: &str, answers: &[String], correct: &str) -> Self {
        let mut prompt = String::from(question);
        if !answers.is_empty() {
            prompt.push('\n');
            for answer in answers {
                prompt.push_str("\n- ");
                prompt.push_str(answer);
            }
        }
        Self::from_pair(&prompt, correct)
    }

    /// Returns the record's text field.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pair_template() {
        let record = InstructionRecord::from_pair("What is Rust?", "A systems language.");
        assert!(record.instructions.starts_with("### Instruction:\nWhat is Rust?"));
        assert!(record.instructions.ends_with("### Response:\nA systems language."));
    }

    #[test]
    fn test_from_exam_lists_options() {
        let answers = vec!["Kyiv".to_string(), "Lviv".to_string()];
        let record = InstructionRecord::from_exam("Capital of Ukraine?", &answers, "Kyiv");

        assert!(record.instructions.contains("- Kyiv"));
        assert!(record.instructions.contains("- Lviv"));
        assert!(record.instructions.ends_with("### Response:\nKyiv"));
    }

    #[test]
    fn test_from_exam_without_options() {
        let record = InstructionRecord::from_exam("2 + 2?", &[], "4");
        assert!(record.instructions.contains("### Instruction:\n2 + 2?\n\n"));
    }
}
