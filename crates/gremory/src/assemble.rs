//! Training-set assembly: fixed concatenation order, seeded shuffle.

use phenex_core::Result;
use tracing::info;

use crate::dataset::InstructionDataset;
use crate::prepare::{prepare_exam, prepare_pairs, DatasetFetcher};

/// Fraction of first-generation records kept when the legacy mix is enabled.
const FIRST_GEN_TEST_SIZE: f32 = 0.2;

/// Field names for prompt/question pair preparation.
const PROMPT_FIELDS: (&str, &str) = ("prompt", "question");
/// Field names for question/response pair preparation.
const RESPONSE_FIELDS: (&str, &str) = ("question", "response");
/// Field names for exam preparation.
const EXAM_FIELDS: (&str, &str, &str) = ("question", "answers", "correct_answers");

/// Inputs for one dataset assembly.
#[derive(Debug, Clone)]
pub struct AssemblyPlan {
    /// First-generation dataset repository.
    pub dataset_repo: String,
    /// Second-generation dataset repository.
    pub dataset_repo_v2: String,
    /// Exam question dataset repository.
    pub exam_questions_repo: String,
    /// Whether the first-generation minority splits join the mix.
    pub include_first_generation: bool,
    /// Shuffle seed.
    pub seed: u64,
}

/// Assembles the training set from the configured repositories.
///
/// The final dataset is the second-generation prompt/question set, the
/// second-generation question/response set, and the exam set, concatenated
/// in that order and shuffled with the configured seed. When
/// `include_first_generation` is set, the 20% splits of the
/// first-generation sets are prepended to the mix; otherwise the
/// first-generation repository is not touched at all.
///
/// # Errors
///
/// Returns an error if any source cannot be resolved or decoded.
pub fn assemble(plan: &AssemblyPlan) -> Result<InstructionDataset> {
    let fetcher = DatasetFetcher::new()?;

    let first_generation = if plan.include_first_generation {
        let v1_file = fetcher.resolve(&plan.dataset_repo)?;

        let (_, pq_small) = prepare_pairs(&v1_file, PROMPT_FIELDS.0, PROMPT_FIELDS.1)?
            .train_test_split(FIRST_GEN_TEST_SIZE, plan.seed);
        let (_, qr_small) = prepare_pairs(&v1_file, RESPONSE_FIELDS.0, RESPONSE_FIELDS.1)?
            .train_test_split(FIRST_GEN_TEST_SIZE, plan.seed);

        Some((pq_small, qr_small))
    } else {
        None
    };

    let v2_file = fetcher.resolve(&plan.dataset_repo_v2)?;
    let pq_v2 = prepare_pairs(&v2_file, PROMPT_FIELDS.0, PROMPT_FIELDS.1)?;
    let qr_v2 = prepare_pairs(&v2_file, RESPONSE_FIELDS.0, RESPONSE_FIELDS.1)?;

    let exam_file = fetcher.resolve(&plan.exam_questions_repo)?;
    let exam = prepare_exam(&exam_file, EXAM_FIELDS.0, EXAM_FIELDS.1, EXAM_FIELDS.2)?;

    Ok(assemble_from_parts(
        first_generation,
        pq_v2,
        qr_v2,
        exam,
        plan.seed,
    ))
}

/// Concatenates prepared parts in the fixed order and shuffles.
#[must_use]
pub fn assemble_from_parts(
    first_generation: Option<(InstructionDataset, InstructionDataset)>,
    pq_v2: InstructionDataset,
    qr_v2: InstructionDataset,
    exam: InstructionDataset,
    seed: u64,
) -> InstructionDataset {
    let mut parts = Vec::with_capacity(5);
    if let Some((pq_small, qr_small)) = first_generation {
        parts.push(pq_small);
        parts.push(qr_small);
    }
    parts.push(pq_v2);
    parts.push(qr_v2);
    parts.push(exam);

    let mut combined = InstructionDataset::concatenate(parts);
    combined.shuffle(seed);

    info!(records = combined.len(), seed, "Assembled training set");
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::InstructionRecord;

    fn dataset(tag: &str, n: usize) -> InstructionDataset {
        InstructionDataset::from_records(
            (0..n)
                .map(|i| InstructionRecord::from_pair(&format!("{tag}{i}"), "out"))
                .collect(),
        )
    }

    #[test]
    fn test_count_is_sum_of_v2_and_exam() {
        let combined =
            assemble_from_parts(None, dataset("pq", 10), dataset("qr", 20), dataset("ex", 5), 42);
        assert_eq!(combined.len(), 35);
    }

    #[test]
    fn test_first_generation_excluded_by_default() {
        let combined =
            assemble_from_parts(None, dataset("pq", 4), dataset("qr", 4), dataset("ex", 2), 42);

        assert!(combined.iter().all(|r| !r.instructions.contains("v1")));
        assert_eq!(combined.len(), 10);
    }

    #[test]
    fn test_first_generation_included_with_flag() {
        let first = Some((dataset("v1pq", 3), dataset("v1qr", 2)));
        let combined =
            assemble_from_parts(first, dataset("pq", 4), dataset("qr", 4), dataset("ex", 2), 42);

        assert_eq!(combined.len(), 15);
        assert!(combined.iter().any(|r| r.instructions.contains("v1pq")));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let a =
            assemble_from_parts(None, dataset("pq", 30), dataset("qr", 30), dataset("ex", 10), 42);
        let b =
            assemble_from_parts(None, dataset("pq", 30), dataset("qr", 30), dataset("ex", 10), 42);

        assert_eq!(a, b);
    }
}
