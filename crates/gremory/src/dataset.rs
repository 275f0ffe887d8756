//! In-memory instruction dataset with deterministic splitting and shuffling.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::record::InstructionRecord;

/// An ordered sequence of instruction records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionDataset {
    records: Vec<InstructionRecord>,
}

impl InstructionDataset {
    /// Creates an empty dataset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dataset from a record vector.
    #[must_use]
    pub fn from_records(records: Vec<InstructionRecord>) -> Self {
        Self { records }
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a record.
    pub fn push(&mut self, record: InstructionRecord) {
        self.records.push(record);
    }

    /// Returns the record at `idx`, if any.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&InstructionRecord> {
        self.records.get(idx)
    }

    /// Returns the underlying records in order.
    #[must_use]
    pub fn records(&self) -> &[InstructionRecord] {
        &self.records
    }

    /// Iterates over the records in order.
    pub fn iter(&self) -> std::slice::Iter<'_, InstructionRecord> {
        self.records.iter()
    }

    /// Concatenates datasets in the given order.
    #[must_use]
    pub fn concatenate(parts: Vec<InstructionDataset>) -> Self {
        let mut records = Vec::with_capacity(parts.iter().map(Self::len).sum());
        for part in parts {
            records.extend(part.records);
        }
        Self { records }
    }

    /// Shuffles the records in place with a fixed seed.
    ///
    /// Two shuffles of identical inputs with the same seed produce
    /// identical record order.
    pub fn shuffle(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.records.shuffle(&mut rng);
    }

    /// Splits into train and test partitions after a seeded shuffle.
    ///
    /// `test_size` is the fraction of records assigned to the test
    /// partition, clamped so both partitions stay within bounds.
    #[must_use]
    pub fn train_test_split(mut self, test_size: f32, seed: u64) -> (Self, Self) {
        self.shuffle(seed);

        let test_len = ((self.records.len() as f32) * test_size.clamp(0.0, 1.0)).round() as usize;
        let test_len = test_len.min(self.records.len());
        let split_at = self.records.len() - test_len;

        let test = self.records.split_off(split_at);
        (Self { records: self.records }, Self { records: test })
    }
}

impl<'a> IntoIterator for &'a InstructionDataset {
    type Item = &'a InstructionRecord;
    type IntoIter = std::slice::Iter<'a, InstructionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> InstructionDataset {
        InstructionDataset::from_records(
            (0..n)
                .map(|i| InstructionRecord::from_pair(&format!("q{i}"), &format!("a{i}")))
                .collect(),
        )
    }

    #[test]
    fn test_concatenate_preserves_order() {
        let combined = InstructionDataset::concatenate(vec![dataset(2), dataset(3)]);
        assert_eq!(combined.len(), 5);
        assert!(combined.get(0).unwrap().instructions.contains("q0"));
        assert!(combined.get(2).unwrap().instructions.contains("q0"));
    }

    #[test]
    fn test_shuffle_is_deterministic() {
        let mut a = dataset(100);
        let mut b = dataset(100);

        a.shuffle(42);
        b.shuffle(42);

        assert_eq!(a, b);
    }

    #[test]
    fn test_shuffle_seed_changes_order() {
        let mut a = dataset(100);
        let mut b = dataset(100);

        a.shuffle(42);
        b.shuffle(43);

        assert_ne!(a, b);
    }

    #[test]
    fn test_train_test_split_sizes() {
        let (train, test) = dataset(100).train_test_split(0.2, 42);
        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);
    }

    #[test]
    fn test_train_test_split_deterministic() {
        let (_, test_a) = dataset(50).train_test_split(0.2, 42);
        let (_, test_b) = dataset(50).train_test_split(0.2, 42);
        assert_eq!(test_a, test_b);
    }

    #[test]
    fn test_split_covers_all_records() {
        let (train, test) = dataset(11).train_test_split(0.2, 7);
        assert_eq!(train.len() + test.len(), 11);
    }
}
