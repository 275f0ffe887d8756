//! Sequence packing into fixed-length training windows.

/// Packs tokenized records into windows of at most `max_len` tokens.
///
/// Records are concatenated in order with an EOS separator after each
/// record, then the token stream is chunked into `max_len` windows. The
/// trailing partial window is kept, so every input token appears in
/// exactly one window.
#[must_use]
pub fn pack_sequences(sequences: &[Vec<u32>], max_len: usize, eos_token: u32) -> Vec<Vec<u32>> {
    assert!(max_len > 0, "window length must be positive");

    let total: usize = sequences.iter().map(|s| s.len() + 1).sum();
    let mut stream = Vec::with_capacity(total);
    for sequence in sequences {
        stream.extend_from_slice(sequence);
        stream.push(eos_token);
    }

    stream
        .chunks(max_len)
        .map(<[u32]>::to_vec)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOS: u32 = 99;

    #[test]
    fn test_windows_never_exceed_max_len() {
        let sequences: Vec<Vec<u32>> = (0..10).map(|i| vec![i; 7]).collect();
        let windows = pack_sequences(&sequences, 16, EOS);

        assert!(windows.iter().all(|w| w.len() <= 16));
    }

    #[test]
    fn test_all_tokens_appear_once() {
        let sequences: Vec<Vec<u32>> = vec![vec![1, 2, 3], vec![4, 5], vec![6]];
        let windows = pack_sequences(&sequences, 4, EOS);

        let total: usize = windows.iter().map(Vec::len).sum();
        // 6 tokens + 3 separators.
        assert_eq!(total, 9);

        let flat: Vec<u32> = windows.into_iter().flatten().collect();
        assert_eq!(flat, vec![1, 2, 3, EOS, 4, 5, EOS, 6, EOS]);
    }

    #[test]
    fn test_separator_bounds_each_record() {
        let windows = pack_sequences(&[vec![1, 2], vec![3]], 100, EOS);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0], vec![1, 2, EOS, 3, EOS]);
    }

    #[test]
    fn test_long_record_spans_windows() {
        let windows = pack_sequences(&[vec![7; 10]], 4, EOS);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[2].len(), 3);
    }

    #[test]
    fn test_empty_input() {
        let windows = pack_sequences(&[], 8, EOS);
        assert!(windows.is_empty());
    }
}
