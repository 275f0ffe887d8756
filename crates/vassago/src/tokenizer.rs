//! Tokenizer wrapper configured for causal-LM fine-tuning.

use std::path::Path;

use phenex_core::{Error, Result};

/// Padding side applied when batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingSide {
    /// Pad on the left.
    Left,
    /// Pad on the right.
    Right,
}

/// Wrapper around `tokenizers` for encoding and training configuration.
pub struct Tokenizer {
    inner: tokenizers::Tokenizer,
    /// End of sequence token ID.
    eos_token_id: Option<u32>,
    /// Padding token ID.
    pad_token_id: Option<u32>,
    /// Padding side.
    padding_side: PaddingSide,
}

impl Tokenizer {
    /// Loads a tokenizer from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the tokenizer cannot be loaded.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| Error::tokenization(e.to_string()))?;

        Ok(Self::from_tokenizer(inner))
    }

    fn from_tokenizer(inner: tokenizers::Tokenizer) -> Self {
        let eos_token_id = ["</s>", "<|end_of_text|>", "<|eot_id|>"]
            .iter()
            .find_map(|token| inner.token_to_id(token));

        let pad_token_id = ["<pad>", "[PAD]"]
            .iter()
            .find_map(|token| inner.token_to_id(token));

        Self {
            inner,
            eos_token_id,
            pad_token_id,
            padding_side: PaddingSide::Right,
        }
    }

    /// Configures padding conventions for fine-tuning.
    ///
    /// The base tokenizer defines no dedicated padding token, so the
    /// padding token is aliased to the end-of-sequence token and padding
    /// is forced to the right side.
    ///
    /// # Errors
    ///
    /// Returns an error if no end-of-sequence token is defined.
    pub fn configure_for_training(&mut self) -> Result<()> {
        let eos = self
            .eos_token_id
            .ok_or_else(|| Error::tokenization("Tokenizer defines no end-of-sequence token"))?;

        self.pad_token_id = Some(eos);
        self.padding_side = PaddingSide::Right;
        Ok(())
    }

    /// Encodes text to token IDs.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| Error::tokenization(e.to_string()))?;

        Ok(encoding.get_ids().to_vec())
    }

    /// Returns the vocabulary size.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Returns the end-of-sequence token ID, if any.
    #[must_use]
    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    /// Returns the padding token ID, if any.
    #[must_use]
    pub fn pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }

    /// Returns the configured padding side.
    #[must_use]
    pub fn padding_side(&self) -> PaddingSide {
        self.padding_side
    }

    /// Saves the tokenizer state to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the tokenizer cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inner
            .save(path.as_ref(), false)
            .map_err(|e| Error::tokenization(e.to_string()))
    }
}
