//! Token counting used to keep stored content inside embedding input limits.

use std::path::Path;

use crate::error::LlmError;

/// Counts and truncates text in model tokens.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens `text` encodes to.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying tokenizer fails.
    fn count(&self, text: &str) -> Result<usize, LlmError>;

    /// Longest prefix of `text` that encodes to at most `max_tokens` tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying tokenizer fails.
    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String, LlmError>;
}

/// Estimate token count using chars/4 heuristic.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Tokenizer-free counter built on [`estimate_tokens`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> Result<usize, LlmError> {
        Ok(estimate_tokens(text))
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String, LlmError> {
        if estimate_tokens(text) <= max_tokens {
            return Ok(text.to_owned());
        }
        let max_chars = max_tokens.saturating_mul(4);
        Ok(text.chars().take(max_chars).collect())
    }
}

/// Counter backed by a Hugging Face `tokenizer.json`.
pub struct HfTokenCounter {
    tokenizer: tokenizers::Tokenizer,
}

impl std::fmt::Debug for HfTokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfTokenCounter").finish_non_exhaustive()
    }
}

impl HfTokenCounter {
    /// Load a tokenizer definition from disk.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Tokenizer`] if the file is missing or malformed.
    pub fn from_file(path: &Path) -> Result<Self, LlmError> {
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| LlmError::Tokenizer(format!("{}: {e}", path.display())))?;
        Ok(Self { tokenizer })
    }

    fn encode(&self, text: &str) -> Result<tokenizers::Encoding, LlmError> {
        self.tokenizer
            .encode(text, false)
            .map_err(|e| LlmError::Tokenizer(e.to_string()))
    }
}

impl TokenCounter for HfTokenCounter {
    fn count(&self, text: &str) -> Result<usize, LlmError> {
        Ok(self.encode(text)?.len())
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String, LlmError> {
        let encoding = self.encode(text)?;
        if encoding.len() <= max_tokens {
            return Ok(text.to_owned());
        }

        let offsets = encoding.get_offsets();
        // Re-tokenizing a prefix can merge differently, so walk back until it fits.
        for idx in (0..=max_tokens).rev() {
            let mut cut = offsets.get(idx).map_or(text.len(), |o| o.0).min(text.len());
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            let candidate = &text[..cut];
            if self.count(candidate)? <= max_tokens {
                return Ok(candidate.to_owned());
            }
        }
        Ok(String::new())
    }
}
