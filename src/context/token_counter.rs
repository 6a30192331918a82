//! Token counting for budget math
//!
//! Two strategies: a character-based heuristic that needs no tokenizer, and
//! an exact counter backed by tiktoken. The exact counter never raises; any
//! tokenizer failure falls back to the heuristic.

use std::sync::Arc;

use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

/// Token counter trait for different counting strategies.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in the given text. Empty text counts zero.
    fn count_tokens(&self, text: &str) -> usize;
}

/// Approximate token counter using character-based heuristics.
///
/// Roughly one token per four characters of English text, with additive
/// corrections for newline density and format-markup sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproximateTokenCounter;

impl ApproximateTokenCounter {
    pub fn new() -> Self {
        Self
    }

    fn estimate(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let char_based = text.chars().count() / 4;
        let special = text.matches('\n').count() / 2
            + text.matches("<|").count()
            + text.matches("[INST]").count() * 2
            + text.matches("<s>").count();

        (char_based + special).max(1)
    }
}

impl TokenCounter for ApproximateTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        Self::estimate(text)
    }
}

/// Exact token counter using the cl100k_base BPE.
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TiktokenCounter {
    /// Create a new tiktoken counter. Returns `None` when the encoding
    /// cannot be initialized; callers should fall back to
    /// [`ApproximateTokenCounter`].
    pub fn new() -> Option<Self> {
        match cl100k_base() {
            Ok(bpe) => Some(Self { bpe: Arc::new(bpe) }),
            Err(e) => {
                warn!("Failed to initialize tiktoken encoding, falling back: {}", e);
                None
            }
        }
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Build the best available counter: exact when tiktoken initializes,
/// approximate otherwise.
pub fn default_counter() -> Arc<dyn TokenCounter> {
    match TiktokenCounter::new() {
        Some(counter) => Arc::new(counter),
        None => Arc::new(ApproximateTokenCounter::new()),
    }
}
