//! Session configuration
//!
//! All knobs are resolved once at session construction. File loading is the
//! caller's concern; this struct only defines the typed shape and defaults.

use serde::{Deserialize, Serialize};

/// Configuration for retrieval behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Primary ("fact") collection name.
    pub collection: String,
    /// Baseline result count for the primary collection.
    pub rag_k: usize,
    /// Result count for the companion style-example collection.
    pub rag_k_mes: usize,
    /// Use diversity-maximizing (MMR) search instead of plain similarity.
    pub use_mmr: bool,
    /// Candidate pool size for MMR re-ranking; floored at k.
    pub fetch_k: usize,
    /// MMR relevance/diversity balance (1.0 = pure relevance).
    pub lambda_mult: f32,
    /// Optional distance ceiling for similarity search results.
    pub score_threshold: Option<f32>,
    /// Estimated tokens per retrieved chunk, used to size dynamic k.
    pub chunk_size_estimate: usize,
    /// Ceiling on dynamically sized retrieval.
    pub max_initial_retrieval: usize,
    /// Share of the dynamic budget earmarked for retrieved context when
    /// sizing k. Kept at f64 so the default share times a round budget
    /// divides without drift.
    pub context_budget_share: f64,
    /// Regex deny-list for known boilerplate chunks; matching chunks are
    /// dropped during cleanup.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            collection: String::new(),
            rag_k: 7,
            rag_k_mes: 7,
            use_mmr: true,
            fetch_k: 20,
            lambda_mult: 0.75,
            score_threshold: None,
            chunk_size_estimate: 150,
            max_initial_retrieval: 20,
            context_budget_share: 0.45,
            deny_patterns: Vec::new(),
        }
    }
}

/// Configuration for the stream governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Hard ceiling on accumulated raw characters; 0 disables.
    pub max_stream_chars: usize,
    /// Ceiling on whitespace-only characters before any visible output;
    /// 0 disables.
    pub max_silent_stream_chars: usize,
    /// Sentence emitted when the stream fails or produces nothing visible.
    pub empty_stream_fallback: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_stream_chars: 6000,
            max_silent_stream_chars: 200,
            empty_stream_fallback:
                "I am unable to produce a visible response right now. Please try again."
                    .to_string(),
        }
    }
}

/// Configuration for the response quality gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Minimum cleaned length in characters (roughly 10 tokens).
    pub min_response_chars: usize,
    /// Assistant text stored in place of a rejected response.
    pub fallback_response: String,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_response_chars: 40,
            fallback_response:
                "I will not repeat myself. Ask your question with more specificity.".to_string(),
        }
    }
}

/// Top-level session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model context window in tokens.
    pub context_window: usize,
    /// Tokens reserved for the model's reply.
    pub reserved_for_response: usize,
    /// Minimum conversation turns kept in every prompt.
    pub min_history_turns: usize,
    /// Maximum conversation turns used in a prompt.
    pub max_history_turns: usize,
    /// Capacity of the stored history (turn pairs); oldest evicted beyond it.
    pub history_capacity: usize,
    /// Apply budget-driven allocation after the first turn.
    pub use_dynamic_context: bool,
    /// Minimum dynamic budget (tokens) required for dynamic allocation;
    /// below it the turn falls back to static retrieval.
    pub dynamic_budget_floor: usize,
    /// Name used for the human side of the transcript.
    pub user_name: String,
    pub retrieval: RetrievalConfig,
    pub stream: StreamConfig,
    pub quality: QualityConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_window: 4096,
            reserved_for_response: 256,
            min_history_turns: 1,
            max_history_turns: 8,
            history_capacity: 10,
            use_dynamic_context: true,
            dynamic_budget_floor: 500,
            user_name: "User".to_string(),
            retrieval: RetrievalConfig::default(),
            stream: StreamConfig::default(),
            quality: QualityConfig::default(),
        }
    }
}
