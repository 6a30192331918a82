//! Vector index and embedder trait seams
//!
//! The index itself (and the embedding function it needs) is an external
//! collaborator. The traits here are the narrow boundary the orchestrator
//! talks through; tests substitute in-memory doubles.

use async_trait::async_trait;

use super::filter::MetadataFilter;
use crate::error::IndexError;

/// How a search ranks its results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchMode {
    /// Plain nearest-neighbor search returning distance scores.
    SimilarityWithScore,
    /// Diversity-maximizing (maximal marginal relevance) search.
    Mmr { fetch_k: usize, lambda_mult: f32 },
}

/// One retrieved chunk. The score is a distance, lower is closer; backends
/// reporting similarity must convert. Absent for diversity-ranked results.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub text: String,
    pub score: Option<f32>,
}

/// A searchable vector index.
///
/// A nonexistent collection must yield an empty result, not an error.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
        mode: SearchMode,
    ) -> Result<Vec<ScoredChunk>, IndexError>;
}

/// Embedding function collaborator used by concrete index backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;
}
