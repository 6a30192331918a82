//! Retrieval against the external vector index
//!
//! Builds metadata filters from keyfile matches, loosens them progressively
//! when they return nothing, and cleans the resulting chunks before they
//! enter the prompt.

pub mod filter;
pub mod index;
pub mod keyfile;
pub mod orchestrator;
pub mod qdrant;

pub use filter::{build_filter_candidates, FilterCandidate, MatchCondition, MetadataFilter};
pub use index::{Embedder, ScoredChunk, SearchMode, VectorIndex};
pub use keyfile::{extract_key_matches, normalize_keyfile, KeyEntry, KeyMatch};
pub use orchestrator::{RetrievalOrchestrator, RetrievedContent};
pub use qdrant::QdrantIndex;
