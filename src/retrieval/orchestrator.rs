//! Retrieval orchestration
//!
//! Queries the primary ("fact") collection with progressively looser
//! metadata filters derived from the keyfile, queries the companion style
//! collection unfiltered, and cleans the returned chunks. Retrieval never
//! fails a turn; total failure degrades to empty context.

use std::collections::HashSet;
use std::sync::Arc;

use regex::RegexSet;
use regex::RegexSetBuilder;
use tracing::{debug, warn};

use super::filter::{build_filter_candidates, FilterCandidate};
use super::index::{SearchMode, VectorIndex};
use super::keyfile::{extract_key_matches, KeyEntry};
use crate::config::RetrievalConfig;
use crate::error::{Result, SessionError};

/// Cleaned retrieval output for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievedContent {
    /// Background context from the primary collection, blank-line joined.
    pub context: String,
    /// Style examples from the companion collection, blank-line joined.
    pub examples: String,
}

/// Drives index searches for one session.
pub struct RetrievalOrchestrator {
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
    keys: Vec<KeyEntry>,
    deny_list: RegexSet,
    character_name: String,
}

impl RetrievalOrchestrator {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
        keys: Vec<KeyEntry>,
        character_name: impl Into<String>,
    ) -> Result<Self> {
        let deny_list = RegexSetBuilder::new(&config.deny_patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| SessionError::Configuration(format!("Invalid deny pattern: {}", e)))?;
        Ok(Self {
            index,
            config,
            keys,
            deny_list,
            character_name: character_name.into(),
        })
    }

    /// Size the primary retrieval from the turn's dynamic budget: the share
    /// reserved for context divided by the per-chunk estimate, clamped
    /// between the configured k and the retrieval ceiling.
    pub fn dynamic_k(&self, dynamic_budget: usize) -> usize {
        let context_share = dynamic_budget as f64 * self.config.context_budget_share;
        let sized = (context_share / self.config.chunk_size_estimate.max(1) as f64) as usize;
        sized
            .max(self.config.rag_k)
            .min(self.config.max_initial_retrieval)
    }

    /// Retrieve and clean context and style examples for a query.
    ///
    /// `k` overrides the configured primary result count when given. Index
    /// failures on one filter candidate fall through to the next; the final
    /// unfiltered candidate is accepted even when empty, so "no grounding
    /// found" is an ordinary outcome.
    pub async fn retrieve(&self, query: &str, k: Option<usize>) -> RetrievedContent {
        if self.config.collection.is_empty() || query.is_empty() {
            return RetrievedContent::default();
        }

        // The character name orients the embedding search toward the
        // character's domain; key matching stays on the raw query.
        let enriched = if self.character_name.is_empty() {
            query.to_string()
        } else {
            format!("{} {}", self.character_name, query)
        };

        let matches = extract_key_matches(&self.keys, query);
        let candidates = build_filter_candidates(&matches);
        let primary_k = k.unwrap_or(self.config.rag_k);

        let context_chunks = self
            .search_with_loosening(&self.config.collection, &enriched, primary_k, &candidates)
            .await;

        // Style examples are always unfiltered: the goal is stylistic match,
        // not factual grounding.
        let mes_collection = format!("{}_mes", self.config.collection);
        let mes_k = k.unwrap_or(self.config.rag_k_mes);
        let mes_chunks = self
            .search_with_loosening(&mes_collection, &enriched, mes_k, &[None])
            .await;

        RetrievedContent {
            context: self.clean_chunks(context_chunks).join("\n\n"),
            examples: self.clean_chunks(mes_chunks).join("\n\n"),
        }
    }

    async fn search_with_loosening(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        candidates: &[FilterCandidate],
    ) -> Vec<String> {
        let mode = self.search_mode(k);
        for (attempt, candidate) in candidates.iter().enumerate() {
            let result = self
                .index
                .search(collection, query, k, candidate.as_ref(), mode)
                .await;
            match result {
                Ok(chunks) => {
                    let texts: Vec<String> = chunks
                        .into_iter()
                        .filter(|chunk| match (self.config.score_threshold, chunk.score) {
                            (Some(threshold), Some(score)) => score <= threshold,
                            _ => true,
                        })
                        .map(|chunk| chunk.text)
                        .collect();
                    if !texts.is_empty() || candidate.is_none() {
                        debug!(
                            "{}: accepted search #{} with {} chunks",
                            collection,
                            attempt + 1,
                            texts.len()
                        );
                        return texts;
                    }
                    debug!("{}: search #{} empty; loosening filter", collection, attempt + 1);
                }
                Err(e) => {
                    warn!(
                        "{}: search #{} failed ({}); trying looser filter",
                        collection,
                        attempt + 1,
                        e
                    );
                }
            }
        }
        Vec::new()
    }

    fn search_mode(&self, k: usize) -> SearchMode {
        if self.config.use_mmr {
            SearchMode::Mmr {
                // fetch_k must be >= k; when the configured pool is smaller
                // than k, k is the floor.
                fetch_k: self.config.fetch_k.max(k),
                lambda_mult: self.config.lambda_mult,
            }
        } else {
            SearchMode::SimilarityWithScore
        }
    }

    /// Drop empty chunks, exact duplicates (first wins), and deny-listed
    /// boilerplate, preserving order.
    fn clean_chunks(&self, chunks: Vec<String>) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut cleaned = Vec::new();
        for chunk in chunks {
            let normalized = chunk.trim();
            if normalized.is_empty() {
                continue;
            }
            if seen.contains(normalized) {
                continue;
            }
            if !self.deny_list.is_empty() && self.deny_list.is_match(normalized) {
                debug!("Dropping boilerplate chunk: {:.60}", normalized);
                continue;
            }
            seen.insert(normalized.to_string());
            cleaned.push(normalized.to_string());
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::retrieval::filter::MetadataFilter;
    use crate::retrieval::index::ScoredChunk;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted index double: responses keyed by (collection, filter shape).
    #[derive(Default)]
    struct StubIndex {
        responses: Mutex<Vec<(String, FilterShape, StubResult)>>,
        calls: Mutex<Vec<(String, FilterShape)>>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FilterShape {
        AllOf,
        AnyOf,
        Unfiltered,
    }

    enum StubResult {
        Chunks(Vec<ScoredChunk>),
        Error,
    }

    fn shape(filter: Option<&MetadataFilter>) -> FilterShape {
        match filter {
            Some(MetadataFilter::AllOf(_)) => FilterShape::AllOf,
            Some(MetadataFilter::AnyOf(_)) => FilterShape::AnyOf,
            None => FilterShape::Unfiltered,
        }
    }

    impl StubIndex {
        fn respond(self, collection: &str, filter: FilterShape, chunks: Vec<&str>) -> Self {
            self.responses.lock().unwrap().push((
                collection.to_string(),
                filter,
                StubResult::Chunks(
                    chunks
                        .into_iter()
                        .map(|text| ScoredChunk {
                            text: text.to_string(),
                            score: None,
                        })
                        .collect(),
                ),
            ));
            self
        }

        fn respond_scored(
            self,
            collection: &str,
            filter: FilterShape,
            chunks: Vec<(&str, f32)>,
        ) -> Self {
            self.responses.lock().unwrap().push((
                collection.to_string(),
                filter,
                StubResult::Chunks(
                    chunks
                        .into_iter()
                        .map(|(text, score)| ScoredChunk {
                            text: text.to_string(),
                            score: Some(score),
                        })
                        .collect(),
                ),
            ));
            self
        }

        fn fail(self, collection: &str, filter: FilterShape) -> Self {
            self.responses.lock().unwrap().push((
                collection.to_string(),
                filter,
                StubResult::Error,
            ));
            self
        }
    }

    #[async_trait]
    impl VectorIndex for StubIndex {
        async fn search(
            &self,
            collection: &str,
            _query: &str,
            _k: usize,
            filter: Option<&MetadataFilter>,
            _mode: SearchMode,
        ) -> std::result::Result<Vec<ScoredChunk>, IndexError> {
            let filter_shape = shape(filter);
            self.calls
                .lock()
                .unwrap()
                .push((collection.to_string(), filter_shape));
            let responses = self.responses.lock().unwrap();
            for (coll, resp_shape, result) in responses.iter() {
                if coll == collection && *resp_shape == filter_shape {
                    return match result {
                        StubResult::Chunks(chunks) => Ok(chunks.clone()),
                        StubResult::Error => Err(IndexError::Backend("boom".to_string())),
                    };
                }
            }
            Ok(Vec::new())
        }
    }

    fn key(id: &str, text: &str) -> KeyEntry {
        KeyEntry {
            id: id.to_string(),
            text: text.to_string(),
            aliases: Vec::new(),
            category: None,
        }
    }

    fn orchestrator_with(
        index: StubIndex,
        keys: Vec<KeyEntry>,
        deny: Vec<&str>,
    ) -> RetrievalOrchestrator {
        let config = RetrievalConfig {
            collection: "facts".to_string(),
            deny_patterns: deny.into_iter().map(str::to_string).collect(),
            ..RetrievalConfig::default()
        };
        RetrievalOrchestrator::new(Arc::new(index), config, keys, "Entity").unwrap()
    }

    #[tokio::test]
    async fn test_filter_loosening_and_to_or() {
        let index = StubIndex::default()
            .respond("facts", FilterShape::AllOf, vec![])
            .respond("facts", FilterShape::AnyOf, vec!["chunk from or"]);
        let keys = vec![key("a", "alpha"), key("b", "beta")];
        let orch = orchestrator_with(index, keys, vec![]);
        let content = orch.retrieve("alpha and beta together", None).await;
        assert_eq!(content.context, "chunk from or");
    }

    #[tokio::test]
    async fn test_empty_unfiltered_accepted() {
        let index = StubIndex::default();
        let orch = orchestrator_with(index, vec![], vec![]);
        let content = orch.retrieve("no keys match this", None).await;
        assert_eq!(content.context, "");
        assert_eq!(content.examples, "");
    }

    #[tokio::test]
    async fn test_candidate_failure_falls_through() {
        let index = StubIndex::default()
            .fail("facts", FilterShape::AllOf)
            .respond("facts", FilterShape::AnyOf, vec!["recovered"]);
        let keys = vec![key("a", "alpha"), key("b", "beta")];
        let orch = orchestrator_with(index, keys, vec![]);
        let content = orch.retrieve("alpha beta", None).await;
        assert_eq!(content.context, "recovered");
    }

    #[tokio::test]
    async fn test_companion_always_unfiltered() {
        let index = StubIndex::default()
            .respond("facts", FilterShape::AllOf, vec!["fact"])
            .respond("facts_mes", FilterShape::Unfiltered, vec!["style"]);
        let keys = vec![key("a", "alpha")];
        let orch = orchestrator_with(index, keys, vec![]);
        let content = orch.retrieve("alpha", None).await;
        assert_eq!(content.context, "fact");
        assert_eq!(content.examples, "style");
    }

    #[tokio::test]
    async fn test_cleanup_dedupes_and_denies() {
        let index = StubIndex::default().respond(
            "facts",
            FilterShape::Unfiltered,
            vec!["keep me", "  keep me  ", "", "boilerplate intro text", "second"],
        );
        let orch = orchestrator_with(index, vec![], vec![r"boilerplate intro"]);
        let content = orch.retrieve("anything", None).await;
        assert_eq!(content.context, "keep me\n\nsecond");
    }

    #[tokio::test]
    async fn test_score_threshold_keeps_nearest_chunks() {
        let index = StubIndex::default().respond_scored(
            "facts",
            FilterShape::Unfiltered,
            vec![("near", 0.2), ("far", 0.8)],
        );
        let config = RetrievalConfig {
            collection: "facts".to_string(),
            use_mmr: false,
            score_threshold: Some(0.4),
            ..RetrievalConfig::default()
        };
        let orch = RetrievalOrchestrator::new(Arc::new(index), config, vec![], "Entity").unwrap();
        let content = orch.retrieve("anything", None).await;
        // Scores are distances: only the low-distance chunk survives.
        assert_eq!(content.context, "near");
    }

    #[test]
    fn test_dynamic_k_clamped() {
        let orch = orchestrator_with(StubIndex::default(), vec![], vec![]);
        // Tiny budget clamps up to rag_k.
        assert_eq!(orch.dynamic_k(100), 7);
        // 3000 * 0.45 / 150 = 9.
        assert_eq!(orch.dynamic_k(3000), 9);
        // Huge budget clamps to the ceiling.
        assert_eq!(orch.dynamic_k(1_000_000), 20);
    }

    #[test]
    fn test_invalid_deny_pattern_is_fatal() {
        let config = RetrievalConfig {
            deny_patterns: vec!["(unclosed".to_string()],
            ..RetrievalConfig::default()
        };
        let result =
            RetrievalOrchestrator::new(Arc::new(StubIndex::default()), config, vec![], "X");
        assert!(result.is_err());
    }
}
