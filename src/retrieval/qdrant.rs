//! Qdrant-backed vector index
//!
//! Adapter between the [`VectorIndex`] seam and a Qdrant instance. Metadata
//! filters map onto keyword field conditions. Qdrant has no server-side
//! diversity search, so MMR re-ranks a larger candidate pool client-side
//! using the vectors returned with each hit.

use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::client::QdrantClient;
use qdrant_client::qdrant::{
    condition::ConditionOneOf, r#match::MatchValue, value::Kind, vectors::VectorsOptions,
    Condition, FieldCondition, Filter, Match, ScoredPoint, SearchPoints,
};
use tracing::{debug, warn};

use super::filter::{MatchCondition, MetadataFilter};
use super::index::{Embedder, ScoredChunk, SearchMode, VectorIndex};
use crate::error::IndexError;

/// Payload fields checked, in order, for a chunk's text.
const PAYLOAD_TEXT_FIELDS: &[&str] = &["text", "page_content", "content"];

/// Vector index backed by a Qdrant collection per corpus.
pub struct QdrantIndex {
    client: QdrantClient,
    embedder: Arc<dyn Embedder>,
}

impl QdrantIndex {
    pub fn new(client: QdrantClient, embedder: Arc<dyn Embedder>) -> Self {
        Self { client, embedder }
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, IndexError> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| IndexError::Backend(format!("Failed to list collections: {}", e)))?;
        Ok(collections
            .collections
            .iter()
            .any(|c| c.name == collection))
    }

    fn build_filter(filter: &MetadataFilter) -> Filter {
        match filter {
            MetadataFilter::AllOf(conditions) => Filter {
                must: conditions.iter().map(keyword_condition).collect(),
                ..Default::default()
            },
            MetadataFilter::AnyOf(conditions) => Filter {
                should: conditions.iter().map(keyword_condition).collect(),
                ..Default::default()
            },
        }
    }

    async fn search_points(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<Filter>,
        with_vectors: bool,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: collection.to_string(),
                vector,
                filter,
                limit: limit as u64,
                with_payload: Some(true.into()),
                with_vectors: if with_vectors {
                    Some(true.into())
                } else {
                    None
                },
                ..Default::default()
            })
            .await
            .map_err(|e| IndexError::Backend(format!("Search failed: {}", e)))?;
        Ok(response.result)
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
        mode: SearchMode,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }
        if !self.collection_exists(collection).await? {
            debug!("Collection '{}' does not exist; returning empty result", collection);
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;
        let qdrant_filter = filter.map(Self::build_filter);

        match mode {
            SearchMode::SimilarityWithScore => {
                let points = self
                    .search_points(collection, query_vector, k, qdrant_filter, false)
                    .await?;
                Ok(points
                    .iter()
                    .filter_map(|point| {
                        Some(ScoredChunk {
                            text: point_text(point)?.to_string(),
                            // Qdrant reports similarity, higher is better;
                            // the trait's score is a distance.
                            score: Some(1.0 - point.score),
                        })
                    })
                    .collect())
            }
            SearchMode::Mmr {
                fetch_k,
                lambda_mult,
            } => {
                // fetch_k must be at least k for the re-rank pool.
                let pool = self
                    .search_points(collection, query_vector.clone(), fetch_k.max(k), qdrant_filter, true)
                    .await?;
                let candidates: Vec<(String, Vec<f32>)> = pool
                    .iter()
                    .filter_map(|point| {
                        Some((point_text(point)?.to_string(), point_vector(point)?))
                    })
                    .collect();
                if candidates.len() < pool.len() {
                    warn!(
                        "Dropped {} hits without text or vectors during MMR re-rank",
                        pool.len() - candidates.len()
                    );
                }
                Ok(mmr_select(&query_vector, candidates, k, lambda_mult)
                    .into_iter()
                    .map(|text| ScoredChunk { text, score: None })
                    .collect())
            }
        }
    }
}

fn keyword_condition(condition: &MatchCondition) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: condition.id.clone(),
            r#match: Some(Match {
                match_value: Some(MatchValue::Keyword(condition.text.clone())),
            }),
            ..Default::default()
        })),
    }
}

fn point_text(point: &ScoredPoint) -> Option<&str> {
    for field in PAYLOAD_TEXT_FIELDS {
        if let Some(value) = point.payload.get(*field) {
            if let Some(Kind::StringValue(text)) = &value.kind {
                return Some(text);
            }
        }
    }
    None
}

fn point_vector(point: &ScoredPoint) -> Option<Vec<f32>> {
    match point.vectors.as_ref()?.vectors_options.as_ref()? {
        VectorsOptions::Vector(v) => Some(v.data.clone()),
        _ => None,
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Greedy maximal-marginal-relevance selection over a candidate pool.
fn mmr_select(
    query: &[f32],
    candidates: Vec<(String, Vec<f32>)>,
    k: usize,
    lambda_mult: f32,
) -> Vec<String> {
    let mut remaining: Vec<(String, Vec<f32>, f32)> = candidates
        .into_iter()
        .map(|(text, vector)| {
            let relevance = cosine_similarity(query, &vector);
            (text, vector, relevance)
        })
        .collect();
    let mut selected: Vec<(String, Vec<f32>)> = Vec::new();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;
        let mut best_redundancy = f32::INFINITY;
        for (idx, (_, vector, relevance)) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|(_, sel)| cosine_similarity(vector, sel))
                .fold(0.0_f32, f32::max);
            let score = lambda_mult * relevance - (1.0 - lambda_mult) * redundancy;
            // Ties go to the less redundant candidate.
            if score > best_score || (score == best_score && redundancy < best_redundancy) {
                best_score = score;
                best_redundancy = redundancy;
                best_idx = idx;
            }
        }
        let (text, vector, _) = remaining.remove(best_idx);
        selected.push((text, vector));
    }

    selected.into_iter().map(|(text, _)| text).collect()
}
