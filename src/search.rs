//! Semantic search over indexed debate chunks.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::embeddings::EmbeddingProvider;
use crate::stores::{Backend, SearchFilter};
use crate::types::RagError;

/// One search result, most similar first.
#[derive(Clone, Debug, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub debate_ext_id: String,
    pub chunk_index: usize,
    /// Cosine similarity of the chunk to the query, higher is closer.
    pub score: f32,
    pub content: String,
    pub metadata: serde_json::Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub query: String,
    pub count: usize,
    /// False when the store holds no chunks at all; an empty store is a
    /// defined result, not an error.
    pub populated: bool,
}

/// Validates queries, embeds them, and ranks stored chunks.
pub struct SearchEngine {
    store: Arc<dyn Backend>,
    provider: Arc<dyn EmbeddingProvider>,
    max_top_k: usize,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn Backend>,
        provider: Arc<dyn EmbeddingProvider>,
        max_top_k: usize,
    ) -> Self {
        Self {
            store,
            provider,
            max_top_k: max_top_k.max(1),
        }
    }

    /// Runs a similarity search. Caller errors (blank query, out-of-range
    /// `top_k`, malformed filter) are rejected before any store or provider
    /// access.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<SearchResponse, RagError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidQuery("query must not be blank".into()));
        }
        if top_k == 0 {
            return Err(RagError::InvalidQuery("top_k must be at least 1".into()));
        }
        if top_k > self.max_top_k {
            return Err(RagError::InvalidQuery(format!(
                "top_k {top_k} exceeds maximum {}",
                self.max_top_k
            )));
        }
        filter.validate()?;

        if self.store.count().await? == 0 {
            debug!("search against empty store");
            return Ok(SearchResponse {
                results: Vec::new(),
                query: query.to_string(),
                count: 0,
                populated: false,
            });
        }

        let embeddings = self.provider.embed_batch(&[query.to_string()]).await?;
        let query_embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RagError::EmbeddingUnavailable("provider returned no vector".into()))?;

        let hits = self
            .store
            .search_similar(&query_embedding, top_k, filter)
            .await?;

        let results: Vec<SearchHit> = hits
            .into_iter()
            .map(|(record, score)| SearchHit {
                id: record.id,
                debate_ext_id: record.debate_ext_id,
                chunk_index: record.chunk_index,
                score,
                content: record.content,
                metadata: record.metadata,
            })
            .collect();

        Ok(SearchResponse {
            count: results.len(),
            query: query.to_string(),
            results,
            populated: true,
        })
    }
}
