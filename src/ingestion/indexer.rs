//! Single-debate indexing: fetch, chunk, embed, upsert.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use crate::api::DebateSource;
use crate::api::models::Debate;
use crate::chunking::{DebateChunk, DebateChunker};
use crate::config::RagConfig;
use crate::embeddings::EmbeddingProvider;
use crate::ingestion::scheduler::CancelSignal;
use crate::stores::{Backend, ChunkRecord};
use crate::types::RagError;

/// Outcome of indexing one debate.
#[derive(Clone, Debug)]
pub struct IndexedDebate {
    pub ext_id: String,
    pub chunks_written: usize,
    /// Chunks dropped because their batch could not be embedded.
    pub chunks_skipped: usize,
}

/// Drives the fetch → chunk → embed → upsert pipeline for one debate at a
/// time. Stateless apart from its collaborators; safe to share.
pub struct DebateIndexer {
    source: Arc<dyn DebateSource>,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn Backend>,
    chunker: DebateChunker,
    batch_size: usize,
    retry_attempts: u32,
    retry_base: Duration,
}

impl DebateIndexer {
    pub fn new(
        config: &RagConfig,
        source: Arc<dyn DebateSource>,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn Backend>,
    ) -> Result<Self, RagError> {
        let chunker = DebateChunker::new(config.min_chunk_chars, config.max_chunk_chars)?;
        Ok(Self {
            source,
            provider,
            store,
            chunker,
            batch_size: config.embed_batch_size.max(1),
            retry_attempts: config.embed_retry_attempts.max(1),
            retry_base: config.embed_retry_base,
        })
    }

    /// Indexes one debate end to end. Each stage races the cancel signal;
    /// once cancelled, nothing further is written. A batch whose embedding
    /// fails after retries is skipped rather than failing the whole debate.
    pub async fn index_debate(
        &self,
        ext_id: &str,
        cancel: &CancelSignal,
    ) -> Result<IndexedDebate, RagError> {
        let debate = tokio::select! {
            _ = cancel.cancelled() => return Err(RagError::Cancelled),
            fetched = self.source.fetch_debate(ext_id) => fetched?,
        };

        let chunks = self.chunker.chunk_debate(&debate, ext_id);
        if chunks.is_empty() {
            info!(ext_id, "debate has no attributed contributions");
            return Ok(IndexedDebate {
                ext_id: ext_id.to_string(),
                chunks_written: 0,
                chunks_skipped: 0,
            });
        }

        let mut written = 0usize;
        let mut skipped = 0usize;
        for batch in chunks.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(RagError::Cancelled);
            }
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();

            let embeddings = tokio::select! {
                _ = cancel.cancelled() => return Err(RagError::Cancelled),
                result = self.embed_with_retry(&texts) => result,
            };
            let embeddings = match embeddings {
                Ok(vectors) => vectors,
                Err(err) => {
                    warn!(ext_id, batch = batch.len(), error = %err, "embedding batch skipped");
                    skipped += batch.len();
                    continue;
                }
            };

            let records: Vec<ChunkRecord> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| self.to_record(chunk, &debate, embedding))
                .collect();

            written += tokio::select! {
                _ = cancel.cancelled() => return Err(RagError::Cancelled),
                result = self.store.upsert_chunks(records) => result?,
            };
        }

        info!(ext_id, written, skipped, "debate indexed");
        Ok(IndexedDebate {
            ext_id: ext_id.to_string(),
            chunks_written: written,
            chunks_skipped: skipped,
        })
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut attempt = 1u32;
        loop {
            match self.provider.embed_batch(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.retryable_embedding() && attempt < self.retry_attempts => {
                    let backoff = self.retry_base.saturating_mul(1 << (attempt - 1));
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "embedding failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn to_record(&self, chunk: &DebateChunk, debate: &Debate, embedding: Vec<f32>) -> ChunkRecord {
        let overview = debate.overview.as_ref();
        let metadata = json!({
            "title": overview.map(|o| o.title.clone()),
            "date": overview.map(|o| o.date.to_string()),
            "house": overview.and_then(|o| o.house.clone()),
            "location": overview.and_then(|o| o.location.clone()),
            "member_id": chunk.member_id,
            "attributed_to": chunk.attributed_to,
            "item_id": chunk.item_id,
        });

        ChunkRecord::new(
            chunk.id.clone(),
            chunk.debate_ext_id.clone(),
            chunk.chunk_index,
            chunk.content.clone(),
        )
        .with_member_id(Some(chunk.member_id))
        .with_house(overview.and_then(|o| o.house.clone()))
        .with_sitting_date(overview.map(|o| o.date.date()))
        .with_metadata(metadata)
        .with_embedding(embedding)
    }
}
