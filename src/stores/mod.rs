//! Vector store abstraction and the records it holds.

pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::RagError;

pub use sqlite::SqliteChunkStore;

/// One stored chunk: content, structured fields used by filters, free-form
/// metadata, and (on the write path) its embedding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Stable key: `{debate_ext_id}-{chunk_index:05}`.
    pub id: String,
    pub debate_ext_id: String,
    pub chunk_index: usize,
    pub member_id: Option<i64>,
    pub house: Option<String>,
    pub sitting_date: Option<NaiveDate>,
    pub content: String,
    pub metadata: serde_json::Value,
    /// Present on insert; not read back by queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl ChunkRecord {
    pub fn new(
        id: impl Into<String>,
        debate_ext_id: impl Into<String>,
        chunk_index: usize,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            debate_ext_id: debate_ext_id.into(),
            chunk_index,
            member_id: None,
            house: None,
            sitting_date: None,
            content: content.into(),
            metadata: serde_json::Value::Null,
            embedding: None,
        }
    }

    #[must_use]
    pub fn with_member_id(mut self, member_id: Option<i64>) -> Self {
        self.member_id = member_id;
        self
    }

    #[must_use]
    pub fn with_house(mut self, house: Option<String>) -> Self {
        self.house = house;
        self
    }

    #[must_use]
    pub fn with_sitting_date(mut self, sitting_date: Option<NaiveDate>) -> Self {
        self.sitting_date = sitting_date;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// One structured condition a search result must satisfy. Predicates
/// combine conjunctively.
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataPredicate {
    /// Restrict to one debate's chunks.
    DebateIs(String),
    /// Restrict to contributions by one member.
    MemberIs(i64),
    /// Restrict to one house, compared case-insensitively.
    HouseIs(String),
    /// Sitting date at or after the given day.
    SatOnOrAfter(NaiveDate),
    /// Sitting date strictly before the given day.
    SatBefore(NaiveDate),
}

/// Structured and textual constraints applied to a similarity search.
#[derive(Clone, Debug, Default)]
pub struct SearchFilter {
    pub predicates: Vec<MetadataPredicate>,
    /// Case-insensitive substring the chunk content must contain.
    pub contains: Option<String>,
}

impl SearchFilter {
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_predicate(mut self, predicate: MetadataPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    #[must_use]
    pub fn with_contains(mut self, needle: impl Into<String>) -> Self {
        self.contains = Some(needle.into());
        self
    }

    /// Rejects filters that can never match or carry empty operands.
    pub fn validate(&self) -> Result<(), RagError> {
        for predicate in &self.predicates {
            match predicate {
                MetadataPredicate::DebateIs(ext_id) if ext_id.trim().is_empty() => {
                    return Err(RagError::InvalidQuery("empty debate id in filter".into()));
                }
                MetadataPredicate::HouseIs(house) if house.trim().is_empty() => {
                    return Err(RagError::InvalidQuery("empty house in filter".into()));
                }
                _ => {}
            }
        }
        if let Some(needle) = &self.contains {
            if needle.trim().is_empty() {
                return Err(RagError::InvalidQuery(
                    "contains filter must not be empty".into(),
                ));
            }
        }

        let lower = self.predicates.iter().find_map(|p| match p {
            MetadataPredicate::SatOnOrAfter(day) => Some(*day),
            _ => None,
        });
        let upper = self.predicates.iter().find_map(|p| match p {
            MetadataPredicate::SatBefore(day) => Some(*day),
            _ => None,
        });
        if let (Some(lower), Some(upper)) = (lower, upper) {
            if lower >= upper {
                return Err(RagError::InvalidQuery(format!(
                    "date range [{lower}, {upper}) is empty"
                )));
            }
        }
        Ok(())
    }
}

/// Storage backend for chunk records and nearest-neighbor queries.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Embedding width this store was created with.
    fn dimensions(&self) -> usize;

    /// Writes records idempotently: an existing id is replaced, content and
    /// embedding both. Records without an embedding are skipped. Returns
    /// the number of records written.
    async fn upsert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<usize, RagError>;

    /// Total stored chunk count.
    async fn count(&self) -> Result<usize, RagError>;

    /// The `top_k` nearest chunks to `query_embedding` under cosine
    /// distance, restricted by `filter`, paired with a similarity score in
    /// descending order. Distance ties break on ascending chunk id.
    async fn search_similar(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(ChunkRecord, f32)>, RagError>;

    /// All chunks of one debate in chunk-index order, embeddings omitted.
    async fn chunks_for_debate(&self, ext_id: &str) -> Result<Vec<ChunkRecord>, RagError>;
}
