//! Semantic indexing and retrieval for UK Parliament Hansard debates.
//!
//! The crate fetches debate transcripts from the public Hansard API,
//! splits them into deterministic sentence-aligned chunks, embeds each
//! chunk, and stores the vectors in a sqlite-vec database for cosine
//! nearest-neighbor search.
//!
//! ```text
//!   Hansard API          Members API
//!       |                     |
//!  fetch_debate      member_contributions
//!       |                     |
//!       v                     v
//!  DebateIndexer <---- IngestionCoordinator ---- TaskScheduler
//!       |                (claim / populate)       (shutdown)
//!   DebateChunker
//!       |
//!  EmbeddingProvider
//!       |
//!       v
//!  SqliteChunkStore  <----  SearchEngine  <----  queries
//! ```
//!
//! Concurrent requests to index the same debate are collapsed into one
//! fetch: the first caller claims the id, later callers await its outcome.
//! Failed ids stay re-enterable so a transient outage never wedges a
//! debate out of the index.

pub mod api;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod ingestion;
pub mod search;
pub mod stores;
pub mod types;

pub use api::{ContributionSource, DebateSource, HansardClient};
pub use chunking::{DebateChunk, DebateChunker};
pub use config::RagConfig;
pub use embeddings::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
pub use ingestion::{
    CancelSignal, DebateIndexer, IndexStatus, IngestionCoordinator, PopulateSummary, TaskScheduler,
};
pub use search::{SearchEngine, SearchHit, SearchResponse};
pub use stores::{Backend, ChunkRecord, MetadataPredicate, SearchFilter, SqliteChunkStore};
pub use types::RagError;
