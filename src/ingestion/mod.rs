//! Ingestion pipeline: indexing, coordination, and background scheduling.

pub mod coordinator;
pub mod indexer;
pub mod scheduler;

pub use coordinator::{IndexStatus, IngestionCoordinator, PopulateSummary};
pub use indexer::{DebateIndexer, IndexedDebate};
pub use scheduler::{CancelSignal, TaskScheduler};
