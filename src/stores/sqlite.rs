//! sqlite-vec backed chunk store.
//!
//! Chunks live in a plain `chunks` table; embeddings live in a `vec0`
//! virtual table keyed by the same rowid. A `store_meta` table pins the
//! embedding width and provider id so a database file cannot silently be
//! reopened with vectors from a different model.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::types::Value as SqlValue;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, ffi, params_from_iter};
use tracing::warn;

use super::{Backend, ChunkRecord, MetadataPredicate, SearchFilter};
use crate::embeddings::EmbeddingProvider;
use crate::types::RagError;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone, Debug)]
pub struct SqliteChunkStore {
    conn: Connection,
    dims: usize,
}

impl SqliteChunkStore {
    /// Opens (or creates) a store at `path` sized for `provider`'s vectors.
    pub async fn open(
        path: impl AsRef<Path>,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Self, RagError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        Self::init(conn, provider.dimensions(), provider.id()).await
    }

    /// In-memory store, mainly for tests.
    pub async fn open_in_memory(provider: &dyn EmbeddingProvider) -> Result<Self, RagError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        Self::init(conn, provider.dimensions(), provider.id()).await
    }

    async fn init(conn: Connection, dims: usize, provider_id: String) -> Result<Self, RagError> {
        conn.call(move |conn| -> Result<(), RagError> {
            conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))?;

            let tx = conn.transaction()?;
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS chunks (
                     id TEXT PRIMARY KEY,
                     debate_ext_id TEXT NOT NULL,
                     chunk_index INTEGER NOT NULL,
                     member_id INTEGER,
                     house TEXT,
                     sitting_date TEXT,
                     content TEXT NOT NULL,
                     metadata TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_chunks_debate
                     ON chunks(debate_ext_id);
                 CREATE TABLE IF NOT EXISTS store_meta (
                     key TEXT PRIMARY KEY,
                     value TEXT NOT NULL
                 );
                 CREATE VIRTUAL TABLE IF NOT EXISTS chunk_embeddings
                     USING vec0(embedding float[{dims}]);"
            ))?;

            for (key, value) in [
                ("dimensions", dims.to_string()),
                ("provider", provider_id.clone()),
            ] {
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT value FROM store_meta WHERE key = ?",
                        [key],
                        |row| row.get(0),
                    )
                    .optional()?;
                match existing {
                    Some(stored) if stored != value => {
                        return Err(RagError::Storage(format!(
                            "store was created with {key}={stored}, reopened with {key}={value}"
                        )));
                    }
                    Some(_) => {}
                    None => {
                        tx.execute(
                            "INSERT INTO store_meta (key, value) VALUES (?, ?)",
                            [key, value.as_str()],
                        )?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(RagError::from)?;

        Ok(Self { conn, dims })
    }

    fn register_sqlite_vec() -> Result<(), RagError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(RagError::Storage)
    }
}

/// Compiles a filter into SQL conjuncts and their bound parameters.
fn compile_filter(filter: &SearchFilter) -> (Vec<String>, Vec<SqlValue>) {
    let mut conjuncts = Vec::new();
    let mut params = Vec::new();

    for predicate in &filter.predicates {
        match predicate {
            MetadataPredicate::DebateIs(ext_id) => {
                conjuncts.push("c.debate_ext_id = ?".to_string());
                params.push(SqlValue::Text(ext_id.clone()));
            }
            MetadataPredicate::MemberIs(member_id) => {
                conjuncts.push("c.member_id = ?".to_string());
                params.push(SqlValue::Integer(*member_id));
            }
            MetadataPredicate::HouseIs(house) => {
                conjuncts.push("lower(c.house) = lower(?)".to_string());
                params.push(SqlValue::Text(house.clone()));
            }
            MetadataPredicate::SatOnOrAfter(day) => {
                conjuncts.push("c.sitting_date >= ?".to_string());
                params.push(SqlValue::Text(day.format(DATE_FORMAT).to_string()));
            }
            MetadataPredicate::SatBefore(day) => {
                conjuncts.push("c.sitting_date < ?".to_string());
                params.push(SqlValue::Text(day.format(DATE_FORMAT).to_string()));
            }
        }
    }
    if let Some(needle) = &filter.contains {
        conjuncts.push("instr(lower(c.content), lower(?)) > 0".to_string());
        params.push(SqlValue::Text(needle.clone()));
    }

    (conjuncts, params)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ChunkRecord, rusqlite::Error> {
    let sitting_date: Option<String> = row.get(5)?;
    Ok(ChunkRecord {
        id: row.get(0)?,
        debate_ext_id: row.get(1)?,
        chunk_index: row.get::<_, i64>(2)? as usize,
        member_id: row.get(3)?,
        house: row.get(4)?,
        sitting_date: sitting_date
            .and_then(|raw| NaiveDate::parse_from_str(&raw, DATE_FORMAT).ok()),
        content: row.get(6)?,
        metadata: row
            .get::<_, String>(7)
            .map(|raw| serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null))?,
        embedding: None,
    })
}

const RECORD_COLUMNS: &str =
    "c.id, c.debate_ext_id, c.chunk_index, c.member_id, c.house, c.sitting_date, c.content, c.metadata";

#[async_trait]
impl Backend for SqliteChunkStore {
    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn upsert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<usize, RagError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let dims = self.dims;

        self.conn
            .call(move |conn| -> Result<usize, RagError> {
                let tx = conn.transaction()?;
                let mut written = 0usize;

                for record in chunks {
                    let Some(embedding) = &record.embedding else {
                        warn!(id = %record.id, "chunk has no embedding, skipping");
                        continue;
                    };
                    if embedding.len() != dims {
                        warn!(
                            id = %record.id,
                            got = embedding.len(),
                            expected = dims,
                            "embedding width mismatch, skipping"
                        );
                        continue;
                    }
                    let embedding_json = serde_json::to_string(embedding)
                        .map_err(|err| RagError::Storage(err.to_string()))?;
                    let sitting_date = record
                        .sitting_date
                        .map(|day| day.format(DATE_FORMAT).to_string());
                    let metadata = record.metadata.to_string();

                    let existing: Option<i64> = tx
                        .query_row(
                            "SELECT rowid FROM chunks WHERE id = ?",
                            [&record.id],
                            |row| row.get(0),
                        )
                        .optional()?;

                    let rowid = match existing {
                        Some(rowid) => {
                            tx.execute(
                                "UPDATE chunks SET debate_ext_id = ?2, chunk_index = ?3, \
                                 member_id = ?4, house = ?5, sitting_date = ?6, content = ?7, \
                                 metadata = ?8 WHERE rowid = ?1",
                                rusqlite::params![
                                    rowid,
                                    record.debate_ext_id,
                                    record.chunk_index as i64,
                                    record.member_id,
                                    record.house,
                                    sitting_date,
                                    record.content,
                                    metadata,
                                ],
                            )?;
                            tx.execute("DELETE FROM chunk_embeddings WHERE rowid = ?", [rowid])?;
                            rowid
                        }
                        None => {
                            tx.execute(
                                "INSERT INTO chunks (id, debate_ext_id, chunk_index, member_id, \
                                 house, sitting_date, content, metadata) \
                                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                                rusqlite::params![
                                    record.id,
                                    record.debate_ext_id,
                                    record.chunk_index as i64,
                                    record.member_id,
                                    record.house,
                                    sitting_date,
                                    record.content,
                                    metadata,
                                ],
                            )?;
                            tx.last_insert_rowid()
                        }
                    };

                    tx.execute(
                        "INSERT INTO chunk_embeddings (rowid, embedding) VALUES (?, vec_f32(?))",
                        rusqlite::params![rowid, embedding_json],
                    )?;
                    written += 1;
                }

                tx.commit()?;
                Ok(written)
            })
            .await
            .map_err(RagError::from)
    }

    async fn count(&self) -> Result<usize, RagError> {
        self.conn
            .call(|conn| -> Result<usize, RagError> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(RagError::from)
    }

    async fn search_similar(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(ChunkRecord, f32)>, RagError> {
        if query_embedding.len() != self.dims {
            return Err(RagError::Storage(format!(
                "query embedding has {} dimensions, store expects {}",
                query_embedding.len(),
                self.dims
            )));
        }
        let embedding_json = serde_json::to_string(query_embedding)
            .map_err(|err| RagError::Storage(err.to_string()))?;
        let (conjuncts, filter_params) = compile_filter(filter);

        let mut sql = format!(
            "SELECT {RECORD_COLUMNS}, vec_distance_cosine(e.embedding, vec_f32(?)) AS distance \
             FROM chunks c JOIN chunk_embeddings e ON e.rowid = c.rowid"
        );
        if !conjuncts.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conjuncts.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY distance ASC, c.id ASC LIMIT {top_k}"));

        let mut params = Vec::with_capacity(filter_params.len() + 1);
        params.push(SqlValue::Text(embedding_json));
        params.extend(filter_params);

        self.conn
            .call(move |conn| -> Result<Vec<(ChunkRecord, f32)>, RagError> {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(params), |row| {
                    let record = row_to_record(row)?;
                    let distance: f32 = row.get(8)?;
                    Ok((record, 1.0 - distance))
                })?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(RagError::from)
    }

    async fn chunks_for_debate(&self, ext_id: &str) -> Result<Vec<ChunkRecord>, RagError> {
        let ext_id = ext_id.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<ChunkRecord>, RagError> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM chunks c \
                     WHERE c.debate_ext_id = ? ORDER BY c.chunk_index ASC"
                ))?;
                let rows = stmt.query_map([&ext_id], row_to_record)?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(RagError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbeddingProvider, MockEmbeddingProvider};

    fn record(id: &str, ext_id: &str, index: usize, content: &str) -> ChunkRecord {
        ChunkRecord::new(id, ext_id, index, content)
            .with_member_id(Some(172))
            .with_house(Some("Commons".into()))
            .with_sitting_date(NaiveDate::from_ymd_opt(2024, 3, 12))
            .with_metadata(serde_json::json!({"title": "Test Debate"}))
    }

    async fn embedded(provider: &MockEmbeddingProvider, mut r: ChunkRecord) -> ChunkRecord {
        let vectors = provider
            .embed_batch(std::slice::from_ref(&r.content))
            .await
            .unwrap();
        r.embedding = Some(vectors.into_iter().next().unwrap());
        r
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_id() {
        let provider = MockEmbeddingProvider::new(8);
        let store = SqliteChunkStore::open_in_memory(&provider).await.unwrap();

        let a = embedded(&provider, record("D-00000", "D", 0, "first text")).await;
        let b = embedded(&provider, record("D-00001", "D", 1, "second text")).await;
        assert_eq!(store.upsert_chunks(vec![a.clone(), b]).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 2);

        // Replacing an id changes content without growing the store.
        let replacement = embedded(&provider, record("D-00000", "D", 0, "revised text")).await;
        assert_eq!(store.upsert_chunks(vec![replacement]).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 2);

        let chunks = store.chunks_for_debate("D").await.unwrap();
        assert_eq!(chunks[0].content, "revised text");
        assert_eq!(chunks[1].content, "second text");
    }

    #[tokio::test]
    async fn records_without_embeddings_are_skipped() {
        let provider = MockEmbeddingProvider::new(8);
        let store = SqliteChunkStore::open_in_memory(&provider).await.unwrap();

        let with = embedded(&provider, record("D-00000", "D", 0, "has vector")).await;
        let without = record("D-00001", "D", 1, "no vector");
        assert_eq!(store.upsert_chunks(vec![with, without]).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_respects_filters() {
        let provider = MockEmbeddingProvider::new(8);
        let store = SqliteChunkStore::open_in_memory(&provider).await.unwrap();

        let commons = embedded(&provider, record("A-00000", "A", 0, "fiscal policy"))
            .await
            .with_house(Some("Commons".into()));
        let lords = embedded(&provider, record("B-00000", "B", 0, "fiscal policy too"))
            .await
            .with_house(Some("Lords".into()));
        store.upsert_chunks(vec![commons, lords]).await.unwrap();

        let query = provider
            .embed_batch(&["fiscal policy".to_string()])
            .await
            .unwrap()
            .remove(0);

        let all = store
            .search_similar(&query, 10, &SearchFilter::none())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let lords_only = store
            .search_similar(
                &query,
                10,
                &SearchFilter::none().with_predicate(MetadataPredicate::HouseIs("lords".into())),
            )
            .await
            .unwrap();
        assert_eq!(lords_only.len(), 1);
        assert_eq!(lords_only[0].0.debate_ext_id, "B");

        let contains = store
            .search_similar(&query, 10, &SearchFilter::none().with_contains("TOO"))
            .await
            .unwrap();
        assert_eq!(contains.len(), 1);
        assert_eq!(contains[0].0.id, "B-00000");
    }

    #[tokio::test]
    async fn search_scores_descend() {
        let provider = MockEmbeddingProvider::new(8);
        let store = SqliteChunkStore::open_in_memory(&provider).await.unwrap();

        let records = vec![
            embedded(&provider, record("A-00000", "A", 0, "pension schemes bill")).await,
            embedded(&provider, record("A-00001", "A", 1, "railway infrastructure")).await,
            embedded(&provider, record("A-00002", "A", 2, "fishing quotas")).await,
        ];
        store.upsert_chunks(records).await.unwrap();

        let query = provider
            .embed_batch(&["pension schemes bill".to_string()])
            .await
            .unwrap()
            .remove(0);
        let hits = store
            .search_similar(&query, 3, &SearchFilter::none())
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0.id, "A-00000");
        assert!((hits[0].1 - 1.0).abs() < 1e-4);
        assert!(hits[0].1 >= hits[1].1 && hits[1].1 >= hits[2].1);
    }

    #[tokio::test]
    async fn reopen_with_other_provider_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("chunks.sqlite");

        let provider = MockEmbeddingProvider::new(8);
        {
            let store = SqliteChunkStore::open(&db_path, &provider).await.unwrap();
            let r = embedded(&provider, record("D-00000", "D", 0, "kept")).await;
            store.upsert_chunks(vec![r]).await.unwrap();
        }

        let other = MockEmbeddingProvider::new(16);
        let err = SqliteChunkStore::open(&db_path, &other).await.unwrap_err();
        assert!(matches!(err, RagError::Storage(_)));

        let reopened = SqliteChunkStore::open(&db_path, &provider).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
    }
}
