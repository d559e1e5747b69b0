//! Similarity store abstraction.
//!
//! The [`SimilarityStore`] trait is the narrow contract the indexer and the
//! retriever need from a vector backend: upsert by chunk id, nearest-neighbour
//! query, delete, reset and count. Two implementations ship:
//!
//! - [`SqliteVectorStore`]: one `vectors.sqlite` file per corpus (sqlx).
//! - [`InMemoryVectorStore`]: process-local, for tests and throwaway runs.
//!
//! Both rank by brute-force cosine distance (`1 - cos`), ascending.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::VectorStoreConfig;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::IndexError;
use crate::registry::CorpusHandle;

/// SQLite's default host-parameter limit is 999; stay well under it.
const DELETE_BATCH: usize = 500;

#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// Chunk id.
    pub id: String,
    pub doc_id: String,
    pub source_path: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub distance: f64,
    pub doc_id: String,
    pub source_path: String,
    pub text: String,
}

#[async_trait]
pub trait SimilarityStore: Send + Sync {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// The `top_k` nearest records, closest first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>>;

    async fn delete(&self, ids: &[String]) -> Result<()>;

    async fn reset(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    /// Human-readable location for stats output.
    fn location(&self) -> String;
}

/// Open the backend named by `config.backend` for `handle`.
pub async fn open_store(
    handle: &CorpusHandle,
    config: &VectorStoreConfig,
) -> Result<Arc<dyn SimilarityStore>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteVectorStore::open(&handle.vectors).await?)),
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        other => Err(IndexError::config(format!("Unknown vector_store.backend: {}", other)).into()),
    }
}

fn distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}

fn rank(mut hits: Vec<VectorHit>, top_k: usize) -> Vec<VectorHit> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(top_k);
    hits
}

// ============ SQLite ============

pub struct SqliteVectorStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteVectorStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        db::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl SimilarityStore for SqliteVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO vectors (id, doc_id, source_path, text, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    doc_id = excluded.doc_id,
                    source_path = excluded.source_path,
                    text = excluded.text,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&r.id)
            .bind(&r.doc_id)
            .bind(&r.source_path)
            .bind(&r.text)
            .bind(r.embedding.len() as i64)
            .bind(vec_to_blob(&r.embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let rows = sqlx::query("SELECT id, doc_id, source_path, text, embedding FROM vectors")
            .fetch_all(&self.pool)
            .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                VectorHit {
                    id: row.get("id"),
                    distance: distance(vector, &blob_to_vec(&blob)),
                    doc_id: row.get("doc_id"),
                    source_path: row.get("source_path"),
                    text: row.get("text"),
                }
            })
            .collect();

        Ok(rank(hits, top_k))
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for batch in ids.chunks(DELETE_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!("DELETE FROM vectors WHERE id IN ({})", placeholders);
            let mut q = sqlx::query(&sql);
            for id in batch {
                q = q.bind(id);
            }
            q.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM vectors").execute(&self.pool).await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ============ In-memory ============

#[derive(Default)]
pub struct InMemoryVectorStore {
    rows: RwLock<BTreeMap<String, VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SimilarityStore for InMemoryVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut rows = self.rows.write().await;
        for r in records {
            rows.insert(r.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let rows = self.rows.read().await;
        let hits = rows
            .values()
            .map(|r| VectorHit {
                id: r.id.clone(),
                distance: distance(vector, &r.embedding),
                doc_id: r.doc_id.clone(),
                source_path: r.source_path.clone(),
                text: r.text.clone(),
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut rows = self.rows.write().await;
        for id in ids {
            rows.remove(id);
        }
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.rows.write().await.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.rows.read().await.len())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
