//! SQLite-backed [`VectorIndex`].
//!
//! Embeddings are stored as little-endian f32 BLOBs in `chunk_embeddings`,
//! with the chunk's derived tags in `chunk_tags`. Tenant and tag filters are
//! pushed into the SQL query; cosine similarity is computed over the rows
//! that pass, then the minimum-similarity threshold and top-k are applied.
//!
//! SQLite has no approximate nearest-neighbor index, so every search is an
//! exact scan of the filtered rows.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use hybrid_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use hybrid_rag_core::error::{Result, RetrievalError};
use hybrid_rag_core::vector::{rank_hits, IndexedEmbedding, VectorHit, VectorIndex, VectorQuery};

use crate::{db, migrate};

pub const DEFAULT_MIN_SIMILARITY: f64 = 0.3;

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    min_similarity: f64,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, min_similarity: f64) -> Self {
        Self {
            pool,
            min_similarity,
        }
    }

    /// Connect to `db_path` and make sure the schema exists.
    pub async fn open(db_path: &Path, min_similarity: f64) -> AnyResult<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool, min_similarity))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn backend_err(e: sqlx::Error) -> RetrievalError {
    RetrievalError::VectorBackend(e.to_string())
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn upsert(&self, items: Vec<IndexedEmbedding>) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        for item in &items {
            let e = &item.embedding;
            sqlx::query(
                r#"
                INSERT INTO chunk_embeddings
                    (chunk_id, embedding, model_id, dims, user_id, workspace_id, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    embedding = excluded.embedding,
                    model_id = excluded.model_id,
                    dims = excluded.dims,
                    user_id = excluded.user_id,
                    workspace_id = excluded.workspace_id,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&e.chunk_id)
            .bind(vec_to_blob(&e.vector))
            .bind(&e.model_id)
            .bind(e.vector.len() as i64)
            .bind(&item.user_id)
            .bind(&item.workspace_id)
            .bind(e.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;

            sqlx::query("DELETE FROM chunk_tags WHERE chunk_id = ?")
                .bind(&e.chunk_id)
                .execute(&mut *tx)
                .await
                .map_err(backend_err)?;

            for tag in &item.tags {
                sqlx::query("INSERT OR IGNORE INTO chunk_tags (chunk_id, tag) VALUES (?, ?)")
                    .bind(&e.chunk_id)
                    .bind(tag)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend_err)?;
            }
        }

        tx.commit().await.map_err(backend_err)?;
        Ok(items.len())
    }

    async fn search(&self, query: &VectorQuery<'_>) -> Result<Vec<VectorHit>> {
        let mut sql = String::from("SELECT e.chunk_id, e.embedding FROM chunk_embeddings e WHERE 1 = 1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(tenant) = query.tenant {
            if let Some(ws) = &tenant.workspace_id {
                sql.push_str(" AND (e.workspace_id IS NULL OR e.workspace_id = ?)");
                binds.push(ws.clone());
            }
            if let Some(user) = &tenant.user_id {
                sql.push_str(" AND (e.user_id IS NULL OR e.user_id = ?)");
                binds.push(user.clone());
            }
        }
        for tag in query.filters.required_tags() {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM chunk_tags t WHERE t.chunk_id = e.chunk_id AND t.tag = ?)",
            );
            binds.push(tag);
        }

        let mut q = sqlx::query(&sql);
        for b in &binds {
            q = q.bind(b);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(backend_err)?;

        let hits = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query.vector, &blob_to_vec(&blob)) as f64;
                (similarity >= self.min_similarity).then(|| VectorHit {
                    chunk_id: row.get("chunk_id"),
                    similarity,
                })
            })
            .collect();

        Ok(rank_hits(hits, query.k))
    }

    async fn remove(&self, chunk_ids: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let mut removed = 0usize;
        for id in chunk_ids {
            let res = sqlx::query("DELETE FROM chunk_embeddings WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(backend_err)?;
            removed += res.rows_affected() as usize;
            sqlx::query("DELETE FROM chunk_tags WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(backend_err)?;
        }
        tx.commit().await.map_err(backend_err)?;
        Ok(removed)
    }

    async fn embedded_ids(&self, model_id: &str) -> Result<HashSet<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT chunk_id FROM chunk_embeddings WHERE model_id = ?")
                .bind(model_id)
                .fetch_all(&self.pool)
                .await
                .map_err(backend_err)?;
        Ok(ids.into_iter().collect())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_embeddings")
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(n as usize)
    }
}
