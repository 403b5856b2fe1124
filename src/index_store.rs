//! Build, persist and reload the vector index.
//!
//! The index is always built from scratch for a whole chunk set. Vectors are
//! stored as little-endian `f32` BLOBs in `chunk_vectors`, and `index_meta`
//! records which model produced them so a model change forces a rebuild.

use anyhow::{bail, Context};
use askdoc_core::embedding::{blob_to_vec, embed_normalized, vec_to_blob, EmbeddingProvider};
use askdoc_core::index::VectorIndex;
use askdoc_core::models::Chunk;
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

/// Which model built the persisted index, and when.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IndexMeta {
    pub document_id: String,
    pub model: String,
    pub dims: i64,
    pub chunk_count: i64,
    pub built_at: i64,
}

/// Embed every chunk and build a fresh index.
///
/// Chunks are sent in batches of `batch_size`; each batch call is bounded by
/// `timeout`. The provider is warmed up first with no time limit, so the
/// timeout covers inference only and never a model download. Any failure
/// aborts the whole build, so a partial index never exists.
pub async fn build(
    provider: &dyn EmbeddingProvider,
    chunks: Vec<Chunk>,
    batch_size: usize,
    timeout: Duration,
) -> anyhow::Result<VectorIndex> {
    let batch_size = batch_size.max(1);
    provider
        .warm_up()
        .await
        .with_context(|| format!("loading embedding model '{}' failed", provider.model_name()))?;

    let mut vectors = Vec::with_capacity(chunks.len());

    for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = tokio::time::timeout(timeout, embed_normalized(provider, &texts))
            .await
            .map_err(|_| anyhow::anyhow!("embedding timed out after {:?}", timeout))?
            .with_context(|| format!("embedding batch {} failed", batch_no))?;
        vectors.extend(embedded);
        tracing::debug!(
            batch = batch_no,
            embedded = vectors.len(),
            total = chunks.len(),
            "embedded batch"
        );
    }

    VectorIndex::from_parts(provider.model_name(), provider.dims(), chunks, vectors)
}

/// Persist `index` for `document_id`. Call inside the ingestion transaction,
/// after the chunk set was written.
pub async fn save(
    conn: &mut SqliteConnection,
    document_id: &str,
    index: &VectorIndex,
    built_at: i64,
) -> PipelineResult<()> {
    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM index_meta WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;

    for entry in index.entries() {
        sqlx::query("INSERT INTO chunk_vectors (chunk_id, document_id, embedding) VALUES (?, ?, ?)")
            .bind(&entry.chunk.id)
            .bind(document_id)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query(
        "INSERT INTO index_meta (document_id, model, dims, chunk_count, built_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(document_id)
    .bind(index.model())
    .bind(index.dims() as i64)
    .bind(index.len() as i64)
    .bind(built_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load_meta(
    conn: &mut SqliteConnection,
    document_id: &str,
) -> PipelineResult<Option<IndexMeta>> {
    let row = sqlx::query(
        "SELECT document_id, model, dims, chunk_count, built_at FROM index_meta WHERE document_id = ?",
    )
    .bind(document_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| IndexMeta {
        document_id: row.get("document_id"),
        model: row.get("model"),
        dims: row.get("dims"),
        chunk_count: row.get("chunk_count"),
        built_at: row.get("built_at"),
    }))
}

/// Reload the persisted index of `document_id` over its chunk set.
///
/// Returns `None` when no index was persisted for the document. A persisted
/// index that does not match the chunk set is a persistence failure.
pub async fn load(
    conn: &mut SqliteConnection,
    document_id: &str,
    chunks: Vec<Chunk>,
) -> PipelineResult<Option<VectorIndex>> {
    let Some(meta) = load_meta(conn, document_id).await? else {
        return Ok(None);
    };

    let rows = sqlx::query("SELECT chunk_id, embedding FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .fetch_all(&mut *conn)
        .await?;

    let mut by_chunk: HashMap<String, Vec<f32>> = rows
        .iter()
        .map(|row| {
            let id: String = row.get("chunk_id");
            let blob: Vec<u8> = row.get("embedding");
            (id, blob_to_vec(&blob))
        })
        .collect();

    assemble(&meta, chunks, &mut by_chunk)
        .map(Some)
        .map_err(|e| PipelineError::PersistenceFailure(format!("stored index is corrupt: {:#}", e)))
}

fn assemble(
    meta: &IndexMeta,
    chunks: Vec<Chunk>,
    by_chunk: &mut HashMap<String, Vec<f32>>,
) -> anyhow::Result<VectorIndex> {
    if chunks.len() as i64 != meta.chunk_count || by_chunk.len() != chunks.len() {
        bail!(
            "expected {} vectors, found {} vectors for {} chunks",
            meta.chunk_count,
            by_chunk.len(),
            chunks.len()
        );
    }

    let mut vectors = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let Some(v) = by_chunk.remove(&chunk.id) else {
            bail!("chunk {} has no stored vector", chunk.id);
        };
        vectors.push(v);
    }

    VectorIndex::from_parts(meta.model.clone(), meta.dims as usize, chunks, vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use askdoc_core::chunk::{split_pages, ChunkParams};
    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::chunk_store::{self, DocumentRecord};

    /// Maps text to a vector from its byte statistics.
    struct ByteStats;

    #[async_trait]
    impl EmbeddingProvider for ByteStats {
        fn model_name(&self) -> &str {
            "byte-stats"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let vowels = t.chars().filter(|c| "aeiou".contains(*c)).count() as f32;
                    let spaces = t.chars().filter(|c| c.is_whitespace()).count() as f32;
                    vec![1.0, vowels, spaces]
                })
                .collect())
        }
    }

    struct Failing;

    #[async_trait]
    impl EmbeddingProvider for Failing {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            bail!("provider unavailable")
        }
    }

    /// Slow to load, fast to embed.
    struct SlowLoad;

    #[async_trait]
    impl EmbeddingProvider for SlowLoad {
        fn model_name(&self) -> &str {
            "slow-load"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            ByteStats.embed(texts).await
        }
        async fn warm_up(&self) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        }
    }

    fn chunks() -> Vec<Chunk> {
        let pages = vec![
            "aaa bbb ccc ddd eee fff ggg hhh iii jjj".to_string(),
            "zzz yyy xxx www vvv uuu".to_string(),
        ];
        split_pages(
            "doc",
            &pages,
            &ChunkParams {
                chunk_size: 12,
                chunk_overlap: 4,
            },
        )
    }

    fn record() -> DocumentRecord {
        DocumentRecord {
            id: "doc".to_string(),
            source_name: "doc.pdf".to_string(),
            sha256: "abc".to_string(),
            page_count: 2,
            chunk_size: 12,
            chunk_overlap: 4,
            ingested_at: 1,
        }
    }

    #[tokio::test]
    async fn build_embeds_in_batches() {
        let index = build(&ByteStats, chunks(), 2, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(index.len(), chunks().len());
        assert_eq!(index.model(), "byte-stats");
    }

    #[tokio::test]
    async fn build_failure_is_reported() {
        let err = build(&Failing, chunks(), 2, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("provider unavailable"));
    }

    #[tokio::test]
    async fn model_loading_is_outside_the_batch_timeout() {
        let index = build(&SlowLoad, chunks(), 2, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(index.len(), chunks().len());
    }

    #[tokio::test]
    async fn save_load_gives_same_search_results() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("t.sqlite"))
            .await
            .unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let built = build(&ByteStats, chunks(), 64, Duration::from_secs(5))
            .await
            .unwrap();
        chunk_store::replace(&mut conn, &record(), &chunks())
            .await
            .unwrap();
        save(&mut conn, "doc", &built, 1).await.unwrap();

        let stored = chunk_store::load_chunks(&mut conn, "doc").await.unwrap();
        let loaded = load(&mut conn, "doc", stored).await.unwrap().unwrap();
        assert_eq!(loaded.len(), built.len());
        assert_eq!(loaded.model(), "byte-stats");

        let query = askdoc_core::embedding::normalize_l2(vec![1.0, 2.0, 1.0]).unwrap();
        let positions = |index: &VectorIndex| -> Vec<usize> {
            index
                .similarity_search(&query, 3)
                .into_iter()
                .map(|(pos, _)| pos)
                .collect()
        };
        assert_eq!(positions(&built), positions(&loaded));
    }

    #[tokio::test]
    async fn missing_index_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("t.sqlite"))
            .await
            .unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert!(load(&mut conn, "nope", vec![]).await.unwrap().is_none());
    }
}
