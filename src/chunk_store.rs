//! Durable chunk set and active document record.
//!
//! Exactly one document is active at a time. [`replace`] swaps the active
//! document and its chunks wholesale inside the caller's transaction, so a
//! crash never leaves chunks from two documents behind. Deleting the old
//! document also drops its vectors and index metadata.

use askdoc_core::models::Chunk;
use sqlx::{Row, SqliteConnection};

use crate::error::PipelineResult;

/// Metadata of the ingested document.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DocumentRecord {
    pub id: String,
    pub source_name: String,
    /// SHA-256 of the raw uploaded bytes, hex encoded.
    pub sha256: String,
    pub page_count: i64,
    pub chunk_size: i64,
    pub chunk_overlap: i64,
    /// Unix timestamp (seconds).
    pub ingested_at: i64,
}

/// Load the active document record, if any document was ingested.
pub async fn active_document(conn: &mut SqliteConnection) -> PipelineResult<Option<DocumentRecord>> {
    let row = sqlx::query(
        "SELECT id, source_name, sha256, page_count, chunk_size, chunk_overlap, ingested_at \
         FROM documents ORDER BY ingested_at DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| DocumentRecord {
        id: row.get("id"),
        source_name: row.get("source_name"),
        sha256: row.get("sha256"),
        page_count: row.get("page_count"),
        chunk_size: row.get("chunk_size"),
        chunk_overlap: row.get("chunk_overlap"),
        ingested_at: row.get("ingested_at"),
    }))
}

/// Load the persisted chunks of `document_id` in chunk order.
pub async fn load_chunks(
    conn: &mut SqliteConnection,
    document_id: &str,
) -> PipelineResult<Vec<Chunk>> {
    let rows = sqlx::query(
        "SELECT id, document_id, chunk_index, page, start_char, text, hash \
         FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
    )
    .bind(document_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            chunk_index: row.get("chunk_index"),
            page: row.get("page"),
            start_char: row.get("start_char"),
            text: row.get("text"),
            hash: row.get("hash"),
        })
        .collect())
}

/// Replace the active document and its chunk set.
///
/// Every previous document, chunk, vector and index record is deleted
/// first. Call inside a transaction.
pub async fn replace(
    conn: &mut SqliteConnection,
    document: &DocumentRecord,
    chunks: &[Chunk],
) -> PipelineResult<()> {
    clear(conn).await?;

    sqlx::query(
        "INSERT INTO documents (id, source_name, sha256, page_count, chunk_size, chunk_overlap, ingested_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&document.id)
    .bind(&document.source_name)
    .bind(&document.sha256)
    .bind(document.page_count)
    .bind(document.chunk_size)
    .bind(document.chunk_overlap)
    .bind(document.ingested_at)
    .execute(&mut *conn)
    .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, page, start_char, text, hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(chunk.page)
        .bind(chunk.start_char)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Delete every document and everything derived from it.
async fn clear(conn: &mut SqliteConnection) -> PipelineResult<()> {
    for stmt in [
        "DELETE FROM chunk_vectors",
        "DELETE FROM index_meta",
        "DELETE FROM chunks",
        "DELETE FROM documents",
    ] {
        sqlx::query(stmt).execute(&mut *conn).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use askdoc_core::chunk::{split_pages, ChunkParams};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, sqlx::SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        (tmp, pool)
    }

    fn record(id: &str) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            source_name: format!("{}.pdf", id),
            sha256: "abc".to_string(),
            page_count: 2,
            chunk_size: 1000,
            chunk_overlap: 150,
            ingested_at: 1,
        }
    }

    fn pages() -> Vec<String> {
        vec!["first page text".to_string(), "second page text".to_string()]
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        assert!(active_document(&mut conn).await.unwrap().is_none());

        let chunks = split_pages("d1", &pages(), &ChunkParams::default());
        replace(&mut conn, &record("d1"), &chunks).await.unwrap();

        assert_eq!(active_document(&mut conn).await.unwrap(), Some(record("d1")));
        assert_eq!(load_chunks(&mut conn, "d1").await.unwrap(), chunks);
    }

    #[tokio::test]
    async fn replace_drops_previous_document() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let first = split_pages("d1", &pages(), &ChunkParams::default());
        replace(&mut conn, &record("d1"), &first).await.unwrap();
        let second = split_pages("d2", &pages(), &ChunkParams::default());
        replace(&mut conn, &record("d2"), &second).await.unwrap();

        assert!(load_chunks(&mut conn, "d1").await.unwrap().is_empty());
        assert_eq!(load_chunks(&mut conn, "d2").await.unwrap().len(), 2);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn rolled_back_replace_keeps_previous_document() {
        let (_tmp, pool) = setup().await;
        {
            let mut conn = pool.acquire().await.unwrap();
            let first = split_pages("d1", &pages(), &ChunkParams::default());
            replace(&mut conn, &record("d1"), &first).await.unwrap();
        }

        let mut tx = pool.begin().await.unwrap();
        let second = split_pages("d2", &pages(), &ChunkParams::default());
        replace(&mut tx, &record("d2"), &second).await.unwrap();
        tx.rollback().await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let active = active_document(&mut conn).await.unwrap().unwrap();
        assert_eq!(active.id, "d1");
        assert_eq!(load_chunks(&mut conn, "d1").await.unwrap().len(), 2);
    }
}
