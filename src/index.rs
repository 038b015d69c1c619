//! Persistent similarity index.
//!
//! One SQLite file holds the documents, their chunks, and a little-endian
//! f32 BLOB per chunk vector. The online query path only ever reads; writes
//! happen through [`upsert_document`] / [`replace_chunks`] during ingestion.
//!
//! Lookup is brute-force cosine similarity over the stored vectors, computed
//! in Rust after fetching the candidate rows.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::embedding;
use crate::models::{Chunk, Document, RetrievedChunk};

/// Create the index schema. Idempotent.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL UNIQUE,
            source_url TEXT,
            title TEXT,
            body TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document_id ON chunk_vectors(document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert or refresh a document row, keyed on its source id.
/// Returns the stable document id.
pub async fn upsert_document(pool: &SqlitePool, doc: &Document) -> Result<String> {
    let existing_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE source_id = ?")
            .bind(&doc.source_id)
            .fetch_optional(pool)
            .await?;

    let doc_id = existing_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    sqlx::query(
        r#"
        INSERT INTO documents (id, source_id, source_url, title, body, fetched_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id) DO UPDATE SET
            source_url = excluded.source_url,
            title = excluded.title,
            body = excluded.body,
            fetched_at = excluded.fetched_at
        "#,
    )
    .bind(&doc_id)
    .bind(&doc.source_id)
    .bind(&doc.source_url)
    .bind(&doc.title)
    .bind(&doc.body)
    .bind(doc.fetched_at.timestamp())
    .execute(pool)
    .await?;

    Ok(doc_id)
}

/// Replace a document's chunks and their vectors transactionally.
///
/// `vectors` must be parallel to `chunks`; each pair becomes one index entry.
pub async fn replace_chunks(
    pool: &SqlitePool,
    document_id: &str,
    model: &str,
    dims: usize,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    let now = chrono::Utc::now().timestamp();

    for (chunk, vec) in chunks.iter().zip(vectors.iter()) {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        let blob = embedding::vec_to_blob(vec);
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(model)
        .bind(dims as i64)
        .bind(blob)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Top-k chunks by cosine similarity against `query_vec`.
pub async fn similarity_search(
    pool: &SqlitePool,
    query_vec: &[f32],
    top_k: usize,
) -> Result<Vec<RetrievedChunk>> {
    let rows = sqlx::query(
        r#"
        SELECT cv.chunk_id, cv.document_id, cv.embedding, c.text, d.source_id
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        JOIN documents d ON d.id = cv.document_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<RetrievedChunk> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let score = embedding::cosine_similarity(query_vec, &vec);
            RetrievedChunk {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                text: row.get("text"),
                score,
                source_id: row.get("source_id"),
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(top_k);

    Ok(candidates)
}

pub async fn chunk_count(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ensure_schema(&pool).await.unwrap();
        pool
    }

    fn doc(source_id: &str, body: &str) -> Document {
        Document {
            source_id: source_id.to_string(),
            source_url: None,
            title: Some(source_id.to_string()),
            body: body.to_string(),
            fetched_at: Utc::now(),
        }
    }

    fn chunk(doc_id: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            id: format!("{}-{}", doc_id, index),
            document_id: doc_id.to_string(),
            chunk_index: index,
            text: text.to_string(),
            hash: format!("h{}", index),
        }
    }

    #[tokio::test]
    async fn test_schema_idempotent() {
        let pool = memory_pool().await;
        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_keeps_stable_id() {
        let pool = memory_pool().await;
        let id1 = upsert_document(&pool, &doc("foods.txt", "v1")).await.unwrap();
        let id2 = upsert_document(&pool, &doc("foods.txt", "v2")).await.unwrap();
        assert_eq!(id1, id2);

        let body: String = sqlx::query_scalar("SELECT body FROM documents WHERE id = ?")
            .bind(&id1)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(body, "v2");
    }

    #[tokio::test]
    async fn test_replace_chunks_removes_stale_entries() {
        let pool = memory_pool().await;
        let doc_id = upsert_document(&pool, &doc("foods.txt", "body")).await.unwrap();

        let old = vec![chunk(&doc_id, 0, "old a"), chunk(&doc_id, 1, "old b")];
        let vecs = vec![vec![1.0f32, 0.0], vec![0.0, 1.0]];
        replace_chunks(&pool, &doc_id, "m", 2, &old, &vecs).await.unwrap();
        assert_eq!(chunk_count(&pool).await.unwrap(), 2);

        let new = vec![chunk(&doc_id, 0, "new a")];
        replace_chunks(&pool, &doc_id, "m", 2, &new, &vecs[..1]).await.unwrap();
        assert_eq!(chunk_count(&pool).await.unwrap(), 1);

        let vec_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(vec_rows, 1);
    }

    #[tokio::test]
    async fn test_similarity_search_ranks_by_cosine() {
        let pool = memory_pool().await;
        let doc_id = upsert_document(&pool, &doc("foods.txt", "body")).await.unwrap();

        let chunks = vec![
            chunk(&doc_id, 0, "chicken breast protein"),
            chunk(&doc_id, 1, "olive oil fats"),
            chunk(&doc_id, 2, "quinoa carbohydrates"),
        ];
        // Orthogonal-ish vectors: the query below is closest to chunk 0.
        let vecs = vec![
            vec![1.0f32, 0.1, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        replace_chunks(&pool, &doc_id, "m", 3, &chunks, &vecs).await.unwrap();

        let query = vec![0.9f32, 0.2, 0.05];
        let results = similarity_search(&pool, &query, 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "chicken breast protein");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_similarity_search_empty_index() {
        let pool = memory_pool().await;
        let results = similarity_search(&pool, &[1.0, 0.0], 5).await.unwrap();
        assert!(results.is_empty());
    }
}
