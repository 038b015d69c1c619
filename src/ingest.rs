//! Ingestion pipeline orchestration.
//!
//! Coordinates the offline indexing flow: load documents → chunk → embed →
//! write the index. With no documents to process the index file is left
//! untouched (it is not even opened).

use anyhow::Result;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::index;
use crate::loader;

pub async fn run_ingest(config: &Config, dry_run: bool, limit: Option<usize>) -> Result<()> {
    let mut docs = loader::load_documents(&config.documents).await?;

    if let Some(lim) = limit {
        docs.truncate(lim);
    }

    if docs.is_empty() {
        println!("ingest");
        println!("  no documents found, nothing to do");
        return Ok(());
    }

    if dry_run {
        let total_chunks: usize = docs
            .iter()
            .map(|doc| {
                chunk_text(
                    "tmp",
                    &doc.body,
                    config.chunking.chunk_size,
                    config.chunking.overlap,
                )
                .len()
            })
            .sum();
        println!("ingest (dry-run)");
        println!("  documents found: {}", docs.len());
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    let pool = db::connect(config).await?;
    index::ensure_schema(&pool).await?;

    let mut docs_written = 0u64;
    let mut chunks_written = 0u64;
    let mut docs_skipped = 0u64;

    for doc in &docs {
        let doc_id = index::upsert_document(&pool, doc).await?;
        let chunks = chunk_text(
            &doc_id,
            &doc.body,
            config.chunking.chunk_size,
            config.chunking.overlap,
        );

        if chunks.is_empty() {
            docs_skipped += 1;
            continue;
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(config.embedding.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            vectors.extend(embedding::embed_texts(&config.embedding, &texts).await?);
        }

        index::replace_chunks(
            &pool,
            &doc_id,
            &config.embedding.model,
            config.embedding.dims,
            &chunks,
            &vectors,
        )
        .await?;

        docs_written += 1;
        chunks_written += chunks.len() as u64;
    }

    let total_chunks = index::chunk_count(&pool).await?;

    println!("ingest");
    println!("  documents indexed: {}", docs_written);
    println!("  chunks written: {}", chunks_written);
    if docs_skipped > 0 {
        println!("  empty documents skipped: {}", docs_skipped);
    }
    println!("  chunks in index: {}", total_chunks);
    println!("  index: {}", config.db.path.display());
    println!("ok");

    pool.close().await;
    Ok(())
}
