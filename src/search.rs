//! Debug retrieval from the command line.
//!
//! Embeds the query and prints the top index matches with scores. This is
//! the same lookup the chat pipeline performs, without the model in the loop.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::index;

pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::open_existing(&config.db.path).await?;

    let query_vec = embedding::embed_query(&config.embedding, query).await?;
    let top_k = limit.unwrap_or(config.retrieval.top_k);
    let results = index::similarity_search(&pool, &query_vec, top_k).await?;

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, result.score, result.source_id);
        println!(
            "    excerpt: \"{}\"",
            preview(&result.text).replace('\n', " ")
        );
        println!("    document: {}", result.document_id);
        println!("    chunk: {}", result.chunk_id);
        println!();
    }

    pool.close().await;
    Ok(())
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(240) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_short_text_unchanged() {
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let text = "ü".repeat(300);
        let p = preview(&text);
        assert_eq!(p.chars().count(), 240);
    }
}
