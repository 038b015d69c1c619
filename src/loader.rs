//! Document loading: local text files and web pages.
//!
//! A missing documents directory yields an empty result with a warning, not
//! an error. A single failed URL fetch is skipped and the batch continues.

use anyhow::Result;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::error::ChatError;
use crate::models::Document;

const FETCH_TIMEOUT_SECS: u64 = 30;

/// Load all configured documents: the local directory first, then the URLs.
pub async fn load_documents(config: &DocumentsConfig) -> Result<Vec<Document>> {
    let mut docs = Vec::new();

    if let Some(ref dir) = config.dir {
        docs.extend(load_directory(dir, &config.include_globs)?);
    }

    if !config.urls.is_empty() {
        docs.extend(load_urls(&config.urls).await);
    }

    Ok(docs)
}

/// Walk a directory and read every file matching the include globs.
pub fn load_directory(root: &Path, include_globs: &[String]) -> Result<Vec<Document>> {
    if !root.exists() {
        let err = ChatError::MissingResource(root.display().to_string());
        warn!(%err, "skipping document directory");
        return Ok(Vec::new());
    }

    let include_set = build_globset(include_globs)?;
    let mut docs = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if !include_set.is_match(&rel_str) {
            continue;
        }

        let body = match std::fs::read_to_string(path) {
            Ok(b) => b,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };

        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        docs.push(Document {
            source_id: rel_str,
            source_url: Some(format!("file://{}", path.display())),
            title: Some(title),
            body,
            fetched_at: Utc::now(),
        });
    }

    // Sort for deterministic ordering
    docs.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    Ok(docs)
}

/// Fetch each URL; failures are logged and skipped.
pub async fn load_urls(urls: &[String]) -> Vec<Document> {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "could not build HTTP client, skipping all URLs");
            return Vec::new();
        }
    };

    let mut docs = Vec::new();

    for url in urls {
        match fetch_url(&client, url).await {
            Ok(doc) => docs.push(doc),
            Err(e) => {
                warn!(url = %url, error = %e, "skipping URL");
            }
        }
    }

    docs
}

async fn fetch_url(client: &reqwest::Client, url: &str) -> Result<Document, ChatError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ChatError::FetchFailure(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ChatError::FetchFailure(format!("{}: HTTP {}", url, status)));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ChatError::FetchFailure(format!("{}: {}", url, e)))?;

    Ok(Document {
        source_id: url.to_string(),
        source_url: Some(url.to_string()),
        title: Some(url.to_string()),
        body,
        fetched_at: Utc::now(),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_directory_returns_empty() {
        let docs = load_directory(Path::new("/nonexistent/docs"), &["**/*.txt".to_string()])
            .unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_loads_matching_files_sorted() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join("b.txt"), "beta").unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        fs::write(tmp.path().join("ignored.json"), "{}").unwrap();

        let docs = load_directory(tmp.path(), &["**/*.txt".to_string()]).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].source_id, "a.txt");
        assert_eq!(docs[1].source_id, "b.txt");
        assert_eq!(docs[0].body, "alpha");
    }

    #[test]
    fn test_nested_files_use_relative_source_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("meals")).unwrap();
        fs::write(tmp.path().join("meals/breakfast.txt"), "oats").unwrap();

        let docs = load_directory(tmp.path(), &["**/*.txt".to_string()]).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_id, "meals/breakfast.txt");
        assert_eq!(docs[0].title.as_deref(), Some("breakfast.txt"));
    }
}
