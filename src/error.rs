//! Typed errors for the chat path.
//!
//! General propagation uses `anyhow`; these variants exist so the server and
//! the answer pipeline can tell the failure kinds apart at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// A configured directory or index path does not exist.
    #[error("missing resource: {0}")]
    MissingResource(String),

    /// A single document source could not be read or fetched.
    #[error("fetch failed: {0}")]
    FetchFailure(String),

    /// A conversation entry is not a recognized role/content pair.
    #[error("unsupported message format: {0}")]
    UnsupportedMessageFormat(String),

    /// The embedding or completion provider failed after retries.
    #[error("upstream provider failure: {0}")]
    UpstreamProviderFailure(String),
}
