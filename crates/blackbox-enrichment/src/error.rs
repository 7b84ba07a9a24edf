//! Enrichment source errors.
//!
//! These never reach callers of `EnrichmentCache::enrich`; a failed lookup
//! is reported as an unenriched result instead.

use thiserror::Error;

/// Result type alias for enrichment sources.
pub type Result<T> = std::result::Result<T, EnrichmentError>;

/// Failure of an enrichment source.
#[derive(Debug, Clone, Error)]
pub enum EnrichmentError {
    /// The upstream registry could not answer.
    #[error("enrichment lookup failed: {message}")]
    Lookup {
        /// Upstream error message
        message: String,
    },
}

impl EnrichmentError {
    /// Creates a lookup error.
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup { message: message.into() }
    }
}
