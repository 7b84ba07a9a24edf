//! Rate-limited enrichment cache for lead scoring.
//!
//! `EnrichmentCache::enrich` answers from a TTL cache when it can. On a miss
//! it hashes the subject into one of a fixed number of partitions, spends a
//! token from that partition's bucket and consults the `EnrichmentSource`.
//! Running out of tokens is reported in the result, never as an error.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod limiter;
pub mod partition;
pub mod source;

pub use cache::{EnrichmentCache, EnrichmentConfig};
pub use error::{EnrichmentError, Result};
pub use limiter::{LimiterConfig, TokenBucketLimiter};
pub use source::{Enrichment, EnrichmentSource, SimulatedRegistry};

/// Default cache freshness window.
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Default number of limiter partitions.
pub const DEFAULT_PARTITIONS: u64 = 10;
