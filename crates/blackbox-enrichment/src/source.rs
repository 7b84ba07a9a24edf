//! Where enrichment data comes from.

use std::{future::Future, pin::Pin};

use serde_json::{json, Map, Value};

use crate::{error::Result, partition::stable_hash};

/// Enrichment result handed back to callers.
pub type Enrichment = Map<String, Value>;

/// Upstream registry consulted on a cache miss.
pub trait EnrichmentSource: Send + Sync + 'static {
    /// Looks `name` up upstream.
    fn lookup<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Enrichment>> + Send + 'a>>;
}

/// Deterministic stand-in for the public company registry.
///
/// Derives a registry id from a stable hash of the name and alternates the
/// industry on the id's parity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedRegistry;

impl SimulatedRegistry {
    /// Registry ids span `0..REGISTRY_ID_SPACE`.
    pub const REGISTRY_ID_SPACE: u64 = 100_000;

    /// Computes the record for `name`.
    pub fn record_for(name: &str) -> Enrichment {
        let key = stable_hash(name) % Self::REGISTRY_ID_SPACE;
        let industry = if key % 2 == 0 { "Services" } else { "Manufacturing" };

        let mut record = Enrichment::new();
        record.insert("official_registry_id".to_string(), json!(format!("OG-{key}")));
        record.insert("industry".to_string(), json!(industry));
        record.insert("enriched".to_string(), json!(true));
        record
    }
}

impl EnrichmentSource for SimulatedRegistry {
    fn lookup<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Enrichment>> + Send + 'a>> {
        Box::pin(async move { Ok(Self::record_for(name)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_deterministic() {
        assert_eq!(SimulatedRegistry::record_for("Acme"), SimulatedRegistry::record_for("Acme"));
    }

    #[test]
    fn industry_follows_registry_id_parity() {
        for name in ["Acme", "Globex", "Initech", "Stark Industries"] {
            let record = SimulatedRegistry::record_for(name);
            let id = record["official_registry_id"].as_str().expect("id is a string");
            let key: u64 = id.trim_start_matches("OG-").parse().expect("numeric id");

            assert!(key < SimulatedRegistry::REGISTRY_ID_SPACE);
            let expected = if key % 2 == 0 { "Services" } else { "Manufacturing" };
            assert_eq!(record["industry"], expected);
            assert_eq!(record["enriched"], true);
        }
    }
}
