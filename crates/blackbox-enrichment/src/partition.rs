//! Stable hashing of subject names.
//!
//! The value must not change between processes or releases, so the
//! randomized std hasher is not used.

use sha2::{Digest, Sha256};

/// Prefix of every limiter partition key.
pub const PARTITION_PREFIX: &str = "registry";

/// First eight bytes of the SHA-256 of `name`, big-endian.
pub fn stable_hash(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Limiter partition for `name` among `partitions` buckets.
pub fn partition_key(name: &str, partitions: u64) -> String {
    format!("{PARTITION_PREFIX}:{}", stable_hash(name) % partitions.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        assert_eq!(stable_hash("Acme"), stable_hash("Acme"));
        assert_ne!(stable_hash("Acme"), stable_hash("acme"));
    }

    #[test]
    fn partition_stays_within_cardinality() {
        for name in ["Acme", "Globex", "Initech", "Umbrella", "Hooli", "Vandelay"] {
            let key = partition_key(name, 10);
            let index: u64 = key
                .strip_prefix("registry:")
                .and_then(|n| n.parse().ok())
                .expect("key has numeric suffix");
            assert!(index < 10);
        }
    }

    #[test]
    fn zero_partitions_collapses_to_one() {
        assert_eq!(partition_key("Acme", 0), "registry:0");
    }
}
