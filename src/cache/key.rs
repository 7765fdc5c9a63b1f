//! Cache key generation.

use crate::provider::Parameters;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// Key for one provider's result of a call. Parameter maps serialize with
    /// sorted keys, so equal parameters always produce equal keys.
    pub fn for_call(service: &str, provider: &str, params: &Parameters) -> Self {
        let canonical = serde_json::to_string(params).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(service.as_bytes());
        hasher.update([0u8]);
        hasher.update(provider.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Self::new(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}
