//! Key/value cache used to memoize SurveyMonkey metadata lookups.
//!
//! The cache is a flat key -> value store where every entry carries its own
//! TTL. There is no capacity bound and no eviction beyond expiry and explicit
//! `delete`. Values are stored as checksummed JSON so a corrupted entry is
//! treated as a miss instead of being handed back to callers.

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

/// Fixed namespace tag prefixed to every key written by the SurveyMonkey client.
pub const CACHE_NAMESPACE: &str = "api_survey_monkey";

/// Process-wide key/value cache with per-entry TTL.
#[async_trait]
pub trait ApiCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn delete(&self, key: &str);
}

/// Builds `api_survey_monkey-{kind}-{client_id}-{scope}`.
pub fn cache_key(kind: &str, client_id: &str, scope: &str) -> String {
    format!("{}-{}-{}-{}", CACHE_NAMESPACE, kind, client_id, scope)
}

/// Hex SHA-256 of the credential pair, used as the token key scope so the
/// secret never shows up in a cache key.
pub fn credentials_digest(client_id: &str, client_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_id.as_bytes());
    hasher.update(b":");
    hasher.update(client_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
struct TtlValue {
    payload: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, TtlValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &TtlValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &TtlValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process `ApiCache` backed by moka.
#[derive(Clone)]
pub struct MokaApiCache {
    inner: Cache<String, TtlValue>,
}

impl MokaApiCache {
    pub fn new() -> Self {
        let inner = Cache::builder().expire_after(PerEntryTtl).build();
        Self { inner }
    }
}

impl Default for MokaApiCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApiCache for MokaApiCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).await.map(|value| value.payload)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.inner
            .insert(
                key.to_string(),
                TtlValue {
                    payload: value,
                    ttl,
                },
            )
            .await;
    }

    async fn delete(&self, key: &str) {
        self.inner.invalidate(key).await;
    }
}

/// Cached JSON payload together with its SHA-256 checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedCacheEntry {
    pub data: String,
    pub checksum: String,
}

impl ValidatedCacheEntry {
    pub fn new(data: String) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self { data, checksum }
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }

    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Returns the payload when the stored checksum still matches it.
    pub fn deserialize_and_validate(serialized: &str) -> Option<String> {
        let entry: ValidatedCacheEntry = serde_json::from_str(serialized).ok()?;

        if entry.is_valid() {
            Some(entry.data)
        } else {
            tracing::warn!(
                "Cache entry rejected: checksum mismatch (data length {})",
                entry.data.len()
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_layout() {
        assert_eq!(
            cache_key("collectors", "client-1", "block42"),
            "api_survey_monkey-collectors-client-1-block42"
        );
    }

    #[test]
    fn test_credentials_digest_hides_secret() {
        let digest = credentials_digest("client-1", "s3cret");
        assert_eq!(digest.len(), 64);
        assert!(!digest.contains("s3cret"));
        assert_ne!(digest, credentials_digest("client-1", "other"));
    }

    #[test]
    fn test_tampered_entry_rejected() {
        let entry = ValidatedCacheEntry::new(r#"{"id":"1"}"#.to_string());
        let tampered = entry.serialize().replace(r#"\"1\""#, r#"\"2\""#);

        assert_eq!(ValidatedCacheEntry::deserialize_and_validate(&tampered), None);
        assert_eq!(
            ValidatedCacheEntry::deserialize_and_validate(&entry.serialize()),
            Some(r#"{"id":"1"}"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_moka_cache_set_get_delete() {
        let cache = MokaApiCache::new();
        cache
            .set("k", "v".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));

        cache.delete("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_moka_cache_entry_expires() {
        let cache = MokaApiCache::new();
        cache
            .set("short", "v".to_string(), Duration::from_millis(50))
            .await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get("short").await, None);
    }
}
