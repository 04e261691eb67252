use crate::domain_model::UserId;

/// Store failures are always distinguishable from "key absent". A transport
/// or timeout problem must surface as `Unavailable`, never as a miss.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("revocation store unavailable: {0}")]
    Unavailable(String),
    #[error("revocation store error: {0}")]
    Internal(String),
}

/// Key/value store with per-key TTL. Single source of truth for refresh
/// token liveness, token families, session descriptors, the access-token
/// blacklist and login rate-limit counters. Every record expires on its own;
/// there is no garbage collection.
#[async_trait::async_trait]
pub trait RevocationStore: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Deletes every key starting with `prefix`, returns the count.
    async fn delete_matching(&self, prefix: &str) -> Result<u64, StoreError>;

    /// Deletes the key only if its current value equals `expected`. Returns
    /// true when this call performed the delete. This is the rotation
    /// primitive: of two concurrent refreshes presenting the same token,
    /// exactly one sees true.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Increments a counter, initializing it to 1 with TTL = `window_secs`
    /// on first use. Returns the count after the increment.
    async fn increment_with_ttl(&self, key: &str, window_secs: u64) -> Result<u64, StoreError>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> bool;
}

pub fn refresh_token_key(user_id: UserId, jti: &str) -> String {
    format!("refresh_token:{}:{}", user_id, jti)
}

pub fn refresh_token_prefix(user_id: UserId) -> String {
    format!("refresh_token:{}:", user_id)
}

pub fn token_family_key(user_id: UserId, family: &str) -> String {
    format!("token_family:{}:{}", user_id, family)
}

pub fn token_family_prefix(user_id: UserId) -> String {
    format!("token_family:{}:", user_id)
}

pub fn blacklist_key(raw_token: &str) -> String {
    format!("blacklist:{}", raw_token)
}

pub fn session_key(user_id: UserId, ip: &str, user_agent: &str) -> String {
    format!("session:{}:{}:{}", user_id, ip, user_agent)
}

pub fn session_prefix(user_id: UserId) -> String {
    format!("session:{}:", user_id)
}

pub fn login_rate_key(ip: &str) -> String {
    format!("ratelimit:login:{}", ip)
}
