use crate::domain_port::{RevocationStore, StoreError};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

/// In-process store backend. Used by the `memory` settings backend and by
/// the core's tests; semantics mirror the Redis backend at single-key
/// granularity, with lazy expiry.
#[derive(Default)]
pub struct MemoryRevocationStore {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of live keys, for tests asserting on store state.
    pub fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .filter(|(_, e)| e.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn purge_expired(entries: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
    }
}

#[async_trait::async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        Ok(entries.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        Ok(entries.remove(key).is_some())
    }

    async fn delete_matching(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        match entries.get(key) {
            Some(e) if e.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_with_ttl(&self, key: &str, window_secs: u64) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        match entries.get_mut(key) {
            Some(e) => {
                let count = e
                    .value
                    .parse::<u64>()
                    .map_err(|err| StoreError::Internal(err.to_string()))?
                    + 1;
                e.value = count.to_string();
                Ok(count)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: Instant::now() + Duration::from_secs(window_secs),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}
