use crate::domain_port::{RevocationStore, StoreError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, AsyncIter, RedisError, Script};

/// Redis-backed revocation store. The connection manager is constructed once
/// at startup with a short response timeout; a timed-out call surfaces as
/// `Unavailable`, never as a missing key.
pub struct RedisRevocationStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisRevocationStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        RedisRevocationStore {
            conn,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

fn map_err(e: RedisError) -> StoreError {
    if e.is_io_error()
        || e.is_timeout()
        || e.is_connection_refusal()
        || e.is_connection_dropped()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Internal(e.to_string())
    }
}

#[async_trait::async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.key(key), value, ttl_secs)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let val: Option<String> = conn.get(self.key(key)).await.map_err(map_err)?;
        Ok(val)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(self.key(key)).await.map_err(map_err)?;
        Ok(found)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(self.key(key)).await.map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn delete_matching(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.key(prefix));

        let keys: Vec<String> = {
            let mut iter: AsyncIter<String> =
                conn.scan_match(&pattern).await.map_err(map_err)?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key.map_err(map_err)?);
            }
            keys
        };
        if keys.is_empty() {
            return Ok(0);
        }

        let removed: u64 = conn.del(&keys).await.map_err(map_err)?;
        Ok(removed)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        // GET + DEL must be one atomic step, otherwise two concurrent
        // rotations of the same token could both win.
        let script = Script::new(
            r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#,
        );
        let mut conn = self.conn.clone();
        let removed: u64 = script
            .key(self.key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn increment_with_ttl(&self, key: &str, window_secs: u64) -> Result<u64, StoreError> {
        let script = Script::new(
            r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#,
        );
        let mut conn = self.conn.clone();
        let count: u64 = script
            .key(self.key(key))
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(count)
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}
