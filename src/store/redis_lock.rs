//! Redis-backed processing lock for coordinating several hosts.
//!
//! Acquisition is `SET key token NX PX ttl`; release deletes the key only if
//! it still carries this lock's token.

use std::time::Duration;

use redis::{Client, Script};

use super::{ProcessingLock, Result};

/// Key prefix for lock entries in Redis.
const KEY_PREFIX: &str = "scansplit:lock:";

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisLock {
    client: Client,
    token: String,
}

impl RedisLock {
    /// Connect to Redis at `redis_url` (e.g. "redis://localhost:6379").
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client,
            token: uuid::Uuid::new_v4().to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

impl ProcessingLock for RedisLock {
    fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.client.get_connection()?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(&self.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query(&mut conn)?;
        Ok(reply.is_some())
    }

    fn release(&self, key: &str) -> Result<()> {
        let mut conn = self.client.get_connection()?;
        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(self.key(key))
            .arg(&self.token)
            .invoke(&mut conn)?;
        Ok(())
    }
}
