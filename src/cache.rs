use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

/// Keyed TTL cache shared across request handlers. Uses Redis when
/// `REDIS_URL` is configured so state survives across instances, with an
/// in-process map as fallback.
#[derive(Clone)]
pub struct SharedCache {
    redis: Option<redis::Client>,
    memory: Arc<Mutex<HashMap<String, MemoryEntry>>>,
}

struct MemoryEntry {
    json: String,
    expires_at: Instant,
}

impl SharedCache {
    pub fn from_env() -> Self {
        let redis = std::env::var("REDIS_URL")
            .ok()
            .and_then(|url| redis::Client::open(url).ok());
        Self {
            redis,
            memory: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            redis: None,
            memory: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(client) = &self.redis
            && let Ok(mut conn) = client.get_multiplexed_async_connection().await
        {
            let raw: Option<String> = conn.get(key).await.ok();
            return raw.and_then(|value| serde_json::from_str(&value).ok());
        }
        let mut guard = self.memory.lock().await;
        match guard.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                serde_json::from_str(&entry.json).ok()
            }
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let Ok(json) = serde_json::to_string(value) else {
            return;
        };
        if let Some(client) = &self.redis
            && let Ok(mut conn) = client.get_multiplexed_async_connection().await
        {
            let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
            return;
        }
        let mut guard = self.memory.lock().await;
        guard.insert(
            key.to_string(),
            MemoryEntry {
                json,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
    }

    pub async fn remove(&self, key: &str) {
        if let Some(client) = &self.redis
            && let Ok(mut conn) = client.get_multiplexed_async_connection().await
        {
            let _: Result<(), _> = conn.del(key).await;
            return;
        }
        self.memory.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = SharedCache::in_memory();
        cache.set("k", &vec![1u32, 2, 3], 60).await;
        let got: Option<Vec<u32>> = cache.get("k").await;
        assert_eq!(got, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn zero_ttl_entries_expire_immediately() {
        let cache = SharedCache::in_memory();
        cache.set("gone", &"value".to_string(), 0).await;
        let got: Option<String> = cache.get("gone").await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn remove_clears_entry() {
        let cache = SharedCache::in_memory();
        cache.set("k", &7u8, 60).await;
        cache.remove("k").await;
        let got: Option<u8> = cache.get("k").await;
        assert_eq!(got, None);
    }
}
