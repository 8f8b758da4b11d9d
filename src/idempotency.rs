use crate::models::ListingResult;
use redis::AsyncCommands;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::debug;

/// Replay cache for `/analyze` keyed by activation key and `Idempotency-Key`.
///
/// Backed by Redis when configured. The in-process map honours the same TTL
/// and only serves a single instance.
#[derive(Clone)]
pub struct IdempotencyCache {
    redis: Option<redis::Client>,
    local: Arc<Mutex<HashMap<String, (Instant, ListingResult)>>>,
    ttl_secs: u64,
}

impl IdempotencyCache {
    pub fn new(redis: Option<redis::Client>, ttl_secs: u64) -> Self {
        Self {
            redis,
            local: Arc::new(Mutex::new(HashMap::new())),
            ttl_secs,
        }
    }

    pub fn from_env() -> Self {
        let redis = std::env::var("REDIS_URL")
            .ok()
            .and_then(|u| redis::Client::open(u).ok());
        let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);
        Self::new(redis, ttl)
    }

    pub fn backend(&self) -> &'static str {
        if self.redis.is_some() {
            "redis"
        } else {
            "memory"
        }
    }

    pub fn cache_key(activation_key: &str, idempotency_key: &str) -> String {
        format!("listing_gate:analyze:{activation_key}:{idempotency_key}")
    }

    fn expired(&self, stored_at: Instant) -> bool {
        stored_at.elapsed() >= Duration::from_secs(self.ttl_secs)
    }

    pub async fn get(&self, key: &str) -> Option<ListingResult> {
        match &self.redis {
            Some(client) => redis_get(client, key).await,
            None => {
                let mut local = self.local.lock().await;
                let fresh = local
                    .get(key)
                    .filter(|(stored_at, _)| !self.expired(*stored_at))
                    .map(|(_, result)| result.clone());
                if fresh.is_none() {
                    local.remove(key);
                }
                fresh
            }
        }
    }

    pub async fn put(&self, key: &str, value: &ListingResult) {
        match &self.redis {
            Some(client) => redis_set(client, key, value, self.ttl_secs).await,
            None => {
                let mut local = self.local.lock().await;
                local.retain(|_, (stored_at, _)| !self.expired(*stored_at));
                local.insert(key.to_string(), (Instant::now(), value.clone()));
            }
        }
    }
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<ListingResult> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(err) => {
            debug!(target = "listing_gate.store", error = %err, "idempotency_redis_unavailable");
            return None;
        }
    };
    let s: Option<String> = conn.get(key).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

async fn redis_set(client: &redis::Client, key: &str, value: &ListingResult, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}
