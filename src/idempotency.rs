use crate::tools::Envelope;
use redis::AsyncCommands;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Stored under a key while the first request holding it is still running.
const PENDING_MARKER: &str = "__pending__";

/// Outcome of claiming an idempotency key.
#[derive(Debug, PartialEq)]
pub enum Claim {
    /// The caller owns the key and must `complete` or `release` it.
    Acquired,
    /// A previous request finished; replay its envelope.
    Replay(Envelope),
    /// Another request with the same key is still running.
    InFlight,
}

#[derive(Clone)]
pub enum Slot {
    Pending,
    Done(Envelope),
}

pub struct Entry {
    slot: Slot,
    expires_at: Instant,
}

/// Replay cache for `Idempotency-Key` on listing creation. Redis when `REDIS_URL` is set,
/// otherwise a process-local map. Both expire entries after the configured TTL.
#[derive(Clone)]
pub enum IdempotencyStore {
    Redis {
        client: redis::Client,
        ttl_secs: u64,
    },
    Memory {
        entries: Arc<Mutex<HashMap<String, Entry>>>,
        ttl: Duration,
    },
}

impl IdempotencyStore {
    pub fn from_config(redis_url: Option<&str>, ttl_secs: u64) -> Self {
        let ttl = Duration::from_secs(ttl_secs);
        match redis_url.map(redis::Client::open) {
            Some(Ok(client)) => Self::Redis { client, ttl_secs },
            Some(Err(err)) => {
                warn!(target = "listing.api", error = %err, "invalid REDIS_URL; using in-memory idempotency");
                Self::memory(ttl)
            }
            None => Self::memory(ttl),
        }
    }

    pub fn memory(ttl: Duration) -> Self {
        Self::Memory {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Keys are scoped per user so two callers cannot replay each other's results.
    pub fn key(user_id: &str, key: &str) -> String {
        format!("idem:create_listing:{user_id}:{key}")
    }

    /// Atomically reserves `key` unless a live entry already exists.
    pub async fn claim(&self, key: &str) -> Claim {
        match self {
            Self::Redis { client, ttl_secs } => redis_claim(client, key, *ttl_secs).await,
            Self::Memory { entries, ttl } => {
                let now = Instant::now();
                let mut entries = entries.lock().await;
                entries.retain(|_, entry| entry.expires_at > now);
                match entries.get(key).map(|entry| entry.slot.clone()) {
                    Some(Slot::Pending) => Claim::InFlight,
                    Some(Slot::Done(envelope)) => Claim::Replay(envelope),
                    None => {
                        entries.insert(
                            key.to_string(),
                            Entry {
                                slot: Slot::Pending,
                                expires_at: now + *ttl,
                            },
                        );
                        Claim::Acquired
                    }
                }
            }
        }
    }

    /// Stores the finished envelope for a key obtained through `claim`.
    pub async fn complete(&self, key: &str, value: &Envelope) {
        match self {
            Self::Redis { client, ttl_secs } => redis_set(client, key, value, *ttl_secs).await,
            Self::Memory { entries, ttl } => {
                entries.lock().await.insert(
                    key.to_string(),
                    Entry {
                        slot: Slot::Done(value.clone()),
                        expires_at: Instant::now() + *ttl,
                    },
                );
            }
        }
    }

    /// Drops a pending claim so the request can be retried with the same key.
    pub async fn release(&self, key: &str) {
        match self {
            Self::Redis { client, .. } => {
                if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                    let _: Result<(), _> = conn.del(key).await;
                }
            }
            Self::Memory { entries, .. } => {
                let mut entries = entries.lock().await;
                if matches!(entries.get(key).map(|entry| &entry.slot), Some(Slot::Pending)) {
                    entries.remove(key);
                }
            }
        }
    }
}

async fn redis_claim(client: &redis::Client, key: &str, ttl_secs: u64) -> Claim {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(err) => {
            debug!(target = "listing.api", error = %err, "redis unavailable for idempotency claim");
            return Claim::Acquired;
        }
    };
    let set: Result<Option<String>, _> = redis::cmd("SET")
        .arg(key)
        .arg(PENDING_MARKER)
        .arg("NX")
        .arg("EX")
        .arg(ttl_secs)
        .query_async(&mut conn)
        .await;
    match set {
        Ok(Some(_)) => Claim::Acquired,
        Ok(None) => {
            let existing: redis::RedisResult<Option<String>> = conn.get(key).await;
            match existing.ok().flatten().as_deref() {
                // Expired between SET and GET.
                None => Claim::Acquired,
                Some(PENDING_MARKER) => Claim::InFlight,
                Some(raw) => match serde_json::from_str(raw) {
                    Ok(envelope) => Claim::Replay(envelope),
                    Err(_) => Claim::InFlight,
                },
            }
        }
        Err(err) => {
            debug!(target = "listing.api", error = %err, "idempotency claim failed");
            Claim::Acquired
        }
    }
}

async fn redis_set(client: &redis::Client, key: &str, value: &Envelope, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_replays_per_user() {
        let store = IdempotencyStore::from_config(None, 60);
        let envelope = Envelope::ok("Listing created successfully", json!({"listing_id": "1"}));
        let key = IdempotencyStore::key("user-a", "req-1");
        assert_eq!(key, "idem:create_listing:user-a:req-1");

        assert_eq!(store.claim(&key).await, Claim::Acquired);
        assert_eq!(store.claim(&key).await, Claim::InFlight);
        store.complete(&key, &envelope).await;
        assert_eq!(store.claim(&key).await, Claim::Replay(envelope));
        assert_eq!(
            store.claim(&IdempotencyStore::key("user-b", "req-1")).await,
            Claim::Acquired
        );
    }

    #[tokio::test]
    async fn released_claim_can_be_retried() {
        let store = IdempotencyStore::memory(Duration::from_secs(60));
        assert_eq!(store.claim("k").await, Claim::Acquired);
        store.release("k").await;
        assert_eq!(store.claim("k").await, Claim::Acquired);
    }

    #[tokio::test]
    async fn memory_entries_expire_after_ttl() {
        let store = IdempotencyStore::memory(Duration::from_millis(20));
        let envelope = Envelope::ok("Listing created successfully", json!({"listing_id": "1"}));
        assert_eq!(store.claim("k").await, Claim::Acquired);
        store.complete("k", &envelope).await;
        assert_eq!(store.claim("k").await, Claim::Replay(envelope));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.claim("k").await, Claim::Acquired);
        let IdempotencyStore::Memory { entries, .. } = &store else {
            panic!("memory store expected");
        };
        assert_eq!(entries.lock().await.len(), 1);
    }
}
