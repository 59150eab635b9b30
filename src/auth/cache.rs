// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provider token cache.
//!
//! Maps an identity key (`provider|providerUserId`) to the provider access
//! token last seen for it. The shared Redis store keeps horizontally scaled
//! instances consistent; the in-process LRU store backs tests and
//! single-instance deployments. Writes overwrite; there are no multi-key
//! operations, so the store's per-command atomicity is all that is needed.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};

use super::claims::{IdentityKey, ProviderAccessToken};

/// Default capacity of the in-process store.
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store backing the provider token cache.
#[async_trait]
pub trait ProviderTokenStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Overwrite `key`. `ttl` of `None` stores without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
}

/// Redis-backed store using a multiplexed connection.
#[derive(Clone)]
pub struct RedisTokenStore {
    conn: MultiplexedConnection,
    key_prefix: Option<String>,
}

impl RedisTokenStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(map_redis_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;
        Ok(Self {
            conn,
            key_prefix: None,
        })
    }

    /// Namespace every key as `<prefix>:<key>`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    fn prefixed_key(&self, key: &str) -> String {
        prefixed(self.key_prefix.as_deref(), key)
    }
}

fn prefixed(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{key}"),
        None => key.to_string(),
    }
}

#[async_trait]
impl ProviderTokenStore for RedisTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(self.prefixed_key(key))
            .await
            .map_err(map_redis_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let full_key = self.prefixed_key(key);
        match ttl.map(|d| d.as_millis() as u64).filter(|ms| *ms > 0) {
            Some(millis) => conn
                .pset_ex::<_, _, ()>(&full_key, value, millis)
                .await
                .map_err(map_redis_error)?,
            None => conn
                .set::<_, _, ()>(&full_key, value)
                .await
                .map_err(map_redis_error)?,
        }
        Ok(())
    }
}

fn map_redis_error(err: RedisError) -> CacheError {
    CacheError::Connection(err.to_string())
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-process LRU store.
pub struct InMemoryTokenStore {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl InMemoryTokenStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryTokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

#[async_trait]
impl ProviderTokenStore for InMemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("lock poisoned".to_string()))?;
        let expired = match entries.get(key) {
            Some(entry) => match entry.expires_at {
                Some(at) if at <= Instant::now() => true,
                _ => return Ok(Some(entry.value.clone())),
            },
            None => return Ok(None),
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("lock poisoned".to_string()))?;
        entries.put(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }
}

/// Typed view over a [`ProviderTokenStore`].
#[derive(Clone)]
pub struct ProviderTokenCache {
    store: Arc<dyn ProviderTokenStore>,
    ttl: Option<Duration>,
}

impl ProviderTokenCache {
    pub fn new(store: Arc<dyn ProviderTokenStore>) -> Self {
        Self { store, ttl: None }
    }

    /// Expire entries after `ttl`. Without one, entries live until overwritten
    /// or evicted by the store.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn get(&self, key: &IdentityKey) -> Result<Option<ProviderAccessToken>, CacheError> {
        Ok(self
            .store
            .get(&key.to_string())
            .await?
            .filter(|token| !token.is_empty())
            .map(ProviderAccessToken::new))
    }

    pub async fn set(&self, key: &IdentityKey, token: &ProviderAccessToken) -> Result<(), CacheError> {
        self.store
            .set(&key.to_string(), token.as_str(), self.ttl)
            .await
    }
}
