// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Behaviour
//!
//! - Keys are cached by `kid` and replaced wholesale on every refresh
//! - A cache miss for a `kid` triggers a refresh of the whole key set
//! - Refreshes are capped per rolling window (default 5 per minute); once the
//!   ceiling is hit, unknown `kid`s fail fast instead of hitting the endpoint
//! - Concurrent misses coalesce onto a single refresh
//! - A key set older than `cache_max_age` is refetched on next lookup, and is
//!   still served while the refresh ceiling is exhausted

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::error::AuthError;

/// Default ceiling on key-set refreshes per rate window.
pub const DEFAULT_REQUESTS_PER_MINUTE: usize = 5;

/// Default maximum age of a cached key set (10 hours).
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(10 * 60 * 60);

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// A verification key resolved from the key set.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: Option<String>,
    pub key: DecodingKey,
    pub algorithm: Algorithm,
}

/// One fetched key set. Never mutated after construction.
struct KeySet {
    by_kid: HashMap<String, SigningKey>,
    all: Vec<SigningKey>,
    fetched_at: Instant,
}

impl KeySet {
    fn lookup(&self, kid: Option<&str>) -> Option<SigningKey> {
        match kid {
            Some(kid) => self.by_kid.get(kid).cloned(),
            // Tokens without a kid are only accepted against a single-key set.
            None if self.all.len() == 1 => self.all.first().cloned(),
            None => None,
        }
    }
}

/// Timestamps of recent refresh attempts, pruned to the rate window.
struct RefreshLimiter {
    attempts: VecDeque<Instant>,
}

impl RefreshLimiter {
    fn try_acquire(&mut self, limit: usize, window: Duration) -> bool {
        let now = Instant::now();
        while let Some(oldest) = self.attempts.front() {
            if now.duration_since(*oldest) >= window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
        if self.attempts.len() >= limit {
            return false;
        }
        self.attempts.push_back(now);
        true
    }
}

/// Resolves signing keys by `kid`, fetching the key set on demand.
pub struct KeyResolver {
    jwks_url: String,
    requests_per_window: usize,
    window: Duration,
    cache_max_age: Duration,
    keys: RwLock<Option<Arc<KeySet>>>,
    /// Held for the duration of a refresh; serializes and coalesces refreshes.
    limiter: Mutex<RefreshLimiter>,
    client: reqwest::Client,
}

impl KeyResolver {
    /// Create a resolver for the given JWKS endpoint.
    pub fn new(jwks_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            requests_per_window: DEFAULT_REQUESTS_PER_MINUTE,
            window: RATE_WINDOW,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            keys: RwLock::new(None),
            limiter: Mutex::new(RefreshLimiter {
                attempts: VecDeque::new(),
            }),
            client,
        }
    }

    /// Set the refresh ceiling per minute.
    pub fn with_requests_per_minute(mut self, limit: usize) -> Self {
        self.requests_per_window = limit;
        self
    }

    /// Set the rolling window the refresh ceiling applies to.
    pub fn with_rate_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the maximum age of a cached key set.
    pub fn with_cache_max_age(mut self, max_age: Duration) -> Self {
        self.cache_max_age = max_age;
        self
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Check if a key set is currently cached and within its max age.
    pub async fn is_cached(&self) -> bool {
        let keys = self.keys.read().await;
        keys.as_ref()
            .is_some_and(|set| set.fetched_at.elapsed() < self.cache_max_age)
    }

    /// Resolve the signing key for `kid`.
    ///
    /// `None` selects the only key of a single-key set.
    pub async fn resolve_key(&self, kid: Option<&str>) -> Result<SigningKey, AuthError> {
        let observed = {
            let keys = self.keys.read().await;
            if let Some(set) = keys.as_ref() {
                if set.fetched_at.elapsed() < self.cache_max_age {
                    if let Some(key) = set.lookup(kid) {
                        return Ok(key);
                    }
                }
            }
            keys.as_ref().map(|set| set.fetched_at)
        };

        let mut limiter = self.limiter.lock().await;

        // Another caller refreshed while we waited: use its result.
        let current = self.keys.read().await.clone();
        if let Some(set) = &current {
            if Some(set.fetched_at) != observed {
                return set.lookup(kid).ok_or_else(|| key_not_found(kid));
            }
        }

        if !limiter.try_acquire(self.requests_per_window, self.window) {
            if let Some(key) = current.as_ref().and_then(|set| set.lookup(kid)) {
                debug!("JWKS refresh ceiling reached, serving stale key");
                return Ok(key);
            }
            warn!(
                kid = kid.unwrap_or("<none>"),
                limit = self.requests_per_window,
                "JWKS refresh ceiling reached, rejecting unknown key"
            );
            return Err(AuthError::UpstreamUnavailable(
                "JWKS refresh rate limit exceeded".to_string(),
            ));
        }

        debug!(kid = kid.unwrap_or("<none>"), "Key not cached, refreshing JWKS");
        let set = Arc::new(self.fetch_key_set().await?);
        let found = set.lookup(kid);
        *self.keys.write().await = Some(set);
        drop(limiter);

        found.ok_or_else(|| key_not_found(kid))
    }

    /// Fetch the key set unless one is cached, honouring the refresh ceiling.
    pub async fn warm(&self) -> Result<(), AuthError> {
        if self.is_cached().await {
            return Ok(());
        }
        let mut limiter = self.limiter.lock().await;
        if !limiter.try_acquire(self.requests_per_window, self.window) {
            return Err(AuthError::UpstreamUnavailable(
                "JWKS refresh rate limit exceeded".to_string(),
            ));
        }
        let set = self.fetch_key_set().await?;
        *self.keys.write().await = Some(Arc::new(set));
        Ok(())
    }

    /// Fetch and convert the key set from the endpoint.
    async fn fetch_key_set(&self) -> Result<KeySet, AuthError> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::UpstreamUnavailable(format!("JWKS fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::UpstreamUnavailable(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::UpstreamUnavailable(format!("invalid JWKS body: {e}")))?;

        let mut by_kid = HashMap::new();
        let mut all = Vec::new();
        for jwk in &jwks.keys {
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                continue;
            }
            match jwk_to_signing_key(jwk) {
                Ok(key) => {
                    if let Some(kid) = &key.kid {
                        by_kid.insert(kid.clone(), key.clone());
                    }
                    all.push(key);
                }
                Err(e) => {
                    warn!(kid = ?jwk.common.key_id, error = %e, "Skipping unusable JWK");
                }
            }
        }

        info!(url = %self.jwks_url, keys = all.len(), "Fetched JWKS");

        Ok(KeySet {
            by_kid,
            all,
            fetched_at: Instant::now(),
        })
    }
}

fn key_not_found(kid: Option<&str>) -> AuthError {
    AuthError::KeyNotFound(kid.unwrap_or("<none>").to_string())
}

/// Convert a JWK to a signing key.
fn jwk_to_signing_key(jwk: &Jwk) -> Result<SigningKey, AuthError> {
    let (key, algorithm) = match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| AuthError::Internal(format!("Failed to create RSA key: {e}")))?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                Some(KeyAlgorithm::PS256) => Algorithm::PS256,
                Some(KeyAlgorithm::PS384) => Algorithm::PS384,
                Some(KeyAlgorithm::PS512) => Algorithm::PS512,
                _ => Algorithm::RS256,
            };
            (key, alg)
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|e| AuthError::Internal(format!("Failed to create EC key: {e}")))?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::ES384) => Algorithm::ES384,
                _ => Algorithm::ES256,
            };
            (key, alg)
        }
        _ => {
            return Err(AuthError::Internal(
                "Unsupported key type in JWKS".to_string(),
            ))
        }
    };

    Ok(SigningKey {
        kid: jwk.common.key_id.clone(),
        key,
        algorithm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{jwks_document, KID};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn jwks_server(expected_fetches: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document()))
            .expect(expected_fetches)
            .mount(&server)
            .await;
        server
    }

    fn resolver_for(server: &MockServer) -> KeyResolver {
        KeyResolver::new(
            format!("{}/.well-known/jwks.json", server.uri()),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn limiter_enforces_ceiling_within_window() {
        let mut limiter = RefreshLimiter {
            attempts: VecDeque::new(),
        };
        for _ in 0..5 {
            assert!(limiter.try_acquire(5, Duration::from_secs(60)));
        }
        assert!(!limiter.try_acquire(5, Duration::from_secs(60)));
    }

    #[test]
    fn limiter_frees_slots_after_window() {
        let mut limiter = RefreshLimiter {
            attempts: VecDeque::new(),
        };
        assert!(limiter.try_acquire(1, Duration::ZERO));
        assert!(limiter.try_acquire(1, Duration::ZERO));
    }

    #[tokio::test]
    async fn cache_initially_empty() {
        let resolver = KeyResolver::new("http://127.0.0.1:9/jwks.json", reqwest::Client::new());
        assert!(!resolver.is_cached().await);
    }

    #[tokio::test]
    async fn known_kid_is_fetched_once_then_cached() {
        let server = jwks_server(1).await;
        let resolver = resolver_for(&server);

        let key = resolver.resolve_key(Some(KID)).await.unwrap();
        assert_eq!(key.kid.as_deref(), Some(KID));
        assert_eq!(key.algorithm, Algorithm::RS256);

        resolver.resolve_key(Some(KID)).await.unwrap();
        assert!(resolver.is_cached().await);
    }

    #[tokio::test]
    async fn unknown_kid_triggers_one_refresh_then_fails() {
        let server = jwks_server(2).await;
        let resolver = resolver_for(&server);
        resolver.resolve_key(Some(KID)).await.unwrap();

        let result = resolver.resolve_key(Some("rotated-away")).await;
        assert!(matches!(result, Err(AuthError::KeyNotFound(kid)) if kid == "rotated-away"));
    }

    #[tokio::test]
    async fn refresh_ceiling_fails_fast() {
        let server = jwks_server(2).await;
        let resolver = resolver_for(&server).with_requests_per_minute(2);

        for _ in 0..2 {
            let result = resolver.resolve_key(Some("bogus")).await;
            assert!(matches!(result, Err(AuthError::KeyNotFound(_))));
        }
        let result = resolver.resolve_key(Some("bogus")).await;
        assert!(matches!(result, Err(AuthError::UpstreamUnavailable(_))));

        // Known keys are still served from cache.
        assert!(resolver.resolve_key(Some(KID)).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_document())
                    .set_delay(Duration::from_millis(150)),
            )
            .expect(1)
            .mount(&server)
            .await;
        let resolver = Arc::new(resolver_for(&server));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move {
                resolver.resolve_key(Some(KID)).await.is_ok()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
    }

    #[tokio::test]
    async fn missing_kid_uses_single_key() {
        let server = jwks_server(1).await;
        let resolver = resolver_for(&server);
        let key = resolver.resolve_key(None).await.unwrap();
        assert_eq!(key.kid.as_deref(), Some(KID));
    }

    #[tokio::test]
    async fn endpoint_failure_is_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&server)
            .await;
        let resolver = resolver_for(&server);

        let result = resolver.resolve_key(Some(KID)).await;
        assert!(matches!(result, Err(AuthError::UpstreamUnavailable(_))));
        assert!(!resolver.is_cached().await);
    }
}
