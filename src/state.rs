// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::auth::{
    broker::ManagementTokenBroker,
    cache::{CacheError, InMemoryTokenStore, ProviderTokenCache, ProviderTokenStore, RedisTokenStore},
    jwks::KeyResolver,
    management::{ManagementClient, ManagementError},
    middleware::AuthMiddleware,
    prefetch::PrefetchJob,
    resolver::ProviderTokenResolver,
    verifier::TokenVerifier,
};
use crate::config::AuthSettings;

/// Timeout applied to every outbound call (JWKS, token, management API).
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to build HTTP client: {0}")]
    Http(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Management(#[from] ManagementError),
}

/// Shared application state.
///
/// Every component is built once at startup and shared by handle; nothing
/// lives in globals.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthMiddleware,
    pub keys: Arc<KeyResolver>,
    pub broker: Arc<ManagementTokenBroker>,
    management: ManagementClient,
    cache: ProviderTokenCache,
}

impl AppState {
    /// Wire components from settings around an already chosen token store.
    pub fn new(
        settings: &AuthSettings,
        store: Arc<dyn ProviderTokenStore>,
        http: reqwest::Client,
    ) -> Result<Self, StartupError> {
        let keys = Arc::new(
            KeyResolver::new(settings.jwks_url.clone(), http.clone())
                .with_requests_per_minute(settings.jwks_requests_per_minute)
                .with_cache_max_age(settings.jwks_cache_max_age),
        );
        let verifier = Arc::new(TokenVerifier::new(
            keys.clone(),
            settings.issuer.clone(),
            settings.audience.clone(),
        ));
        let broker = Arc::new(ManagementTokenBroker::with_policy(
            settings.management_token_url.clone(),
            settings.credentials.clone(),
            http.clone(),
            settings.refresh_policy,
        ));
        let management = ManagementClient::new(&settings.management_api_url, http)?;
        let cache = ProviderTokenCache::new(store).with_ttl(settings.provider_token_ttl);

        let resolver = ProviderTokenResolver::new(cache.clone(), broker.clone(), management.clone());
        let auth = AuthMiddleware::new(verifier, resolver)
            .with_attach_property(&settings.attach_property);

        Ok(Self {
            auth,
            keys,
            broker,
            management,
            cache,
        })
    }

    /// Build the HTTP client and token store, then wire the components.
    ///
    /// Uses Redis when `REDIS_URL` is set, otherwise the in-process LRU store.
    pub async fn from_settings(settings: &AuthSettings) -> Result<Self, StartupError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| StartupError::Http(e.to_string()))?;

        let store: Arc<dyn ProviderTokenStore> = match settings.redis_url.as_deref() {
            Some(url) => {
                let mut store = RedisTokenStore::connect(url).await?;
                if let Some(prefix) = &settings.redis_key_prefix {
                    store = store.with_prefix(prefix.clone());
                }
                info!(prefix = ?settings.redis_key_prefix, "Provider token cache: redis");
                Arc::new(store)
            }
            None => {
                info!("Provider token cache: in-process (REDIS_URL not set)");
                Arc::new(InMemoryTokenStore::default())
            }
        };

        Self::new(settings, store, http)
    }

    /// Bulk prefetch job sharing this state's broker, client, and cache.
    pub fn prefetch_job(&self) -> PrefetchJob {
        PrefetchJob::new(
            self.broker.clone(),
            self.management.clone(),
            self.cache.clone(),
        )
    }
}
