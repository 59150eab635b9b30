// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provider access token resolution.
//!
//! Cache hit returns immediately. On a miss the management token is obtained
//! from the broker, the user is looked up through the management API, and the
//! matching provider identity's token is cached and returned.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::broker::ManagementTokenBroker;
use super::cache::ProviderTokenCache;
use super::claims::{IdentityKey, ProviderAccessToken};
use super::management::{ManagementClient, ManagementError};
use super::AuthError;

/// Resolves an identity key to its provider access token.
#[derive(Clone)]
pub struct ProviderTokenResolver {
    cache: ProviderTokenCache,
    broker: Arc<ManagementTokenBroker>,
    management: ManagementClient,
}

impl ProviderTokenResolver {
    pub fn new(
        cache: ProviderTokenCache,
        broker: Arc<ManagementTokenBroker>,
        management: ManagementClient,
    ) -> Self {
        Self {
            cache,
            broker,
            management,
        }
    }

    pub fn cache(&self) -> &ProviderTokenCache {
        &self.cache
    }

    pub async fn resolve(&self, key: &IdentityKey) -> Result<ProviderAccessToken, AuthError> {
        match self.cache.get(key).await {
            Ok(Some(token)) => return Ok(token),
            Ok(None) => {}
            Err(e) => warn!(identity = %key, error = %e, "Provider token cache read failed"),
        }

        debug!(identity = %key, "Provider token not cached, querying management API");
        let management_token = self.broker.get_management_token().await?;

        let user = self
            .management
            .get_user(&management_token, &key.to_string())
            .await
            .map_err(|e| match e {
                ManagementError::Status { status: 404, .. } => {
                    AuthError::UnknownIdentity(key.to_string())
                }
                other => AuthError::UpstreamUnavailable(other.to_string()),
            })?;

        let token = user
            .find_identity(key)
            .and_then(|identity| identity.access_token())
            .ok_or_else(|| AuthError::UnknownIdentity(key.to_string()))?;

        if let Err(e) = self.cache.set(key, &token).await {
            warn!(identity = %key, error = %e, "Provider token cache write failed");
        } else {
            info!(identity = %key, "Cached provider token");
        }

        Ok(token)
    }
}
