// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Management token broker.
//!
//! Exchanges client credentials for the single administrative token used to
//! call the user-management API, and shares it with every caller.
//!
//! ## Single flight
//!
//! The token slot sits behind an async mutex. The caller that finds the slot
//! empty (or due for refresh) moves the owned guard into a spawned exchange
//! task, so every concurrent caller waits on that one exchange, and the
//! exchange still completes if the request that started it goes away.
//!
//! Every finished exchange bumps a generation counter. A caller that observed
//! an older generation before queueing on the mutex shares the outcome of the
//! exchange it waited on, including its failure. A failed exchange leaves the
//! slot empty, so the next caller to arrive afterwards tries again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::AuthError;

/// Default margin before `expires_in` at which the token is re-exchanged.
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Administrative access token for the user-management API.
#[derive(Clone, PartialEq, Eq)]
pub struct ManagementAccessToken(String);

impl ManagementAccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ManagementAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ManagementAccessToken(<redacted>)")
    }
}

/// When a held management token is exchanged again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Exchange once and reuse for the life of the process
    ProcessLifetime,
    /// Re-exchange `skew` before the `expires_in` reported by the token endpoint
    HonorExpiry { skew: Duration },
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        RefreshPolicy::HonorExpiry {
            skew: DEFAULT_EXPIRY_SKEW,
        }
    }
}

/// Client credentials for the management API.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub audience: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("audience", &self.audience)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("token request failed: {0}")]
    Request(String),

    #[error("token request returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

#[derive(Serialize)]
struct ClientCredentialsRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Clone)]
struct CachedToken {
    token: ManagementAccessToken,
    refresh_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.refresh_at.is_none_or(|at| Instant::now() < at)
    }
}

/// Immutable exchange parameters, shared with the spawned exchange task.
struct Exchange {
    token_url: String,
    credentials: ClientCredentials,
    policy: RefreshPolicy,
    http: reqwest::Client,
}

impl Exchange {
    async fn run(&self) -> Result<CachedToken, BrokerError> {
        let body = ClientCredentialsRequest {
            grant_type: "client_credentials",
            client_id: &self.credentials.client_id,
            client_secret: &self.credentials.client_secret,
            audience: &self.credentials.audience,
        };

        let response = self
            .http
            .post(&self.token_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Status { status, body });
        }

        let token_response: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::InvalidResponse(e.to_string()))?;

        if token_response.access_token.trim().is_empty() {
            return Err(BrokerError::InvalidResponse(
                "token response did not include access_token".to_string(),
            ));
        }

        let refresh_at = match self.policy {
            RefreshPolicy::ProcessLifetime => None,
            RefreshPolicy::HonorExpiry { skew } => token_response
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs).saturating_sub(skew)),
        };

        info!(
            expires_in = ?token_response.expires_in,
            policy = ?self.policy,
            "Obtained management API token"
        );

        Ok(CachedToken {
            token: ManagementAccessToken::new(token_response.access_token),
            refresh_at,
        })
    }
}

/// State of the held token, as seen by readiness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerStatus {
    Empty,
    Exchanging,
    Ready,
    Expired,
}

impl BrokerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerStatus::Empty => "empty",
            BrokerStatus::Exchanging => "exchanging",
            BrokerStatus::Ready => "ok",
            BrokerStatus::Expired => "expired",
        }
    }
}

/// Holds and shares the management access token.
pub struct ManagementTokenBroker {
    exchange: Arc<Exchange>,
    slot: Arc<Mutex<Slot>>,
    /// Number of finished exchanges; only written while the slot is locked.
    generation: Arc<AtomicU64>,
}

/// Token slot plus the outcome of the last exchange.
#[derive(Default)]
struct Slot {
    token: Option<CachedToken>,
    last_failure: Option<String>,
}

impl ManagementTokenBroker {
    pub fn new(
        token_url: impl Into<String>,
        credentials: ClientCredentials,
        http: reqwest::Client,
    ) -> Self {
        Self::with_policy(token_url, credentials, http, RefreshPolicy::default())
    }

    pub fn with_policy(
        token_url: impl Into<String>,
        credentials: ClientCredentials,
        http: reqwest::Client,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            exchange: Arc::new(Exchange {
                token_url: token_url.into(),
                credentials,
                policy,
                http,
            }),
            slot: Arc::new(Mutex::new(Slot::default())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.exchange.policy
    }

    /// Return the shared token, exchanging credentials if none is held.
    pub async fn get_management_token(&self) -> Result<ManagementAccessToken, AuthError> {
        let observed = self.generation.load(Ordering::Acquire);
        let mut slot = self.slot.clone().lock_owned().await;
        if let Some(cached) = slot.token.as_ref().filter(|cached| cached.is_fresh()) {
            return Ok(cached.token.clone());
        }

        // An exchange finished while we queued and left no usable token.
        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(failure) = slot.last_failure.clone() {
                return Err(AuthError::BrokerUnavailable(failure));
            }
        }

        let exchange = self.exchange.clone();
        let generation = self.generation.clone();
        let task = tokio::spawn(async move {
            let result = exchange.run().await;
            match &result {
                Ok(cached) => {
                    slot.token = Some(cached.clone());
                    slot.last_failure = None;
                }
                Err(e) => {
                    slot.token = None;
                    slot.last_failure = Some(e.to_string());
                }
            }
            generation.fetch_add(1, Ordering::Release);
            result.map(|cached| cached.token)
        });

        match task.await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(e)) => {
                warn!(error = %e, "Management token exchange failed");
                Err(AuthError::BrokerUnavailable(e.to_string()))
            }
            Err(e) => Err(AuthError::Internal(format!("token exchange task failed: {e}"))),
        }
    }

    /// Current slot state without waiting on an in-flight exchange.
    pub fn status(&self) -> BrokerStatus {
        match self.slot.try_lock() {
            Err(_) => BrokerStatus::Exchanging,
            Ok(slot) => match slot.token.as_ref() {
                None => BrokerStatus::Empty,
                Some(cached) if cached.is_fresh() => BrokerStatus::Ready,
                Some(_) => BrokerStatus::Expired,
            },
        }
    }
}
