// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Provider Token Prefetch
//!
//! One-shot background task that walks the whole user directory through the
//! management API and seeds the provider token cache, so the first request of
//! each user is served from cache.
//!
//! ## Strategy
//!
//! 1. Obtain the management token from the broker.
//! 2. List every user.
//! 3. For each linked identity carrying an access token, write it to the
//!    cache only when the key is absent. Existing values are never replaced.
//!
//! The job is best-effort warm-up, not a readiness gate: failures are logged
//! and the server keeps serving. It holds no lock across identities, so
//! request-path resolutions may race it on the same key; both write the same
//! value.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`, like the other background tasks.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::broker::ManagementTokenBroker;
use super::cache::ProviderTokenCache;
use super::management::ManagementClient;

/// Counters reported when the job finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchReport {
    pub users: usize,
    pub identities: usize,
    pub written: usize,
    pub already_cached: usize,
    pub without_token: usize,
    pub failed: usize,
}

/// Seeds the provider token cache from the user directory.
pub struct PrefetchJob {
    broker: Arc<ManagementTokenBroker>,
    management: ManagementClient,
    cache: ProviderTokenCache,
}

impl PrefetchJob {
    pub fn new(
        broker: Arc<ManagementTokenBroker>,
        management: ManagementClient,
        cache: ProviderTokenCache,
    ) -> Self {
        Self {
            broker,
            management,
            cache,
        }
    }

    /// Spawn the job on the runtime. Startup does not wait for it.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<Option<PrefetchReport>> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run to completion, or until `shutdown` fires.
    ///
    /// Returns `None` when the job could not start or was cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Option<PrefetchReport> {
        info!("Provider token prefetch starting");

        tokio::select! {
            report = self.prefetch() => report,
            _ = shutdown.cancelled() => {
                info!("Provider token prefetch cancelled");
                None
            }
        }
    }

    async fn prefetch(&self) -> Option<PrefetchReport> {
        let token = match self.broker.get_management_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Prefetch: management token unavailable");
                return None;
            }
        };

        let users = match self.management.list_users(&token).await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "Prefetch: failed to list users");
                return None;
            }
        };

        let mut report = PrefetchReport {
            users: users.len(),
            ..PrefetchReport::default()
        };

        for identity in users.iter().flat_map(|user| user.identities.iter()) {
            report.identities += 1;
            let key = identity.identity_key();

            let Some(access_token) = identity.access_token() else {
                report.without_token += 1;
                continue;
            };

            match self.cache.get(&key).await {
                Ok(Some(_)) => {
                    report.already_cached += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(identity = %key, error = %e, "Prefetch: cache read failed");
                    report.failed += 1;
                    continue;
                }
            }

            match self.cache.set(&key, &access_token).await {
                Ok(()) => {
                    debug!(identity = %key, "Prefetch: cached provider token");
                    report.written += 1;
                }
                Err(e) => {
                    warn!(identity = %key, error = %e, "Prefetch: cache write failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            users = report.users,
            identities = report.identities,
            written = report.written,
            already_cached = report.already_cached,
            failed = report.failed,
            "Provider token prefetch finished"
        );

        Some(report)
    }
}
