// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Readiness response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall status ("ok" or "degraded").
    pub status: String,
    /// Individual checks and their results.
    pub checks: ReadyChecks,
}

/// Individual readiness check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyChecks {
    /// JWKS (token verification keys) status.
    pub jwks: String,
    /// Management token state: "ok", "empty", "exchanging" or "expired".
    /// Informational; an empty slot is exchanged on first use.
    pub management_token: String,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Check that verification keys are cached, fetching them if not.
async fn check_jwks(state: &AppState) -> String {
    if state.keys.is_cached().await {
        return "ok".to_string();
    }
    match state.keys.warm().await {
        Ok(()) => "ok".to_string(),
        Err(_) => "unavailable".to_string(),
    }
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
/// Does not check dependencies - use readiness for that.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
///
/// Returns 503 when the JWKS cannot be fetched, since no token can be
/// verified without it.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let jwks = check_jwks(&state).await;
    let ready = jwks == "ok";

    let response = ReadyResponse {
        status: if ready { "ok" } else { "degraded" }.to_string(),
        checks: ReadyChecks {
            jwks,
            management_token: state.broker.status().as_str().to_string(),
        },
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
