// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::auth::{extractor::MaybeProviderToken, Identity, MaybeIdentity, VerifiedIdentity};
use crate::state::AppState;

/// Field the identity is serialized under before renaming to the
/// configured attach property.
const IDENTITY_FIELD: &str = "user";

/// Session of a strictly authenticated request.
///
/// `user` is renamed to the configured attach property.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub user: VerifiedIdentity,
    /// Whether a provider access token was resolved for the identity.
    /// The token itself is never returned.
    pub provider_token_attached: bool,
}

/// Session of a permissively authenticated request.
#[derive(Debug, Serialize, ToSchema)]
pub struct StaleSessionResponse {
    pub user: Option<VerifiedIdentity>,
}

/// Serialize `body`, moving the identity field to `property`.
fn expose_under(property: &str, body: impl Serialize) -> Json<Value> {
    let mut value = serde_json::to_value(body).unwrap_or(Value::Null);
    if property != IDENTITY_FIELD {
        if let Some(map) = value.as_object_mut() {
            if let Some(identity) = map.remove(IDENTITY_FIELD) {
                map.insert(property.to_string(), identity);
            }
        }
    }
    Json(value)
}

/// Current session, with the provider token resolved.
#[utoipa::path(
    get,
    path = "/v1/session",
    tag = "Session",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Verified identity", body = SessionResponse),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "No provider token for this identity"),
        (status = 503, description = "Identity provider unavailable")
    )
)]
pub async fn session(
    State(state): State<AppState>,
    Identity(identity): Identity,
    MaybeProviderToken(token): MaybeProviderToken,
) -> Json<Value> {
    expose_under(
        state.auth.attach_property(),
        SessionResponse {
            user: identity,
            provider_token_attached: token.is_some(),
        },
    )
}

/// Current session if a token was presented; `null` otherwise.
#[utoipa::path(
    get,
    path = "/v1/session/stale",
    tag = "Session",
    responses(
        (status = 200, description = "Verified identity or null", body = StaleSessionResponse),
        (status = 401, description = "Invalid token")
    )
)]
pub async fn stale_session(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
) -> Json<Value> {
    expose_under(
        state.auth.attach_property(),
        StaleSessionResponse { user: identity },
    )
}
