// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{allow_stale_auth, attach_provider_token, require_auth, VerifiedIdentity},
    state::AppState,
};

pub mod health;
pub mod session;

pub fn router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/session", get(session::session))
        .layer(from_fn_with_state(state.auth.clone(), attach_provider_token))
        .layer(from_fn_with_state(state.auth.clone(), require_auth));

    let stale_routes = Router::new()
        .route("/session/stale", get(session::stale_session))
        .layer(from_fn_with_state(state.auth.clone(), allow_stale_auth));

    let v1_routes = session_routes.merge(stale_routes).with_state(state.clone());

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::readiness))
        .with_state(state)
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::readiness,
        session::session,
        session::stale_session
    ),
    components(
        schemas(
            health::HealthResponse,
            health::ReadyResponse,
            health::ReadyChecks,
            session::SessionResponse,
            session::StaleSessionResponse,
            VerifiedIdentity
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Session", description = "Verified identity of the caller")
    )
)]
struct ApiDoc;
