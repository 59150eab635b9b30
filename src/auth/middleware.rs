// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! Three entry points, each used with `axum::middleware::from_fn_with_state`:
//!
//! - [`require_auth`]: strict verification; an absent token is rejected
//! - [`allow_stale_auth`]: permissive verification for flows that can still
//!   refresh downstream; an absent token passes with no identity attached
//! - [`attach_provider_token`]: resolves the provider access token for the
//!   identity attached by one of the above
//!
//! Failures are returned as [`AuthError`] and rendered by axum; the
//! middleware never builds responses itself.
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/repos", get(list_repos))
//!     .layer(from_fn_with_state(auth.clone(), attach_provider_token))
//!     .layer(from_fn_with_state(auth.clone(), require_auth));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::resolver::ProviderTokenResolver;
use super::verifier::{CredentialsMode, TokenVerifier};
use super::{AuthError, ProviderAccessToken, VerifiedIdentity};

/// Default name the verified identity is exposed under.
pub const DEFAULT_ATTACH_PROPERTY: &str = "user";

/// Shared state of the auth middleware.
#[derive(Clone)]
pub struct AuthMiddleware {
    verifier: Arc<TokenVerifier>,
    resolver: ProviderTokenResolver,
    attach_property: Arc<str>,
}

impl AuthMiddleware {
    pub fn new(verifier: Arc<TokenVerifier>, resolver: ProviderTokenResolver) -> Self {
        Self {
            verifier,
            resolver,
            attach_property: Arc::from(DEFAULT_ATTACH_PROPERTY),
        }
    }

    /// Set the name the identity is exposed under in responses that echo it.
    pub fn with_attach_property(mut self, name: impl AsRef<str>) -> Self {
        self.attach_property = Arc::from(name.as_ref());
        self
    }

    pub fn attach_property(&self) -> &str {
        &self.attach_property
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    pub fn resolver(&self) -> &ProviderTokenResolver {
        &self.resolver
    }

    /// Verify the request's bearer token and attach the identity, if any.
    async fn authenticate(&self, request: &mut Request, mode: CredentialsMode) -> Result<(), AuthError> {
        let token = bearer_token(request.headers(), mode)?;
        let identity = self.verifier.verify(token.as_deref(), mode).await?;

        if let Some(identity) = identity {
            debug!(subject = %identity.subject, "Authenticated request");
            request.extensions_mut().insert(identity);
        }
        Ok(())
    }

    /// Resolve the provider token for an attached identity.
    pub async fn provider_token_for(
        &self,
        identity: Option<&VerifiedIdentity>,
    ) -> Result<ProviderAccessToken, AuthError> {
        let identity = identity.ok_or(AuthError::MissingToken)?;
        let key = identity.identity_key()?;
        self.resolver.resolve(&key).await
    }
}

/// Extract the bearer token from the `Authorization` header.
///
/// An absent header is no token. A header that is not `Bearer <token>` is
/// rejected when credentials are required and ignored otherwise.
pub fn bearer_token(headers: &HeaderMap, mode: CredentialsMode) -> Result<Option<String>, AuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let parsed = value.to_str().ok().and_then(|value| {
        let mut parts = value.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
                Some(token.to_string())
            }
            _ => None,
        }
    });

    match (parsed, mode) {
        (Some(token), _) => Ok(Some(token)),
        (None, CredentialsMode::Required) => Err(AuthError::InvalidAuthHeader),
        (None, CredentialsMode::Optional) => Ok(None),
    }
}

/// Strict verification: the request must carry a valid token.
pub async fn require_auth(
    State(auth): State<AuthMiddleware>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    auth.authenticate(&mut request, CredentialsMode::Required)
        .await?;
    Ok(next.run(request).await)
}

/// Permissive verification: a present token must be valid, an absent one passes.
pub async fn allow_stale_auth(
    State(auth): State<AuthMiddleware>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    auth.authenticate(&mut request, CredentialsMode::Optional)
        .await?;
    Ok(next.run(request).await)
}

/// Resolve and attach the provider access token for the verified identity.
pub async fn attach_provider_token(
    State(auth): State<AuthMiddleware>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = auth
        .provider_token_for(request.extensions().get::<VerifiedIdentity>())
        .await?;
    request.extensions_mut().insert(token);
    Ok(next.run(request).await)
}
