// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for what the auth middleware attached to the request.
//!
//! ```rust,ignore
//! async fn my_handler(Identity(user): Identity, ProviderToken(token): ProviderToken) {
//!     // user is VerifiedIdentity, token is ProviderAccessToken
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};

use super::{AuthError, ProviderAccessToken, VerifiedIdentity};

/// Identity verified by `require_auth` or `allow_stale_auth`.
///
/// Rejects with `MissingToken` when no identity was attached.
pub struct Identity(pub VerifiedIdentity);

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<VerifiedIdentity>()
            .cloned()
            .map(Identity)
            .ok_or(AuthError::MissingToken)
    }
}

/// Identity if one was attached. Used behind `allow_stale_auth`.
pub struct MaybeIdentity(pub Option<VerifiedIdentity>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeIdentity {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeIdentity(parts.extensions.get::<VerifiedIdentity>().cloned()))
    }
}

/// Provider access token attached by `attach_provider_token`.
pub struct ProviderToken(pub ProviderAccessToken);

impl<S: Send + Sync> FromRequestParts<S> for ProviderToken {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ProviderAccessToken>()
            .cloned()
            .map(ProviderToken)
            .ok_or_else(|| AuthError::Internal("provider token middleware not applied".to_string()))
    }
}

/// Provider access token if one was attached.
pub struct MaybeProviderToken(pub Option<ProviderAccessToken>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeProviderToken {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeProviderToken(
            parts.extensions.get::<ProviderAccessToken>().cloned(),
        ))
    }
}
