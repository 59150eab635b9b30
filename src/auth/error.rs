// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Authentication error type.
///
/// Every failure of the verifier, the provider token resolver, or the
/// middleware facade is one of these. The facade never writes a response
/// itself: it returns the error and axum renders it through `IntoResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer token present while credentials are required
    MissingToken,
    /// Authorization header present but not `Bearer <token>`
    InvalidAuthHeader,
    /// Token could not be parsed
    MalformedToken,
    /// Signing key could not be resolved, or the signature did not verify
    SignatureInvalid,
    /// Issuer, audience, algorithm, or a time-based claim did not match
    ClaimMismatch(String),
    /// No key with the requested `kid` in the key set
    KeyNotFound(String),
    /// An upstream endpoint (JWKS, management API) could not be reached
    UpstreamUnavailable(String),
    /// The identity has no linked provider account
    UnknownIdentity(String),
    /// The management token exchange failed
    BrokerUnavailable(String),
    /// Internal error
    Internal(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::SignatureInvalid => "invalid_signature",
            AuthError::ClaimMismatch(_) => "claim_mismatch",
            AuthError::KeyNotFound(_) => "key_not_found",
            AuthError::UpstreamUnavailable(_) => "upstream_unavailable",
            AuthError::UnknownIdentity(_) => "unknown_identity",
            AuthError::BrokerUnavailable(_) => "broker_unavailable",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingToken
            | AuthError::InvalidAuthHeader
            | AuthError::MalformedToken
            | AuthError::SignatureInvalid
            | AuthError::ClaimMismatch(_)
            | AuthError::KeyNotFound(_) => StatusCode::UNAUTHORIZED,
            AuthError::UnknownIdentity(_) => StatusCode::FORBIDDEN,
            AuthError::UpstreamUnavailable(_) | AuthError::BrokerUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this is a token problem (as opposed to an upstream or linkage problem).
    pub fn is_token_error(&self) -> bool {
        self.status_code() == StatusCode::UNAUTHORIZED
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "No authorization token was found"),
            AuthError::InvalidAuthHeader => {
                write!(f, "Invalid authorization header format (expected 'Bearer <token>')")
            }
            AuthError::MalformedToken => write!(f, "Token is malformed"),
            AuthError::SignatureInvalid => write!(f, "Token signature is invalid"),
            AuthError::ClaimMismatch(claim) => write!(f, "Token claim mismatch: {claim}"),
            AuthError::KeyNotFound(kid) => write!(f, "No signing key found for kid '{kid}'"),
            AuthError::UpstreamUnavailable(msg) => write!(f, "Upstream unavailable: {msg}"),
            AuthError::UnknownIdentity(key) => {
                write!(f, "No linked provider account for identity '{key}'")
            }
            AuthError::BrokerUnavailable(msg) => {
                write!(f, "Management token exchange failed: {msg}")
            }
            AuthError::Internal(msg) => write!(f, "Internal authentication error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_token_error() {
            tracing::debug!(error = %self, error_code = self.error_code(), "Auth request rejected");
        } else {
            tracing::warn!(error = %self, error_code = self.error_code(), "Auth request failed");
        }
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}
