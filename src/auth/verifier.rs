// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token verification against the JWKS key set.
//!
//! Verification is a pure function of the token and the current key set:
//! no retries, and every failure is terminal for the request.

use std::sync::Arc;

use jsonwebtoken::dangerous::insecure_decode;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::{Map, Value};
use tracing::debug;

use super::jwks::KeyResolver;
use super::{AuthError, VerifiedIdentity};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Whether an absent token is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsMode {
    /// Absent token fails with `MissingToken`
    Required,
    /// Absent token yields no identity; a present token is still fully verified
    Optional,
}

/// Verifies bearer tokens for one issuer/audience pair.
pub struct TokenVerifier {
    keys: Arc<KeyResolver>,
    issuer: String,
    audience: String,
    algorithm: Algorithm,
    leeway: u64,
}

impl TokenVerifier {
    /// Create a verifier accepting RS256 tokens from `issuer` for `audience`.
    pub fn new(
        keys: Arc<KeyResolver>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audience: audience.into(),
            algorithm: Algorithm::RS256,
            leeway: CLOCK_SKEW_LEEWAY,
        }
    }

    /// Accept a different asymmetric algorithm. Symmetric algorithms are refused.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            self.algorithm = algorithm;
        }
        self
    }

    pub fn keys(&self) -> &Arc<KeyResolver> {
        &self.keys
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Verify `raw_token`.
    ///
    /// Returns `Ok(None)` only for an absent token in [`CredentialsMode::Optional`].
    pub async fn verify(
        &self,
        raw_token: Option<&str>,
        mode: CredentialsMode,
    ) -> Result<Option<VerifiedIdentity>, AuthError> {
        let Some(token) = raw_token else {
            return match mode {
                CredentialsMode::Required => Err(AuthError::MissingToken),
                CredentialsMode::Optional => Ok(None),
            };
        };

        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;

        // Structure and payload are checked before any key lookup.
        if token.split('.').count() != 3 {
            return Err(AuthError::MalformedToken);
        }
        insecure_decode::<Map<String, Value>>(token).map_err(|_| AuthError::MalformedToken)?;

        if header.alg != self.algorithm {
            return Err(AuthError::ClaimMismatch(format!(
                "algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let signing_key = self
            .keys
            .resolve_key(header.kid.as_deref())
            .await
            .map_err(|e| {
                debug!(kid = ?header.kid, error = %e, "Signing key resolution failed");
                AuthError::SignatureInvalid
            })?;

        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.leeway = self.leeway;

        let token_data = decode::<Map<String, Value>>(token, &signing_key.key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidRsaKey(_)
                | ErrorKind::InvalidEcdsaKey
                | ErrorKind::InvalidKeyFormat => AuthError::SignatureInvalid,
                ErrorKind::InvalidIssuer => AuthError::ClaimMismatch("issuer".to_string()),
                ErrorKind::InvalidAudience => AuthError::ClaimMismatch("audience".to_string()),
                ErrorKind::InvalidAlgorithm => AuthError::ClaimMismatch("algorithm".to_string()),
                ErrorKind::ExpiredSignature => AuthError::ClaimMismatch("token expired".to_string()),
                ErrorKind::ImmatureSignature => {
                    AuthError::ClaimMismatch("token not yet valid".to_string())
                }
                ErrorKind::MissingRequiredClaim(claim) => {
                    AuthError::ClaimMismatch(format!("missing claim {claim}"))
                }
                _ => AuthError::MalformedToken,
            })?;

        VerifiedIdentity::from_claims(token_data.claims).map(Some)
    }
}
