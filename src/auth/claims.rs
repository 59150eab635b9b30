// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Verified identities and the keys derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use super::AuthError;

/// Claim names checked, in order, for the account identifier.
///
/// `sub` is what Auth0 issues; `id` and `_id` cover tokens minted by other
/// services in front of the gateway.
const SUBJECT_CLAIMS: [&str; 3] = ["id", "_id", "sub"];

/// Identity extracted from a verified token.
///
/// Owned by the request it was verified for; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VerifiedIdentity {
    /// Account identifier, typically `provider|providerUserId`
    pub subject: String,

    /// Every claim carried by the token
    #[schema(value_type = Object)]
    pub raw_claims: Map<String, Value>,
}

impl VerifiedIdentity {
    /// Build from decoded claims, failing when no subject claim is present.
    pub fn from_claims(raw_claims: Map<String, Value>) -> Result<Self, AuthError> {
        let subject = SUBJECT_CLAIMS
            .iter()
            .find_map(|name| match raw_claims.get(*name) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
            .ok_or_else(|| AuthError::ClaimMismatch("token carries no subject".to_string()))?;

        Ok(Self {
            subject,
            raw_claims,
        })
    }

    /// Derive the provider token cache key for this identity.
    pub fn identity_key(&self) -> Result<IdentityKey, AuthError> {
        IdentityKey::parse(&self.subject)
    }
}

/// Cache key of the form `provider|providerUserId`.
///
/// Two identities with the same key are the same account across provider
/// systems. Components compare by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    provider: String,
    user_id: String,
}

impl IdentityKey {
    pub fn new(provider: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            user_id: user_id.into(),
        }
    }

    /// Split at the first `|`. Both halves must be non-empty.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        match raw.split_once('|') {
            Some((provider, user_id)) if !provider.is_empty() && !user_id.is_empty() => {
                Ok(Self::new(provider, user_id))
            }
            _ => Err(AuthError::UnknownIdentity(raw.to_string())),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Exact component equality against a provider identity record.
    pub fn matches(&self, provider: &str, user_id: &str) -> bool {
        self.provider == provider && self.user_id == user_id
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.provider, self.user_id)
    }
}

/// Opaque third-party access token scoped to one identity key.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderAccessToken(String);

impl ProviderAccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProviderAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProviderAccessToken(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn from_claims_uses_sub() {
        let identity =
            VerifiedIdentity::from_claims(claims(json!({"sub": "github|42", "scope": "x"})))
                .unwrap();
        assert_eq!(identity.subject, "github|42");
        assert_eq!(identity.raw_claims["scope"], "x");
    }

    #[test]
    fn from_claims_prefers_id_aliases() {
        let identity = VerifiedIdentity::from_claims(claims(
            json!({"_id": "github|7", "sub": "auth0|abc"}),
        ))
        .unwrap();
        assert_eq!(identity.subject, "github|7");
    }

    #[test]
    fn from_claims_without_subject_is_claim_mismatch() {
        let result = VerifiedIdentity::from_claims(claims(json!({"iss": "x"})));
        assert!(matches!(result, Err(AuthError::ClaimMismatch(_))));
    }

    #[test]
    fn identity_key_splits_at_first_separator() {
        let key = IdentityKey::parse("oauth2|custom|7").unwrap();
        assert_eq!(key.provider(), "oauth2");
        assert_eq!(key.user_id(), "custom|7");
        assert_eq!(key.to_string(), "oauth2|custom|7");
    }

    #[test]
    fn identity_key_rejects_subjects_without_provider() {
        assert!(matches!(
            IdentityKey::parse("plainuser"),
            Err(AuthError::UnknownIdentity(_))
        ));
        assert!(IdentityKey::parse("|42").is_err());
        assert!(IdentityKey::parse("github|").is_err());
    }

    #[test]
    fn matches_is_exact() {
        let key = IdentityKey::parse("github|123").unwrap();
        assert!(key.matches("github", "123"));
        assert!(!key.matches("github", "1234"));
        assert!(!key.matches("GitHub", "123"));
        assert!(!key.matches("github", "0123"));
    }

    #[test]
    fn provider_token_debug_is_redacted() {
        let token = ProviderAccessToken::new("gho_secret");
        assert!(!format!("{token:?}").contains("gho_secret"));
        assert_eq!(token.as_str(), "gho_secret");
    }
}
