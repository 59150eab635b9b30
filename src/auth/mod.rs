// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Auth0 JWT verification and provider access token brokering for the
//! gateway's HTTP routes.
//!
//! ## Auth Flow
//!
//! 1. Client sends `Authorization: Bearer <Auth0 JWT>`
//! 2. Gateway:
//!    - Fetches the tenant JWKS over HTTPS (rate-limited, cached)
//!    - Verifies RS256 signature, expiry, issuer, audience
//!    - Attaches the verified identity to the request
//! 3. Routes that call third-party APIs on the user's behalf additionally:
//!    - Look up `provider|providerUserId` in the provider token cache
//!    - On a miss, query the management API with a brokered
//!      client-credentials token and cache the result
//!
//! ## Security
//!
//! - Only asymmetric algorithms are accepted; `none` and HMAC are rejected
//! - Clock skew tolerance is 60 seconds
//! - Management and provider tokens are redacted from `Debug` output

pub mod broker;
pub mod cache;
pub mod claims;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod management;
pub mod middleware;
pub mod prefetch;
pub mod resolver;
pub mod verifier;

#[cfg(test)]
pub mod test_support;

pub use broker::{ClientCredentials, ManagementTokenBroker, RefreshPolicy};
pub use cache::{InMemoryTokenStore, ProviderTokenCache, ProviderTokenStore, RedisTokenStore};
pub use claims::{IdentityKey, ProviderAccessToken, VerifiedIdentity};
pub use error::AuthError;
pub use extractor::{Identity, MaybeIdentity, MaybeProviderToken, ProviderToken};
pub use jwks::KeyResolver;
pub use management::ManagementClient;
pub use middleware::{allow_stale_auth, attach_provider_token, require_auth, AuthMiddleware};
pub use prefetch::{PrefetchJob, PrefetchReport};
pub use resolver::ProviderTokenResolver;
pub use verifier::{CredentialsMode, TokenVerifier};
