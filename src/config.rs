// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the gateway. Configuration is loaded from the environment at
//! startup; values are trimmed and empty strings are treated as unset.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `AUTH0_WEB_KEY_SET_URL` | JWKS endpoint for JWT verification | Required |
//! | `AUTH0_DOMAIN` | Expected JWT issuer claim | Required |
//! | `AUTH0_AUDIENCE` | Expected JWT audience claim | Required |
//! | `AUTH0_MANAGEMENT_API_TOKEN_URL` | Client-credentials token endpoint | Required |
//! | `AUTH0_MANAGEMENT_API_URL` | User-management API base URL | Required |
//! | `AUTH0_MANAGEMENT_API_CLIENT` | Management client id | Required |
//! | `AUTH0_MANAGEMENT_API_SECRET` | Management client secret | Required |
//! | `AUTH0_MANAGEMENT_API_AUDIENCE` | Management API audience | Required |
//! | `AUTH_ATTACH_PROPERTY` | Name the verified identity is exposed under | `user` |
//! | `JWKS_REQUESTS_PER_MINUTE` | Key-set refresh ceiling | `5` |
//! | `JWKS_CACHE_MAX_AGE_SECS` | Max age of a cached key set | `36000` |
//! | `MANAGEMENT_TOKEN_REFRESH` | `process` or `expiry` | `expiry` |
//! | `PROVIDER_TOKEN_TTL_SECS` | TTL applied to cached provider tokens | unset |
//! | `REDIS_URL` | Shared provider token store | in-process LRU |
//! | `REDIS_KEY_PREFIX` | Namespace for keys in the shared store | unset |
//! | `PROVIDER_TOKEN_PREFETCH` | Seed the cache at startup | `true` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::fmt;
use std::time::Duration;

use crate::auth::broker::{ClientCredentials, RefreshPolicy};
use crate::auth::jwks::{DEFAULT_CACHE_MAX_AGE, DEFAULT_REQUESTS_PER_MINUTE};
use crate::auth::middleware::DEFAULT_ATTACH_PROPERTY;

pub const JWKS_URL_ENV: &str = "AUTH0_WEB_KEY_SET_URL";
pub const ISSUER_ENV: &str = "AUTH0_DOMAIN";
pub const AUDIENCE_ENV: &str = "AUTH0_AUDIENCE";
pub const MANAGEMENT_TOKEN_URL_ENV: &str = "AUTH0_MANAGEMENT_API_TOKEN_URL";
pub const MANAGEMENT_API_URL_ENV: &str = "AUTH0_MANAGEMENT_API_URL";
pub const MANAGEMENT_CLIENT_ENV: &str = "AUTH0_MANAGEMENT_API_CLIENT";
pub const MANAGEMENT_SECRET_ENV: &str = "AUTH0_MANAGEMENT_API_SECRET";
pub const MANAGEMENT_AUDIENCE_ENV: &str = "AUTH0_MANAGEMENT_API_AUDIENCE";
pub const ATTACH_PROPERTY_ENV: &str = "AUTH_ATTACH_PROPERTY";
pub const JWKS_RATE_ENV: &str = "JWKS_REQUESTS_PER_MINUTE";
pub const JWKS_MAX_AGE_ENV: &str = "JWKS_CACHE_MAX_AGE_SECS";
pub const MANAGEMENT_REFRESH_ENV: &str = "MANAGEMENT_TOKEN_REFRESH";
pub const PROVIDER_TTL_ENV: &str = "PROVIDER_TOKEN_TTL_SECS";
pub const REDIS_URL_ENV: &str = "REDIS_URL";
pub const REDIS_KEY_PREFIX_ENV: &str = "REDIS_KEY_PREFIX";
pub const PREFETCH_ENV: &str = "PROVIDER_TOKEN_PREFETCH";

/// Server bind address variable.
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Logging format selector: `json` for production log shipping, anything
/// else for human-readable output.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
}

/// Everything the gateway reads from the environment.
#[derive(Clone)]
pub struct AuthSettings {
    pub jwks_url: String,
    pub issuer: String,
    pub audience: String,
    pub management_token_url: String,
    pub management_api_url: String,
    pub credentials: ClientCredentials,
    pub attach_property: String,
    pub jwks_requests_per_minute: usize,
    pub jwks_cache_max_age: Duration,
    pub refresh_policy: RefreshPolicy,
    pub provider_token_ttl: Option<Duration>,
    pub redis_url: Option<String>,
    pub redis_key_prefix: Option<String>,
    pub prefetch: bool,
    pub host: String,
    pub port: u16,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwks_url", &self.jwks_url)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("management_api_url", &self.management_api_url)
            .field("credentials", &self.credentials)
            .field("refresh_policy", &self.refresh_policy)
            .field("redis", &self.redis_url.is_some())
            .field("prefetch", &self.prefetch)
            .finish_non_exhaustive()
    }
}

impl AuthSettings {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through `lookup`, which returns the raw value of a variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        Ok(Self {
            jwks_url: env.required(JWKS_URL_ENV)?,
            issuer: env.required(ISSUER_ENV)?,
            audience: env.required(AUDIENCE_ENV)?,
            management_token_url: env.required(MANAGEMENT_TOKEN_URL_ENV)?,
            management_api_url: env.required(MANAGEMENT_API_URL_ENV)?,
            credentials: ClientCredentials {
                client_id: env.required(MANAGEMENT_CLIENT_ENV)?,
                client_secret: env.required(MANAGEMENT_SECRET_ENV)?,
                audience: env.required(MANAGEMENT_AUDIENCE_ENV)?,
            },
            attach_property: env.or_default(ATTACH_PROPERTY_ENV, DEFAULT_ATTACH_PROPERTY),
            jwks_requests_per_minute: env
                .parsed(JWKS_RATE_ENV)?
                .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE),
            jwks_cache_max_age: env
                .parsed(JWKS_MAX_AGE_ENV)?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CACHE_MAX_AGE),
            refresh_policy: parse_refresh_policy(env.optional(MANAGEMENT_REFRESH_ENV))?,
            provider_token_ttl: env.parsed(PROVIDER_TTL_ENV)?.map(Duration::from_secs),
            redis_url: env.optional(REDIS_URL_ENV),
            redis_key_prefix: env.optional(REDIS_KEY_PREFIX_ENV),
            prefetch: parse_flag(PREFETCH_ENV, env.optional(PREFETCH_ENV), true)?,
            host: env.or_default(HOST_ENV, DEFAULT_HOST),
            port: env.parsed(PORT_ENV)?.unwrap_or(DEFAULT_PORT),
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.optional(name)
            .ok_or_else(|| ConfigError::Missing(name.to_string()))
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        self.optional(name)
            .map(|value| {
                value.parse().map_err(|_| ConfigError::Invalid {
                    name: name.to_string(),
                    value,
                })
            })
            .transpose()
    }
}

fn parse_refresh_policy(value: Option<String>) -> Result<RefreshPolicy, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("expiry") => Ok(RefreshPolicy::default()),
        Some("process") => Ok(RefreshPolicy::ProcessLifetime),
        Some(_) => Err(ConfigError::Invalid {
            name: MANAGEMENT_REFRESH_ENV.to_string(),
            value: value.unwrap_or_default(),
        }),
    }
}

fn parse_flag(name: &str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::Invalid {
            name: name.to_string(),
            value: value.unwrap_or_default(),
        }),
    }
}
