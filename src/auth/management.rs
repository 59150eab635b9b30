// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity provider user-management API client.
//!
//! Two calls, both authorized with the management access token:
//! - `GET <base>` lists users (paged with `page` / `per_page`)
//! - `GET <base>/<userId>` returns one user's linked identities

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;
use url::Url;

use super::broker::ManagementAccessToken;
use super::claims::{IdentityKey, ProviderAccessToken};

/// Default page size for user listing.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Upper bound on pages walked by one listing.
const MAX_PAGES: u32 = 1_000;

#[derive(Debug, thiserror::Error)]
pub enum ManagementError {
    #[error("management API request failed: {0}")]
    Request(String),

    #[error("management API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("management API response was invalid: {0}")]
    InvalidResponse(String),
}

/// One linked provider identity of a user.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderIdentity {
    pub provider: String,
    /// Provider user id, normalized to its string form
    #[serde(deserialize_with = "provider_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl ProviderIdentity {
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.provider, &self.user_id)
    }

    pub fn access_token(&self) -> Option<ProviderAccessToken> {
        self.access_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .map(ProviderAccessToken::new)
    }
}

/// User record as returned by the management API.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub identities: Vec<ProviderIdentity>,
}

impl UserRecord {
    /// The identity whose `(provider, user_id)` equals the key's components exactly.
    pub fn find_identity(&self, key: &IdentityKey) -> Option<&ProviderIdentity> {
        self.identities
            .iter()
            .find(|identity| key.matches(&identity.provider, &identity.user_id))
    }
}

/// Provider user ids arrive as strings or as JSON numbers (GitHub ids are
/// numeric); both are compared in their decimal string form.
fn provider_user_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported user_id value: {other}"
        ))),
    }
}

/// Client for the user-management API.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    base_url: Url,
    page_size: u32,
    max_pages: u32,
    http: reqwest::Client,
}

impl ManagementClient {
    pub fn new(base_url: &str, http: reqwest::Client) -> Result<Self, ManagementError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ManagementError::Request(format!("invalid base URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ManagementError::Request(format!(
                "base URL {base_url} cannot carry a path"
            )));
        }
        Ok(Self {
            base_url,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: MAX_PAGES,
            http,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// URL of a single user: the base URL with `user_id` appended as one segment.
    fn user_url(&self, user_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(user_id);
        }
        url
    }

    /// Fetch one user by full id (`provider|providerUserId`).
    pub async fn get_user(
        &self,
        token: &ManagementAccessToken,
        user_id: &str,
    ) -> Result<UserRecord, ManagementError> {
        let url = self.user_url(user_id);
        self.get_json(url, token).await
    }

    /// Fetch every user, page by page, until a short page is returned.
    ///
    /// Stops after `max_pages` pages and returns what was read so far.
    pub async fn list_users(
        &self,
        token: &ManagementAccessToken,
    ) -> Result<Vec<UserRecord>, ManagementError> {
        let mut users = Vec::new();
        for page in 0..self.max_pages {
            let mut url = self.base_url.clone();
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("per_page", &self.page_size.to_string());

            let batch: Vec<UserRecord> = self.get_json(url, token).await?;
            let short_page = batch.len() < self.page_size as usize;
            users.extend(batch);
            if short_page {
                return Ok(users);
            }
        }
        warn!(
            pages = self.max_pages,
            users = users.len(),
            "User listing hit the page cap; result is truncated"
        );
        Ok(users)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        token: &ManagementAccessToken,
    ) -> Result<T, ManagementError> {
        let path = url.path().to_string();
        let response = self
            .http
            .get(url)
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(|e| ManagementError::Request(format!("GET {path} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ManagementError::Status { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| ManagementError::InvalidResponse(format!("GET {path} invalid JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(value: Value) -> UserRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn numeric_user_ids_are_normalized() {
        let user = record(json!({
            "identities": [{"provider": "github", "user_id": 123, "access_token": "gho"}]
        }));
        assert_eq!(user.identities[0].user_id, "123");
        assert!(user
            .find_identity(&IdentityKey::parse("github|123").unwrap())
            .is_some());
    }

    #[test]
    fn find_identity_requires_exact_components() {
        let user = record(json!({
            "identities": [
                {"provider": "github", "user_id": "123", "access_token": "gho"},
                {"provider": "google-oauth2", "user_id": "99"}
            ]
        }));
        assert!(user
            .find_identity(&IdentityKey::parse("github|1234").unwrap())
            .is_none());
        assert!(user
            .find_identity(&IdentityKey::parse("github|12").unwrap())
            .is_none());
        assert!(user
            .find_identity(&IdentityKey::parse("google-oauth2|123").unwrap())
            .is_none());

        let found = user
            .find_identity(&IdentityKey::parse("google-oauth2|99").unwrap())
            .unwrap();
        assert!(found.access_token().is_none());
    }

    #[test]
    fn user_url_appends_one_segment() {
        let client =
            ManagementClient::new("https://hail.auth0.test/api/v2/users/", reqwest::Client::new())
                .unwrap();
        let url = client.user_url("github|42");
        assert!(url.path().starts_with("/api/v2/users/github"));
        assert!(url.path().ends_with("42"));
    }

    #[tokio::test]
    async fn get_user_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer mgmt-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user_id": "github|42",
                "identities": [{"provider": "github", "user_id": 42, "access_token": "tok-abc"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            ManagementClient::new(&format!("{}/api/v2/users", server.uri()), reqwest::Client::new())
                .unwrap();
        let user = client
            .get_user(&ManagementAccessToken::new("mgmt-token"), "github|42")
            .await
            .unwrap();
        assert_eq!(user.identities[0].user_id, "42");
    }

    #[tokio::test]
    async fn list_users_walks_pages_until_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/users"))
            .and(query_param("page", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"user_id": "github|1", "identities": [{"provider": "github", "user_id": 1}]},
                {"user_id": "github|2", "identities": [{"provider": "github", "user_id": 2}]}
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/users"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"user_id": "github|3", "identities": [{"provider": "github", "user_id": 3}]}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            ManagementClient::new(&format!("{}/api/v2/users", server.uri()), reqwest::Client::new())
                .unwrap()
                .with_page_size(2);
        let users = client
            .list_users(&ManagementAccessToken::new("mgmt-token"))
            .await
            .unwrap();
        assert_eq!(users.len(), 3);
    }

    #[tokio::test]
    async fn list_users_stops_at_page_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"user_id": "github|1", "identities": [{"provider": "github", "user_id": 1}]}
            ])))
            .expect(3)
            .mount(&server)
            .await;

        let mut client =
            ManagementClient::new(&format!("{}/api/v2/users", server.uri()), reqwest::Client::new())
                .unwrap()
                .with_page_size(1);
        client.max_pages = 3;

        let users = client
            .list_users(&ManagementAccessToken::new("mgmt-token"))
            .await
            .unwrap();
        assert_eq!(users.len(), 3);
    }

    #[tokio::test]
    async fn http_errors_carry_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = ManagementClient::new(&server.uri(), reqwest::Client::new()).unwrap();
        let result = client
            .get_user(&ManagementAccessToken::new("t"), "github|1")
            .await;
        assert!(matches!(result, Err(ManagementError::Status { status: 429, .. })));
    }
}
