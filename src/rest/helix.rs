//! Twitch Helix API client (cold path)
//!
//! Used once at startup to resolve the broadcaster's login name to the
//! numeric user id PubSub topics are keyed by.

use serde::Deserialize;
use std::time::Duration;

/// Helix API root
pub const HELIX_API_URL: &str = "https://api.twitch.tv/helix";

/// Helix client authenticated with a user access token
pub struct HelixClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    auth_token: String,
}

impl HelixClient {
    pub fn new(client_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self::with_base_url(HELIX_API_URL, client_id, auth_token)
    }

    pub fn with_base_url(base_url: impl Into<String>, client_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent(concat!("redemption-bridge/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Resolve a login name to its user id
    ///
    /// API: GET /helix/users?login=<login>
    pub async fn get_user_id(&self, login: &str) -> Result<String, HelixError> {
        let url = format!("{}/users", self.base_url);
        tracing::info!(%login, "resolving broadcaster id");

        let response = self
            .client
            .get(&url)
            .query(&[("login", login)])
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| HelixError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HelixError::Http(response.status().as_u16()));
        }

        let users: UsersResponse = response
            .json()
            .await
            .map_err(|e| HelixError::Parse(e.to_string()))?;

        let id = users.into_user_id(login)?;
        tracing::info!(%login, %id, "got broadcaster id");
        Ok(id)
    }
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    data: Vec<HelixUser>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
}

impl UsersResponse {
    fn into_user_id(self, login: &str) -> Result<String, HelixError> {
        let mut users = self.data.into_iter();
        let first = users.next().ok_or_else(|| HelixError::UserNotFound(login.to_string()))?;
        // Helix matches logins case-insensitively and returns them lowercased
        if !first.login.eq_ignore_ascii_case(login) {
            tracing::warn!(requested = %login, returned = %first.login, "helix returned a different login");
        }
        Ok(first.id)
    }
}

/// Helix request errors
#[derive(Debug, thiserror::Error)]
pub enum HelixError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No Twitch user with login `{0}`")]
    UserNotFound(String),
}
