use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Body of a successful token endpoint response
#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// An access/refresh token pair as persisted between runs
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    /// `None` when the provider didn't say how long the token lives
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Credential {
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type,
            expires_at: response.expires_in.and_then(|secs| expiry_after(now, secs)),
            scopes: split_scopes(response.scope.as_deref()),
        }
    }

    /// Builds the replacement after a refresh grant. The provider may rotate the
    /// refresh token; if it sends none the current one stays usable.
    pub fn refreshed(&self, response: TokenResponse, now: DateTime<Utc>) -> Self {
        let mut next = Self::from_response(response, now);
        if next.refresh_token.is_none() {
            next.refresh_token = self.refresh_token.clone();
        }
        if next.scopes.is_empty() {
            next.scopes = self.scopes.clone();
        }
        next
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expiry| now < expiry)
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// The access token is only ever logged by this prefix
    pub fn redacted(&self) -> &str {
        let end = self
            .access_token
            .char_indices()
            .nth(8)
            .map_or(self.access_token.len(), |(i, _)| i);
        &self.access_token[..end]
    }
}

/// `None` when the lifetime can't be represented, the token is then treated as
/// having no stated expiry
fn expiry_after(now: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    let expiry = Duration::try_seconds(secs).and_then(|lifetime| now.checked_add_signed(lifetime));
    if expiry.is_none() {
        log::warn!("Ignoring out of range token lifetime: {}s", secs);
    }
    expiry
}

fn split_scopes(scope: Option<&str>) -> Vec<String> {
    scope
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}
