//! OAuth 2.0 Authorization Code flow with PKCE, plus the persist-on-refresh
//! bearer token used to sign every API request.

pub mod consent;
pub mod pkce;
pub mod store;
pub mod token;

use crate::auth::consent::ConsentPrompt;
use crate::auth::pkce::{generate_state, Pkce, CHALLENGE_METHOD};
use crate::auth::store::{CredentialStore, StoreError};
use crate::auth::token::{Credential, TokenResponse};
use async_trait::async_trait;
use chrono::Utc;
use maplit::hashmap;
use reqwest::header::HeaderValue;
use reqwest::Client;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const AUTHORIZE_URL: &str = "https://x.com/i/oauth2/authorize";
pub const TOKEN_URL: &str = "https://api.x.com/2/oauth2/token";
pub const DEFAULT_REDIRECT_URI: &str = "https://twitter.lionheartsw.com/callback";

/// `list.write` and `follows.write` are needed for the list and unfollow
/// endpoints on top of the read scopes.
pub const SCOPES: &[&str] = &[
    "tweet.read",
    "users.read",
    "list.read",
    "follows.read",
    "offline.access",
    "list.write",
    "follows.write",
];

const TIMEOUT_SEC: u64 = 10;

#[derive(Debug, Error)]
pub enum TokenEndpointError {
    #[error("Token endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Error performing token request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected token response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("State returned on the callback does not match the one sent")]
    StateMismatch,
    #[error("Authorization code not found in callback URL")]
    MissingCode,
    #[error("Authorization was denied: {error} {description}")]
    Denied { error: String, description: String },
    #[error("Invalid callback URL: {0}")]
    InvalidCallback(#[from] url::ParseError),
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(#[source] TokenEndpointError),
    #[error("Token refresh failed, authorization must be run again: {0}")]
    RefreshFailed(#[source] TokenEndpointError),
    #[error("Not authorized")]
    NotAuthorized,
    #[error("Unable to persist credential: {0}")]
    Persist(#[source] StoreError),
    #[error("No callback URL received within {0:?}")]
    ConsentTimedOut(Duration),
    #[error("No callback URL was entered")]
    ConsentAborted,
    #[error("Unable to read callback URL: {0}")]
    ConsentInput(#[source] std::io::Error),
    #[error("Access token is not a valid header value")]
    InvalidToken,
    #[error("Authorization was cancelled")]
    Cancelled,
}

/// Produces the per-request authentication artifact for the transport
#[async_trait]
pub trait RequestSigner: Send + Sync {
    async fn authorization(&self) -> Result<HeaderValue, AuthError>;
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    /// Confidential clients authenticate to the token endpoint with HTTP Basic
    pub client_secret: Option<String>,
    pub authorize_url: Url,
    pub token_url: Url,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    pub fn new(client_id: String, client_secret: Option<String>, redirect_uri: Url) -> Self {
        Self {
            client_id,
            client_secret,
            authorize_url: Url::parse(AUTHORIZE_URL).expect("valid authorize URL"),
            token_url: Url::parse(TOKEN_URL).expect("valid token URL"),
            redirect_uri,
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// What must be remembered between sending the user to the consent page and
/// receiving the callback
#[derive(Debug)]
pub struct PendingAuthorization {
    pub url: Url,
    state: String,
    pkce: Pkce,
}

#[derive(Debug)]
enum AuthState {
    NoCredential,
    Authorized(Credential),
}

pub struct Authorizer {
    http: Client,
    config: OAuthConfig,
    store: Box<dyn CredentialStore>,
    state: Mutex<AuthState>,
    cancel: CancellationToken,
}

impl Authorizer {
    pub fn new(
        config: OAuthConfig,
        store: Box<dyn CredentialStore>,
        cancel: CancellationToken,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: Client::builder()
                .timeout(Duration::from_secs(TIMEOUT_SEC))
                .build()?,
            config,
            store,
            state: Mutex::new(AuthState::NoCredential),
            cancel,
        })
    }

    /// Makes the authorizer usable, reusing the stored credential where
    /// possible and only falling back to the interactive flow when needed.
    pub async fn authorize(
        &self,
        prompt: &dyn ConsentPrompt,
        force_login: bool,
    ) -> Result<(), AuthError> {
        if !force_login {
            match self.store.load().await {
                Ok(Some(credential))
                    if credential.is_valid_at(Utc::now()) || credential.can_refresh() =>
                {
                    log::debug!(
                        "Loaded stored credential {}..., expires: {:?}",
                        credential.redacted(),
                        credential.expires_at
                    );
                    *self.state.lock().await = AuthState::Authorized(credential);
                    return Ok(());
                }
                Ok(Some(_)) => log::info!("Stored credential has expired and cannot be refreshed"),
                Ok(None) => log::info!("No stored credential found"),
                Err(e) => log::warn!("Ignoring stored credential: {}", e),
            }
        }
        let pending = self.begin();
        let callback = self
            .cancellable(prompt.callback_url(&pending.url, &self.config.redirect_uri))
            .await?;
        self.complete(pending, &callback).await?;
        Ok(())
    }

    pub fn begin(&self) -> PendingAuthorization {
        let pkce = Pkce::generate();
        let state = generate_state();
        let mut url = self.config.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", pkce.challenge())
            .append_pair("code_challenge_method", CHALLENGE_METHOD);
        PendingAuthorization { url, state, pkce }
    }

    /// Validates the callback, exchanges the code and persists the result
    pub async fn complete(
        &self,
        pending: PendingAuthorization,
        callback_url: &str,
    ) -> Result<Credential, AuthError> {
        let code = parse_callback(callback_url, &pending.state)?;
        let params = hashmap! {
            "grant_type" => "authorization_code".to_string(),
            "code" => code,
            "code_verifier" => pending.pkce.verifier().to_string(),
            "redirect_uri" => self.config.redirect_uri.to_string(),
            "client_id" => self.config.client_id.clone(),
        };
        let response = self
            .cancellable(async { self.token_request(params).await.map_err(AuthError::ExchangeFailed) })
            .await?;
        let credential = Credential::from_response(response, Utc::now());
        log::info!(
            "Authorized with new token {}..., expires: {:?}",
            credential.redacted(),
            credential.expires_at
        );
        self.store
            .save(&credential)
            .await
            .map_err(AuthError::Persist)?;
        *self.state.lock().await = AuthState::Authorized(credential.clone());
        Ok(credential)
    }

    async fn refresh(&self, current: &Credential) -> Result<Credential, AuthError> {
        let refresh_token = current.refresh_token.clone().ok_or(AuthError::NotAuthorized)?;
        let params = hashmap! {
            "grant_type" => "refresh_token".to_string(),
            "refresh_token" => refresh_token,
            "client_id" => self.config.client_id.clone(),
        };
        let response = self
            .cancellable(async { self.token_request(params).await.map_err(AuthError::RefreshFailed) })
            .await?;
        let credential = current.refreshed(response, Utc::now());
        log::info!(
            "Refreshed token {}..., expires: {:?}",
            credential.redacted(),
            credential.expires_at
        );
        self.store
            .save(&credential)
            .await
            .map_err(AuthError::Persist)?;
        Ok(credential)
    }

    async fn token_request(
        &self,
        params: HashMap<&str, String>,
    ) -> Result<TokenResponse, TokenEndpointError> {
        let mut request = self.http.post(self.config.token_url.clone()).form(&params);
        if let Some(secret) = &self.config.client_secret {
            request = request.basic_auth(&self.config.client_id, Some(secret));
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TokenEndpointError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn cancellable<T>(
        &self,
        fut: impl Future<Output = Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(AuthError::Cancelled),
            result = fut => result,
        }
    }
}

#[async_trait]
impl RequestSigner for Authorizer {
    /// Hands out the bearer header, refreshing (and persisting) first if the
    /// access token has expired. The lock serializes concurrent refreshes.
    async fn authorization(&self) -> Result<HeaderValue, AuthError> {
        let mut state = self.state.lock().await;
        let current = match &*state {
            AuthState::NoCredential => return Err(AuthError::NotAuthorized),
            AuthState::Authorized(credential) => credential.clone(),
        };
        let credential = if current.is_valid_at(Utc::now()) {
            current
        } else {
            log::debug!("Access token {}... has expired", current.redacted());
            match self.refresh(&current).await {
                Ok(credential) => {
                    *state = AuthState::Authorized(credential.clone());
                    credential
                }
                Err(e) => {
                    *state = AuthState::NoCredential;
                    return Err(e);
                }
            }
        };
        HeaderValue::from_str(&format!("Bearer {}", credential.access_token))
            .map_err(|_| AuthError::InvalidToken)
    }
}

fn parse_callback(callback_url: &str, expected_state: &str) -> Result<String, AuthError> {
    let url = Url::parse(callback_url.trim())?;
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(error) = query.get("error") {
        return Err(AuthError::Denied {
            error: error.clone(),
            description: query.get("error_description").cloned().unwrap_or_default(),
        });
    }
    if query.get("state").map(String::as_str) != Some(expected_state) {
        return Err(AuthError::StateMismatch);
    }
    match query.get("code") {
        Some(code) if !code.is_empty() => Ok(code.clone()),
        _ => Err(AuthError::MissingCode),
    }
}
