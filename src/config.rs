use crate::auth::{OAuthConfig, DEFAULT_REDIRECT_URI};
use crate::cache::{ResponseCache, DEFAULT_DIR, DEFAULT_TTL_SECS};
use crate::cleanse::CleanseConfig;
use anyhow::{bail, Context};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Args, Debug, Clone)]
pub struct AuthOptions {
    /// OAuth 2.0 client id of the app
    #[clap(long, env = "CLIENT_ID")]
    client_id: String,
    /// Client secret, leave unset for public clients
    #[clap(long, env = "CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,
    /// Where the token is stored [default: <config dir>/twitter-cleanse]
    #[clap(long)]
    credentials_dir: Option<PathBuf>,
    /// Redirect URI registered for the app
    #[clap(long, default_value = DEFAULT_REDIRECT_URI)]
    redirect_uri: Url,
    /// How long to wait for the redirect URL to be pasted
    #[clap(long, default_value_t = 600)]
    consent_timeout_secs: u64,
    /// Ignore any stored token and authorize again
    #[clap(long)]
    force_login: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CacheOptions {
    /// Always hit the API
    #[clap(long)]
    no_cache: bool,
    /// Where API responses are cached
    #[clap(long, default_value = DEFAULT_DIR)]
    cache_dir: PathBuf,
    /// How long a cached response stays fresh
    #[clap(long, default_value_t = DEFAULT_TTL_SECS)]
    cache_ttl_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct CleanseOptions {
    /// Unfollow accounts that haven't tweeted in this many years
    #[clap(long, default_value_t = 2.0)]
    years_dormant_threshold: f64,
    /// Log what would happen without changing anything
    #[clap(long)]
    dry_run: bool,
}

pub struct AuthConfig {
    pub oauth: OAuthConfig,
    pub credentials_dir: PathBuf,
    pub consent_timeout: Duration,
    pub force_login: bool,
}

impl AuthOptions {
    pub fn resolve(&self) -> anyhow::Result<AuthConfig> {
        if self.client_id.trim().is_empty() {
            bail!("Client id must not be empty");
        }
        let credentials_dir = match &self.credentials_dir {
            Some(dir) => dir.clone(),
            None => dirs::config_dir()
                .context("Unable to find a config directory, pass --credentials-dir")?
                .join("twitter-cleanse"),
        };
        let client_secret = self
            .client_secret
            .clone()
            .filter(|secret| !secret.is_empty());
        Ok(AuthConfig {
            oauth: OAuthConfig::new(
                self.client_id.trim().to_string(),
                client_secret,
                self.redirect_uri.clone(),
            ),
            credentials_dir,
            consent_timeout: Duration::from_secs(self.consent_timeout_secs),
            force_login: self.force_login,
        })
    }
}

impl CacheOptions {
    /// The on-disk cache, ignoring `--no-cache`
    pub fn store(&self) -> ResponseCache {
        ResponseCache::new(&self.cache_dir, Duration::from_secs(self.cache_ttl_secs))
    }

    pub fn resolve(&self) -> ResponseCache {
        if self.no_cache {
            ResponseCache::disabled()
        } else {
            self.store()
        }
    }
}

impl CleanseOptions {
    pub fn resolve(&self) -> anyhow::Result<CleanseConfig> {
        CleanseConfig::new(self.years_dormant_threshold, self.dry_run)
    }
}

/// Everything a run needs, built once from the command line
pub struct Config {
    pub auth: AuthConfig,
    pub cache: ResponseCache,
    pub cleanse: CleanseConfig,
}

impl Config {
    pub fn new(
        auth: &AuthOptions,
        cache: &CacheOptions,
        cleanse: &CleanseOptions,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            auth: auth.resolve()?,
            cache: cache.resolve(),
            cleanse: cleanse.resolve().context("Invalid --years-dormant-threshold")?,
        })
    }
}
