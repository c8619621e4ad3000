mod atomic;
mod auth;
mod cache;
mod cleanse;
mod config;
mod model;
mod twitter;

use crate::auth::consent::TerminalConsent;
use crate::auth::store::FileCredentialStore;
use crate::auth::Authorizer;
use crate::cache::ResponseCache;
use crate::config::{AuthConfig, AuthOptions, CacheOptions, CleanseOptions, Config};
use crate::twitter::v2::TwitterClientV2;
use crate::twitter::TwitterClient;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Unfollow accounts that have stopped tweeting, remembering them in lists
#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cleanse
    Run {
        #[clap(flatten)]
        auth: AuthOptions,
        #[clap(flatten)]
        cache: CacheOptions,
        #[clap(flatten)]
        cleanse: CleanseOptions,
    },
    /// Authorize (or refresh the stored token) and show who you are
    Auth {
        #[clap(flatten)]
        auth: AuthOptions,
        #[clap(flatten)]
        cache: CacheOptions,
    },
    /// Delete cached API responses
    ClearCache {
        #[clap(flatten)]
        cache: CacheOptions,
        /// Only delete entries past their TTL
        #[clap(long)]
        expired_only: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = main2().await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn main2() -> anyhow::Result<()> {
    let args: Args = Args::parse();
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, stopping");
                cancel.cancel();
            }
        }
    });

    match args.command {
        Command::Run {
            auth,
            cache,
            cleanse: options,
        } => {
            let config = Config::new(&auth, &cache, &options)?;
            let twitter = connect(&config.auth, config.cache, &cancel).await?;
            let summary = cleanse::run(&twitter, &config.cleanse, &cancel).await?;
            println!("{}", summary);
        }
        Command::Auth { auth, cache } => {
            let auth = auth.resolve()?;
            let twitter = connect(&auth, cache.resolve(), &cancel).await?;
            let me = twitter
                .get_identity()
                .await
                .context("failed to get current user")?;
            println!("Authorized as @{} ({})", me.username, me.display_name);
        }
        Command::ClearCache {
            cache,
            expired_only,
        } => {
            let store = cache.store();
            let removed = if expired_only {
                store.prune().await
            } else {
                store.clear().await
            }
            .context("Unable to clear cache")?;
            println!("Removed {} cached responses", removed);
        }
    }
    Ok(())
}

/// Authorizes, reusing the stored token where possible, and builds the API client
async fn connect(
    auth: &AuthConfig,
    cache: ResponseCache,
    cancel: &CancellationToken,
) -> anyhow::Result<TwitterClientV2> {
    let store = FileCredentialStore::new(&auth.credentials_dir, &auth.oauth.client_id);
    log::debug!("Credentials stored at {}", store.path().display());
    let authorizer = Authorizer::new(auth.oauth.clone(), Box::new(store), cancel.clone())
        .context("Unable to create HTTP client")?;
    let consent = TerminalConsent::new(auth.consent_timeout, true);
    authorizer
        .authorize(&consent, auth.force_login)
        .await
        .context("Authorization failed")?;

    if cache.is_enabled() {
        log::debug!("Response caching enabled");
    } else {
        log::info!("Response caching disabled");
    }
    Ok(TwitterClientV2::new(Arc::new(authorizer), cache, cancel.clone())?)
}
