pub mod v2;

use crate::auth::AuthError;
use crate::model::{Account, Post, ReferenceList};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TwitterError {
    /// Non-success status, body kept verbatim for diagnostics
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Error performing HTTP request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unable to deserialize due to: {source}\nContents:\n{body}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0} was not confirmed by the API")]
    Unconfirmed(&'static str),
    #[error("Request was cancelled")]
    Cancelled,
}

pub type TwitterResult<T> = Result<T, TwitterError>;

/// The remote capabilities a cleanse needs, one method per endpoint
#[async_trait]
pub trait TwitterClient: Send + Sync {
    /// The account the credential belongs to
    async fn get_identity(&self) -> TwitterResult<Account>;

    /// Every account `user_id` follows, in the order the API pages them out
    async fn get_following(&self, user_id: &str) -> TwitterResult<Vec<Account>>;

    async fn get_followers(&self, user_id: &str) -> TwitterResult<Vec<Account>>;

    async fn get_owned_lists(&self, user_id: &str) -> TwitterResult<Vec<ReferenceList>>;

    /// Newest first. Empty rather than an error when nothing is visible.
    async fn get_recent_posts(&self, user_id: &str, limit: usize) -> TwitterResult<Vec<Post>>;

    async fn create_list(
        &self,
        name: &str,
        description: &str,
        private: bool,
    ) -> TwitterResult<ReferenceList>;

    async fn add_list_member(&self, list_id: &str, user_id: &str) -> TwitterResult<()>;

    async fn unfollow(&self, source_id: &str, target_id: &str) -> TwitterResult<()>;
}
