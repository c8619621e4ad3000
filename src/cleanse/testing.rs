use crate::model::{Account, Post, ReferenceList};
use crate::twitter::{TwitterClient, TwitterError, TwitterResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// A side effect the engine asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateList(String),
    AddMember { list_id: String, user_id: String },
    Unfollow { source_id: String, target_id: String },
}

/// In-memory `TwitterClient` that records every write in call order
#[derive(Default)]
pub struct RecordingTwitter {
    pub identity: Option<Account>,
    pub following: Vec<Account>,
    pub followers: Vec<Account>,
    pub lists: Vec<ReferenceList>,
    pub posts: HashMap<String, Vec<Post>>,
    pub fail_following: bool,
    pub fail_posts_for: Vec<String>,
    pub fail_add_for: Vec<String>,
    pub(crate) calls: Mutex<Vec<Call>>,
}

impl RecordingTwitter {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn server_error() -> TwitterError {
    TwitterError::Api {
        status: 503,
        body: "{\"title\":\"Service Unavailable\"}".to_string(),
    }
}

pub fn account(id: &str, most_recent_post_id: Option<&str>) -> Account {
    Account {
        id: id.to_string(),
        username: format!("user{}", id),
        display_name: format!("User {}", id),
        protected: false,
        tweet_count: if most_recent_post_id.is_some() { 1 } else { 0 },
        most_recent_post_id: most_recent_post_id.map(str::to_string),
    }
}

#[async_trait]
impl TwitterClient for RecordingTwitter {
    async fn get_identity(&self) -> TwitterResult<Account> {
        Ok(self.identity.clone().unwrap_or_else(|| account("1", None)))
    }

    async fn get_following(&self, _user_id: &str) -> TwitterResult<Vec<Account>> {
        if self.fail_following {
            return Err(server_error());
        }
        Ok(self.following.clone())
    }

    async fn get_followers(&self, _user_id: &str) -> TwitterResult<Vec<Account>> {
        Ok(self.followers.clone())
    }

    async fn get_owned_lists(&self, _user_id: &str) -> TwitterResult<Vec<ReferenceList>> {
        Ok(self.lists.clone())
    }

    async fn get_recent_posts(&self, user_id: &str, limit: usize) -> TwitterResult<Vec<Post>> {
        if self.fail_posts_for.iter().any(|id| id == user_id) {
            return Err(server_error());
        }
        let mut posts = self.posts.get(user_id).cloned().unwrap_or_default();
        posts.truncate(limit);
        Ok(posts)
    }

    async fn create_list(
        &self,
        name: &str,
        description: &str,
        private: bool,
    ) -> TwitterResult<ReferenceList> {
        self.record(Call::CreateList(name.to_string()));
        Ok(ReferenceList {
            id: Some(format!("list-{}", name.len())),
            name: name.to_string(),
            description: description.to_string(),
            private,
        })
    }

    async fn add_list_member(&self, list_id: &str, user_id: &str) -> TwitterResult<()> {
        if self.fail_add_for.iter().any(|id| id == user_id) {
            return Err(server_error());
        }
        self.record(Call::AddMember {
            list_id: list_id.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    async fn unfollow(&self, source_id: &str, target_id: &str) -> TwitterResult<()> {
        self.record(Call::Unfollow {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
        });
        Ok(())
    }
}
