use chrono::{DateTime, Utc};

/// A followed (or following) account as seen at the start of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub protected: bool,
    pub tweet_count: u64,
    /// `None` when the account has never posted
    pub most_recent_post_id: Option<String>,
}

impl Account {
    pub fn has_posted(&self) -> bool {
        self.most_recent_post_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub author_id: Option<String>,
}

/// A list owned by the caller, used to remember who was unfollowed and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceList {
    /// Assigned by the API once the list exists
    pub id: Option<String>,
    pub name: String,
    pub description: String,
    pub private: bool,
}
