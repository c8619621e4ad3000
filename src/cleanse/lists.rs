use crate::model::ReferenceList;
use crate::twitter::{TwitterClient, TwitterError, TwitterResult};
use std::collections::HashMap;

/// Stands in for a list id when a dry run would have had to create the list
pub const DRY_RUN_LIST_ID: &str = "dry-run-list-id";

pub const NO_TWEETS_LIST: (&str, &str) = ("Unfollowed: No Tweets", "Users who have no tweets.");
pub const QUIT_TWITTER_LIST: (&str, &str) = (
    "Unfollowed: Quit Twitter",
    "Users previously followed who have since stopped tweeting.",
);

/// The caller's lists by name. Names are the idempotency key: a list is only
/// ever created when no list of that name exists.
pub struct ListDirectory {
    by_name: HashMap<String, String>,
    dry_run: bool,
}

impl ListDirectory {
    pub fn new(lists: Vec<ReferenceList>, dry_run: bool) -> Self {
        let by_name = lists
            .into_iter()
            .filter_map(|list| Some((list.name, list.id?)))
            .collect();
        Self { by_name, dry_run }
    }

    pub async fn get_or_create(
        &mut self,
        twitter: &dyn TwitterClient,
        name: &str,
        description: &str,
    ) -> TwitterResult<String> {
        if let Some(id) = self.by_name.get(name) {
            log::debug!("Using existing list \"{}\" ({})", name, id);
            return Ok(id.clone());
        }
        let id = if self.dry_run {
            log::info!("Would create list: {}", name);
            DRY_RUN_LIST_ID.to_string()
        } else {
            let list = twitter.create_list(name, description, true).await?;
            let id = list.id.ok_or(TwitterError::Unconfirmed("Creating list"))?;
            log::info!("Created list \"{}\" ({})", name, id);
            id
        };
        self.by_name.insert(name.to_string(), id.clone());
        Ok(id)
    }
}
