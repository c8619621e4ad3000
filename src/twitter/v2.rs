//! Client for the v2 REST API, signed with the OAuth 2.0 user token

use crate::auth::RequestSigner;
use crate::cache::ResponseCache;
use crate::model::{Account, Post, ReferenceList};
use crate::twitter::{TwitterClient, TwitterError, TwitterResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maplit::hashmap;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const API_ROOT: &str = "https://api.x.com/2/";

const TIMEOUT_SEC: u64 = 10;
const USER_FIELDS: &str = "protected,public_metrics,most_recent_tweet_id";
const FOLLOW_PAGE_SIZE: &str = "1000";
const LIST_PAGE_SIZE: &str = "100";
// The tweets endpoint rejects max_results outside of this range
const MIN_TWEETS_PAGE: usize = 5;
const MAX_TWEETS_PAGE: usize = 100;

pub struct TwitterClientV2 {
    client: Client,
    base_url: Url,
    signer: Arc<dyn RequestSigner>,
    cache: ResponseCache,
    cancel: CancellationToken,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TwitterResponse<T> {
    // Detect the case where the API returns 200, but contains only errors.
    // Pages have all-default fields, so this has to be tried first.
    Error(#[allow(unused)] ErrorsOnly),
    Ok(T),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ErrorsOnly {
    #[allow(unused)]
    errors: serde_json::Value,
}

#[derive(Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct PageResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Deserialize, Default)]
struct PageMeta {
    next_token: Option<String>,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
    username: String,
    name: String,
    #[serde(default)]
    protected: bool,
    #[serde(default)]
    public_metrics: PublicMetrics,
    most_recent_tweet_id: Option<String>,
}

#[derive(Deserialize, Default)]
struct PublicMetrics {
    #[serde(default)]
    tweet_count: u64,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
    text: String,
    created_at: DateTime<Utc>,
    author_id: Option<String>,
}

#[derive(Deserialize)]
struct ListData {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    private: bool,
}

#[derive(Serialize)]
struct CreateListRequest<'a> {
    name: &'a str,
    description: &'a str,
    private: bool,
}

#[derive(Deserialize)]
struct CreatedList {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct AddMemberRequest<'a> {
    user_id: &'a str,
}

#[derive(Deserialize)]
struct MembershipData {
    is_member: bool,
}

#[derive(Deserialize)]
struct FollowingData {
    following: bool,
}

fn deserialize_response<T: DeserializeOwned>(status: StatusCode, text: &str) -> TwitterResult<T> {
    if !status.is_success() {
        return Err(TwitterError::Api {
            status: status.as_u16(),
            body: text.to_string(),
        });
    }
    let twitter = serde_json::from_str::<TwitterResponse<T>>(text).map_err(|e| {
        // Re-parse for the real error, the untagged one says nothing useful
        let source = serde_json::from_str::<T>(text).err().unwrap_or(e);
        TwitterError::Decode {
            source,
            body: text.to_string(),
        }
    })?;
    match twitter {
        TwitterResponse::Ok(ok) => Ok(ok),
        TwitterResponse::Error(_) => Err(TwitterError::Api {
            status: status.as_u16(),
            body: text.to_string(),
        }),
    }
}

impl TwitterClientV2 {
    pub fn new(
        signer: Arc<dyn RequestSigner>,
        cache: ResponseCache,
        cancel: CancellationToken,
    ) -> TwitterResult<Self> {
        Self::with_base_url(Url::from_str(API_ROOT).unwrap(), signer, cache, cancel)
    }

    pub fn with_base_url(
        base_url: Url,
        signer: Arc<dyn RequestSigner>,
        cache: ResponseCache,
        cancel: CancellationToken,
    ) -> TwitterResult<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(TIMEOUT_SEC))
                .user_agent(concat!("twitter-cleanse/", env!("CARGO_PKG_VERSION")))
                .build()?,
            base_url,
            signer,
            cache,
            cancel,
        })
    }

    fn url(&self, endpoint: &str) -> TwitterResult<Url> {
        Ok(self.base_url.join(endpoint.trim_start_matches('/'))?)
    }

    /// Signs and sends, returning the status and body text
    async fn execute(&self, request: RequestBuilder) -> TwitterResult<(StatusCode, String)> {
        let authorization = self.signer.authorization().await?;
        let request = request.header(AUTHORIZATION, authorization);
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TwitterError::Cancelled),
            result = exchange => Ok(result?),
        }
    }

    /// GET with the response cache in front. Only bodies that decoded are cached.
    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &HashMap<&str, String>,
    ) -> TwitterResult<T> {
        let key = ResponseCache::key(endpoint, query.iter().map(|(k, v)| (*k, v.as_str())));
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str::<T>(&cached) {
                Ok(value) => {
                    log::debug!("[HTTP] Returning cached response for: {}", endpoint);
                    return Ok(value);
                }
                Err(e) => log::warn!(
                    "[CACHE] Cached response for {} no longer decodes ({}), fetching",
                    endpoint,
                    e
                ),
            }
        }
        log::debug!("[HTTP] GET {} {:?}", endpoint, query);
        let request = self.client.get(self.url(endpoint)?).query(query);
        let (status, text) = self.execute(request).await?;
        log::debug!("[HTTP] Response status: {} for: {}", status, endpoint);
        let value = deserialize_response::<T>(status, &text)?;
        self.cache.put(&key, &text).await;
        Ok(value)
    }

    async fn send<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> TwitterResult<T> {
        log::debug!("[HTTP] {} {}", method, endpoint);
        let mut request = self.client.request(method, self.url(endpoint)?);
        if let Some(body) = body {
            request = request.json(body);
        }
        let (status, text) = self.execute(request).await?;
        deserialize_response::<T>(status, &text)
    }

    /// Follows `next_token` until the API stops handing one out. Pages are
    /// concatenated in arrival order.
    async fn get_all<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        mut query: HashMap<&str, String>,
    ) -> TwitterResult<Vec<T>> {
        let mut results = Vec::new();
        let mut seen = HashSet::new();
        loop {
            let mut page = self.get::<PageResponse<T>>(endpoint, &query).await?;
            results.append(&mut page.data);
            match page.meta.next_token {
                Some(next) if !next.is_empty() => {
                    if !seen.insert(next.clone()) {
                        log::warn!("Pagination of {} looped back to {}, stopping", endpoint, next);
                        break;
                    }
                    query.insert("pagination_token", next);
                }
                _ => break,
            }
        }
        Ok(results)
    }

    async fn get_accounts(&self, endpoint: &str) -> TwitterResult<Vec<Account>> {
        let query = hashmap! {
            "max_results" => FOLLOW_PAGE_SIZE.to_string(),
            "user.fields" => USER_FIELDS.to_string(),
        };
        let users = self.get_all::<UserData>(endpoint, query).await?;
        Ok(users.into_iter().map(Account::from).collect())
    }
}

#[async_trait]
impl TwitterClient for TwitterClientV2 {
    async fn get_identity(&self) -> TwitterResult<Account> {
        let query = hashmap! { "user.fields" => USER_FIELDS.to_string() };
        let response = self.get::<DataResponse<UserData>>("users/me", &query).await?;
        Ok(response.data.into())
    }

    async fn get_following(&self, user_id: &str) -> TwitterResult<Vec<Account>> {
        self.get_accounts(&format!("users/{user_id}/following"))
            .await
    }

    async fn get_followers(&self, user_id: &str) -> TwitterResult<Vec<Account>> {
        self.get_accounts(&format!("users/{user_id}/followers"))
            .await
    }

    async fn get_owned_lists(&self, user_id: &str) -> TwitterResult<Vec<ReferenceList>> {
        let query = hashmap! {
            "max_results" => LIST_PAGE_SIZE.to_string(),
            "list.fields" => "description,private".to_string(),
        };
        let lists = self
            .get_all::<ListData>(&format!("users/{user_id}/owned_lists"), query)
            .await?;
        Ok(lists.into_iter().map(ReferenceList::from).collect())
    }

    // https://developer.twitter.com/en/docs/twitter-api/tweets/timelines/api-reference/get-users-id-tweets
    async fn get_recent_posts(&self, user_id: &str, limit: usize) -> TwitterResult<Vec<Post>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = hashmap! {
            "max_results" => limit.clamp(MIN_TWEETS_PAGE, MAX_TWEETS_PAGE).to_string(),
            "tweet.fields" => "created_at,author_id".to_string(),
        };
        let page = match self
            .get::<PageResponse<TweetData>>(&format!("users/{user_id}/tweets"), &query)
            .await
        {
            Ok(page) => page,
            Err(TwitterError::Api { status: 404, .. }) => return Ok(Vec::new()),
            // Protected or suspended accounts answer 200 with only an errors array
            Err(TwitterError::Api { status: 200, body }) => {
                log::debug!("No visible posts for {}: {}", user_id, body);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        Ok(page
            .data
            .into_iter()
            .take(limit)
            .map(Post::from)
            .collect())
    }

    async fn create_list(
        &self,
        name: &str,
        description: &str,
        private: bool,
    ) -> TwitterResult<ReferenceList> {
        let body = CreateListRequest {
            name,
            description,
            private,
        };
        let response = self
            .send::<DataResponse<CreatedList>, _>(Method::POST, "lists", Some(&body))
            .await?;
        Ok(ReferenceList {
            id: Some(response.data.id),
            name: response.data.name,
            description: description.to_string(),
            private,
        })
    }

    async fn add_list_member(&self, list_id: &str, user_id: &str) -> TwitterResult<()> {
        let body = AddMemberRequest { user_id };
        let response = self
            .send::<DataResponse<MembershipData>, _>(
                Method::POST,
                &format!("lists/{list_id}/members"),
                Some(&body),
            )
            .await?;
        if !response.data.is_member {
            return Err(TwitterError::Unconfirmed("Adding list member"));
        }
        Ok(())
    }

    async fn unfollow(&self, source_id: &str, target_id: &str) -> TwitterResult<()> {
        let response = self
            .send::<DataResponse<FollowingData>, ()>(
                Method::DELETE,
                &format!("users/{source_id}/following/{target_id}"),
                None,
            )
            .await?;
        if response.data.following {
            return Err(TwitterError::Unconfirmed("Unfollow"));
        }
        Ok(())
    }
}

impl From<UserData> for Account {
    fn from(user: UserData) -> Self {
        Account {
            id: user.id,
            username: user.username,
            display_name: user.name,
            protected: user.protected,
            tweet_count: user.public_metrics.tweet_count,
            most_recent_post_id: user.most_recent_tweet_id.filter(|id| !id.is_empty()),
        }
    }
}

impl From<TweetData> for Post {
    fn from(tweet: TweetData) -> Self {
        Post {
            id: tweet.id,
            text: tweet.text,
            created_at: tweet.created_at,
            author_id: tweet.author_id,
        }
    }
}

impl From<ListData> for ReferenceList {
    fn from(list: ListData) -> Self {
        ReferenceList {
            id: Some(list.id),
            name: list.name,
            description: list.description,
            private: list.private,
        }
    }
}
