pub mod lists;
#[cfg(test)]
pub(crate) mod testing;

use crate::cleanse::lists::{ListDirectory, NO_TWEETS_LIST, QUIT_TWITTER_LIST};
use crate::model::{Account, Post};
use crate::twitter::{TwitterClient, TwitterResult};
use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::fmt;
use tokio_util::sync::CancellationToken;

const HOURS_PER_YEAR: f64 = 365.0 * 24.0;
const MILLIS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleanseConfig {
    years_threshold: f64,
    dry_run: bool,
}

impl CleanseConfig {
    pub fn new(years_threshold: f64, dry_run: bool) -> anyhow::Result<Self> {
        if !years_threshold.is_finite() || years_threshold < 0.0 {
            bail!(
                "Dormancy threshold must be a non-negative number of years, got {}",
                years_threshold
            );
        }
        Ok(Self {
            years_threshold,
            dry_run,
        })
    }

    pub fn years_threshold(&self) -> f64 {
        self.years_threshold
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Years are a fixed 365 days, leap days are ignored
    pub fn threshold(&self) -> Duration {
        Duration::milliseconds((self.years_threshold * HOURS_PER_YEAR * MILLIS_PER_HOUR) as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Keep,
    UnfollowNoTweets,
    UnfollowDormant { years_inactive: f64 },
}

/// Classifies an account that has posted at some point by its newest visible
/// post. `None` means the post could not be retrieved.
pub fn dormancy_verdict(latest: Option<&Post>, now: DateTime<Utc>, threshold: Duration) -> Verdict {
    let latest = match latest {
        Some(post) => post,
        None => return Verdict::UnfollowNoTweets,
    };
    let elapsed = now - latest.created_at;
    if elapsed > threshold {
        let hours = elapsed.num_milliseconds() as f64 / MILLIS_PER_HOUR;
        Verdict::UnfollowDormant {
            years_inactive: hours / HOURS_PER_YEAR,
        }
    } else {
        Verdict::Keep
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub examined: usize,
    pub skipped_protected: usize,
    pub kept: usize,
    pub unfollowed_no_tweets: usize,
    pub unfollowed_dormant: usize,
    pub failures: usize,
}

impl RunSummary {
    /// Only called once the account is off the following list (or would be,
    /// on a dry run)
    fn count_unfollow(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Keep => {}
            Verdict::UnfollowNoTweets => self.unfollowed_no_tweets += 1,
            Verdict::UnfollowDormant { .. } => self.unfollowed_dormant += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} examined, {} protected, {} kept, {} without tweets, {} dormant, {} failed",
            self.examined,
            self.skipped_protected,
            self.kept,
            self.unfollowed_no_tweets,
            self.unfollowed_dormant,
            self.failures
        )
    }
}

pub async fn run(
    twitter: &dyn TwitterClient,
    config: &CleanseConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<RunSummary> {
    run_at(twitter, config, cancel, Utc::now()).await
}

/// A single pass over everyone the caller follows, judged against `now`
pub async fn run_at(
    twitter: &dyn TwitterClient,
    config: &CleanseConfig,
    cancel: &CancellationToken,
    now: DateTime<Utc>,
) -> anyhow::Result<RunSummary> {
    let me = twitter
        .get_identity()
        .await
        .context("failed to get current user")?;
    log::info!("Running cleanse for user: @{}", me.username);
    if config.dry_run {
        log::info!("Dry run, nothing will be changed");
    }

    let following = twitter
        .get_following(&me.id)
        .await
        .context("failed to get following list")?;
    let followers = twitter
        .get_followers(&me.id)
        .await
        .context("failed to get followers list")?;
    let followers: HashSet<String> = followers.into_iter().map(|a| a.id).collect();
    log::info!(
        "Following {} accounts, followed by {}",
        following.len(),
        followers.len()
    );

    let owned = twitter
        .get_owned_lists(&me.id)
        .await
        .context("failed to get owned lists")?;
    let mut lists = ListDirectory::new(owned, config.dry_run);
    let no_tweets_list = lists
        .get_or_create(twitter, NO_TWEETS_LIST.0, NO_TWEETS_LIST.1)
        .await
        .context("failed to get or create no tweets list")?;
    let quit_list = lists
        .get_or_create(twitter, QUIT_TWITTER_LIST.0, QUIT_TWITTER_LIST.1)
        .await
        .context("failed to get or create quit twitter list")?;

    let threshold = config.threshold();
    let mut summary = RunSummary::default();
    for account in &following {
        if cancel.is_cancelled() {
            bail!("Cleanse cancelled after {} accounts", summary.examined);
        }
        summary.examined += 1;
        let note = if followers.contains(&account.id) {
            " (follows you back)"
        } else {
            ""
        };

        if account.protected {
            log::info!("Skipping @{} since they are protected{}", account.username, note);
            summary.skipped_protected += 1;
            continue;
        }

        let verdict = match classify(twitter, account, now, threshold).await {
            Ok(verdict) => verdict,
            Err(e) => {
                log::warn!("Error getting tweets for @{}: {}", account.username, e);
                summary.failures += 1;
                continue;
            }
        };

        let list_id = match verdict {
            Verdict::Keep => {
                log::debug!("Keeping @{}{}", account.username, note);
                summary.kept += 1;
                continue;
            }
            Verdict::UnfollowNoTweets => {
                log::info!(
                    "Unfollowing @{} since they have no tweets{}",
                    account.username,
                    note
                );
                &no_tweets_list
            }
            Verdict::UnfollowDormant { years_inactive } => {
                log::info!(
                    "Unfollowing @{} since they haven't tweeted in {:.2} years{}",
                    account.username,
                    years_inactive,
                    note
                );
                &quit_list
            }
        };

        if config.dry_run {
            log::info!(
                "Would add @{} to list {} and unfollow",
                account.username,
                list_id
            );
            summary.count_unfollow(verdict);
            continue;
        }
        match unfollow_into_list(twitter, &me, account, list_id).await {
            Ok(()) => summary.count_unfollow(verdict),
            Err(e) => {
                log::warn!("Error unfollowing @{}: {}", account.username, e);
                summary.failures += 1;
            }
        }
    }

    log::info!("Cleanse completed successfully");
    log::info!("Summary: {}", summary);
    Ok(summary)
}

async fn classify(
    twitter: &dyn TwitterClient,
    account: &Account,
    now: DateTime<Utc>,
    threshold: Duration,
) -> TwitterResult<Verdict> {
    if !account.has_posted() {
        return Ok(Verdict::UnfollowNoTweets);
    }
    let posts = twitter.get_recent_posts(&account.id, 1).await?;
    if posts.is_empty() {
        log::debug!("@{} has no accessible tweets", account.username);
    }
    Ok(dormancy_verdict(posts.first(), now, threshold))
}

/// The list add has to land first so nobody is unfollowed without a record
async fn unfollow_into_list(
    twitter: &dyn TwitterClient,
    me: &Account,
    account: &Account,
    list_id: &str,
) -> TwitterResult<()> {
    twitter.add_list_member(list_id, &account.id).await?;
    twitter.unfollow(&me.id, &account.id).await
}

#[cfg(test)]
mod tests {
    use super::testing::{account, Call, RecordingTwitter};
    use super::*;
    use chrono::TimeZone;
    use maplit::hashmap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn post(id: &str, created_at: DateTime<Utc>) -> Post {
        Post {
            id: id.to_string(),
            text: "hello".to_string(),
            created_at,
            author_id: None,
        }
    }

    fn live() -> CleanseConfig {
        CleanseConfig::new(2.0, false).unwrap()
    }

    async fn run_now(twitter: &RecordingTwitter, config: &CleanseConfig) -> RunSummary {
        run_at(twitter, config, &CancellationToken::new(), now())
            .await
            .unwrap()
    }

    #[test]
    fn rejects_bad_thresholds() {
        assert!(CleanseConfig::new(-1.0, false).is_err());
        assert!(CleanseConfig::new(f64::NAN, false).is_err());
        assert!(CleanseConfig::new(f64::INFINITY, false).is_err());
        assert!(CleanseConfig::new(0.0, true).is_ok());
    }

    #[test]
    fn threshold_uses_fixed_length_years() {
        let config = CleanseConfig::new(1.5, false).unwrap();
        assert_eq!(config.threshold(), Duration::hours(13_140));
    }

    #[test]
    fn exactly_at_threshold_is_kept() {
        let threshold = live().threshold();
        let latest = post("9", now() - threshold);
        assert_eq!(
            dormancy_verdict(Some(&latest), now(), threshold),
            Verdict::Keep
        );
    }

    #[test]
    fn past_threshold_is_dormant() {
        let threshold = live().threshold();
        let latest = post("9", now() - Duration::hours(3 * 8760));
        match dormancy_verdict(Some(&latest), now(), threshold) {
            Verdict::UnfollowDormant { years_inactive } => {
                assert!((years_inactive - 3.0).abs() < 1e-9)
            }
            other => panic!("unexpected verdict {:?}", other),
        }
        let just_over = post("9", now() - threshold - Duration::milliseconds(1));
        assert!(matches!(
            dormancy_verdict(Some(&just_over), now(), threshold),
            Verdict::UnfollowDormant { .. }
        ));
    }

    #[test]
    fn missing_post_means_no_tweets() {
        assert_eq!(
            dormancy_verdict(None, now(), live().threshold()),
            Verdict::UnfollowNoTweets
        );
    }

    #[tokio::test]
    async fn unfollows_account_without_tweets() {
        let twitter = RecordingTwitter {
            following: vec![account("2", None)],
            ..Default::default()
        };
        let summary = run_now(&twitter, &live()).await;
        let list_id = format!("list-{}", NO_TWEETS_LIST.0.len());
        assert_eq!(
            twitter.calls(),
            vec![
                Call::CreateList(NO_TWEETS_LIST.0.to_string()),
                Call::CreateList(QUIT_TWITTER_LIST.0.to_string()),
                Call::AddMember {
                    list_id,
                    user_id: "2".to_string()
                },
                Call::Unfollow {
                    source_id: "1".to_string(),
                    target_id: "2".to_string()
                },
            ]
        );
        assert_eq!(summary.examined, 1);
        assert_eq!(summary.unfollowed_no_tweets, 1);
        assert_eq!(summary.failures, 0);
    }

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let twitter = RecordingTwitter {
            following: vec![account("2", None)],
            ..Default::default()
        };
        let config = CleanseConfig::new(2.0, true).unwrap();
        let summary = run_now(&twitter, &config).await;
        assert!(twitter.calls().is_empty());
        assert_eq!(summary.unfollowed_no_tweets, 1);
    }

    #[tokio::test]
    async fn protected_accounts_are_skipped() {
        let mut quiet = account("2", None);
        quiet.protected = true;
        let twitter = RecordingTwitter {
            following: vec![quiet],
            lists: vec![],
            ..Default::default()
        };
        let summary = run_now(&twitter, &live()).await;
        assert_eq!(summary.skipped_protected, 1);
        assert!(twitter
            .calls()
            .iter()
            .all(|call| matches!(call, Call::CreateList(_))));
    }

    #[tokio::test]
    async fn dormant_and_active_accounts() {
        let twitter = RecordingTwitter {
            following: vec![account("2", Some("20")), account("3", Some("30"))],
            posts: hashmap! {
                "2".to_string() => vec![post("20", now() - Duration::days(365 * 5))],
                "3".to_string() => vec![post("30", now() - Duration::days(10))],
            },
            ..Default::default()
        };
        let summary = run_now(&twitter, &live()).await;
        assert_eq!(summary.unfollowed_dormant, 1);
        assert_eq!(summary.kept, 1);
        let calls = twitter.calls();
        assert!(calls.contains(&Call::AddMember {
            list_id: format!("list-{}", QUIT_TWITTER_LIST.0.len()),
            user_id: "2".to_string()
        }));
        assert!(!calls.iter().any(|call| matches!(
            call,
            Call::Unfollow { target_id, .. } if target_id == "3"
        )));
    }

    #[tokio::test]
    async fn inaccessible_latest_post_means_no_tweets() {
        let twitter = RecordingTwitter {
            following: vec![account("2", Some("20"))],
            ..Default::default()
        };
        let summary = run_now(&twitter, &live()).await;
        assert_eq!(summary.unfollowed_no_tweets, 1);
    }

    #[tokio::test]
    async fn failed_list_add_skips_unfollow_and_continues() {
        let twitter = RecordingTwitter {
            following: vec![account("2", None), account("3", None)],
            fail_add_for: vec!["2".to_string()],
            ..Default::default()
        };
        let summary = run_now(&twitter, &live()).await;
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.unfollowed_no_tweets, 1);
        assert_eq!(summary.examined, 2);
        let calls = twitter.calls();
        assert!(!calls.iter().any(|call| matches!(
            call,
            Call::Unfollow { target_id, .. } if target_id == "2"
        )));
        assert!(calls.contains(&Call::Unfollow {
            source_id: "1".to_string(),
            target_id: "3".to_string()
        }));
    }

    #[tokio::test]
    async fn failed_post_fetch_is_per_account() {
        let twitter = RecordingTwitter {
            following: vec![account("2", Some("20")), account("3", None)],
            fail_posts_for: vec!["2".to_string()],
            ..Default::default()
        };
        let summary = run_now(&twitter, &live()).await;
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.unfollowed_no_tweets, 1);
    }

    #[tokio::test]
    async fn existing_lists_are_not_recreated() {
        let existing = |id: &str, name: &str| crate::model::ReferenceList {
            id: Some(id.to_string()),
            name: name.to_string(),
            description: String::new(),
            private: true,
        };
        let twitter = RecordingTwitter {
            following: vec![account("2", None)],
            lists: vec![
                existing("100", NO_TWEETS_LIST.0),
                existing("200", QUIT_TWITTER_LIST.0),
            ],
            ..Default::default()
        };
        run_now(&twitter, &live()).await;
        assert_eq!(
            twitter.calls()[0],
            Call::AddMember {
                list_id: "100".to_string(),
                user_id: "2".to_string()
            }
        );
    }

    #[tokio::test]
    async fn following_failure_aborts_with_context() {
        let twitter = RecordingTwitter {
            fail_following: true,
            ..Default::default()
        };
        let err = run_at(&twitter, &live(), &CancellationToken::new(), now())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).starts_with("failed to get following list: "));
        assert!(twitter.calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_stops_before_acting() {
        let twitter = RecordingTwitter {
            following: vec![account("2", None)],
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(run_at(&twitter, &live(), &cancel, now()).await.is_err());
        assert!(!twitter
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Unfollow { .. })));
    }
}
