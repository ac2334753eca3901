use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::RepositoryError;
use crate::services::traits::ChannelRepository;

type ClaimSet = Arc<Mutex<HashSet<String>>>;

/// Picks the stalest channels for a rescan and keeps concurrent planners from
/// polling the same channel twice.
#[derive(Clone)]
pub struct ChannelRescanPlanner {
    channels: Arc<dyn ChannelRepository>,
    in_progress: ClaimSet,
    min_recheck_interval: Duration,
}

impl ChannelRescanPlanner {
    pub fn new(channels: Arc<dyn ChannelRepository>, min_recheck_interval: Duration) -> Self {
        ChannelRescanPlanner {
            channels,
            in_progress: Arc::new(Mutex::new(HashSet::new())),
            min_recheck_interval,
        }
    }

    pub async fn plan(&self, limit: usize) -> Result<Vec<ChannelClaim>, RepositoryError> {
        self.plan_at(limit, Utc::now()).await
    }

    /// Claims up to `limit` channels, oldest `last_checked` first, skipping
    /// channels another caller is already polling.
    pub async fn plan_at(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChannelClaim>, RepositoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let busy = self.claimed().len();
        let candidates = self
            .channels
            .list_stalest(limit.saturating_add(busy), now - self.min_recheck_interval)
            .await?;

        let mut in_progress = self.lock_claims();
        let mut claims = Vec::new();
        for channel in candidates {
            if claims.len() == limit {
                break;
            }
            if !in_progress.insert(channel.channel_id.clone()) {
                debug!("Channel {} is already being rescanned", channel.channel_id);
                continue;
            }
            claims.push(ChannelClaim {
                channel_id: channel.channel_id,
                title: channel.title,
                in_progress: self.in_progress.clone(),
                channels: self.channels.clone(),
            });
        }
        drop(in_progress);

        info!(
            "Planned rescan of {} channels (limit {limit})",
            claims.len()
        );
        Ok(claims)
    }

    /// Channel ids currently claimed by a rescan.
    pub fn claimed(&self) -> HashSet<String> {
        self.lock_claims().clone()
    }

    pub fn is_in_progress(&self, channel_id: &str) -> bool {
        self.lock_claims().contains(channel_id)
    }

    fn lock_claims(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to poll one channel. The claim is released when dropped.
pub struct ChannelClaim {
    channel_id: String,
    title: String,
    in_progress: ClaimSet,
    channels: Arc<dyn ChannelRepository>,
}

impl ChannelClaim {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Records the poll so the channel rotates to the back of the queue, then
    /// releases the claim.
    pub async fn complete(
        self,
        checked_at: DateTime<Utc>,
        new_videos: u64,
    ) -> Result<(), RepositoryError> {
        self.channels
            .mark_checked(&self.channel_id, checked_at, new_videos)
            .await
    }
}

impl Drop for ChannelClaim {
    fn drop(&mut self) {
        self.in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.channel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelRecord;
    use crate::services::memory_store::InMemoryChannelRepository;

    async fn repo_with(ids: &[&str]) -> Arc<InMemoryChannelRepository> {
        let repo = Arc::new(InMemoryChannelRepository::new());
        for id in ids {
            repo.register(ChannelRecord::new(*id, *id)).await.unwrap();
        }
        repo
    }

    fn ids(claims: &[ChannelClaim]) -> Vec<&str> {
        claims.iter().map(|c| c.channel_id()).collect()
    }

    #[tokio::test]
    async fn never_returns_more_than_limit() {
        let repo = repo_with(&["UC1", "UC2", "UC3", "UC4"]).await;
        let planner = ChannelRescanPlanner::new(repo, Duration::hours(12));

        let claims = planner.plan(2).await.unwrap();
        assert_eq!(ids(&claims), vec!["UC1", "UC2"]);
        assert!(planner.plan(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_planners_never_share_a_channel() {
        let repo = repo_with(&["UC1", "UC2", "UC3"]).await;
        let planner = ChannelRescanPlanner::new(repo, Duration::hours(12));

        let first = planner.plan(2).await.unwrap();
        assert!(planner.is_in_progress("UC1"));

        let second = planner.plan(2).await.unwrap();
        assert_eq!(ids(&second), vec!["UC3"]);

        drop(first);
        assert!(!planner.is_in_progress("UC1"));
        let third = planner.plan(5).await.unwrap();
        assert_eq!(ids(&third), vec!["UC1", "UC2"]);
    }

    #[tokio::test]
    async fn huge_limits_are_bounded_by_the_store() {
        let repo = repo_with(&["UC1", "UC2", "UC3"]).await;
        let planner = ChannelRescanPlanner::new(repo, Duration::hours(12));

        let held = planner.plan(1).await.unwrap();
        let rest = planner.plan(usize::MAX).await.unwrap();

        assert_eq!(ids(&held), vec!["UC1"]);
        assert_eq!(ids(&rest), vec!["UC2", "UC3"]);
    }

    #[tokio::test]
    async fn completed_channels_rotate_to_the_back() {
        let repo = repo_with(&["UC1", "UC2", "UC3"]).await;
        let planner = ChannelRescanPlanner::new(repo.clone(), Duration::zero());
        let start = Utc::now() - Duration::minutes(10);

        for (offset, claim) in planner
            .plan_at(2, start)
            .await
            .unwrap()
            .into_iter()
            .enumerate()
        {
            claim
                .complete(start + Duration::seconds(offset as i64), 0)
                .await
                .unwrap();
        }

        let next = planner
            .plan_at(3, start + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(ids(&next), vec!["UC3", "UC1", "UC2"]);
        assert!(repo.get("UC1").await.unwrap().last_checked.is_some());
    }

    #[tokio::test]
    async fn recently_checked_channels_wait_for_the_interval() {
        let repo = repo_with(&["UC1", "UC2"]).await;
        let planner = ChannelRescanPlanner::new(repo.clone(), Duration::hours(12));
        let now = Utc::now();
        repo.mark_checked("UC1", now - Duration::hours(1), 0)
            .await
            .unwrap();

        let claims = planner.plan_at(5, now).await.unwrap();
        assert_eq!(ids(&claims), vec!["UC2"]);
    }
}
