// Seams between the orchestrator and its external collaborators

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::{ProviderFailure, RepositoryError};
use crate::models::{ChannelRecord, UpsertOutcome, VideoRecord};

/// One provider response together with what it actually cost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderPage {
    pub videos: Vec<VideoRecord>,
    pub units_spent: u32,
}

/// Rate-limited source of videos (search and channel listing).
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Name of the provider (for logging)
    fn name(&self) -> &'static str;

    async fn search(&self, term: &str) -> Result<ProviderPage, ProviderFailure>;

    async fn list_channel_uploads(
        &self,
        channel_id: &str,
    ) -> Result<ProviderPage, ProviderFailure>;

    /// Current details for known video ids. Also resumes a call that failed
    /// partway through its detail lookups.
    async fn fetch_videos(&self, ids: &[String]) -> Result<ProviderPage, ProviderFailure>;
}

#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Insert-or-update keyed by `video_id`. The first `discovered_at` is kept.
    async fn upsert(&self, video: VideoRecord) -> Result<UpsertOutcome, RepositoryError>;

    async fn count_all(&self) -> Result<u64, RepositoryError>;

    async fn count_by_category(&self) -> Result<BTreeMap<String, u64>, RepositoryError>;

    async fn count_channels(&self) -> Result<u64, RepositoryError>;

    /// Ids of videos last refreshed before `stale_before` or published after
    /// `published_after`, newest first.
    async fn refresh_candidates(
        &self,
        stale_before: DateTime<Utc>,
        published_after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, RepositoryError>;
}

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// Channels never checked or last checked before `checked_before`,
    /// never-checked first, then oldest `last_checked` first.
    async fn list_stalest(
        &self,
        limit: usize,
        checked_before: DateTime<Utc>,
    ) -> Result<Vec<ChannelRecord>, RepositoryError>;

    async fn mark_checked(
        &self,
        channel_id: &str,
        checked_at: DateTime<Utc>,
        new_videos: u64,
    ) -> Result<(), RepositoryError>;

    /// Adds a channel unless it is already known. Returns true if it was new.
    async fn register(&self, channel: ChannelRecord) -> Result<bool, RepositoryError>;

    async fn remove(&self, channel_id: &str) -> Result<bool, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<ChannelRecord>, RepositoryError>;
}
