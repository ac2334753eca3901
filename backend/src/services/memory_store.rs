use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

use crate::error::RepositoryError;
use crate::models::{ChannelRecord, UpsertOutcome, VideoRecord};
use crate::services::traits::{ChannelRepository, VideoRepository};

/// Process-local video store, used with `STORAGE_BACKEND=memory` and in tests.
#[derive(Default)]
pub struct InMemoryVideoRepository {
    videos: RwLock<HashMap<String, VideoRecord>>,
}

impl InMemoryVideoRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, video_id: &str) -> Option<VideoRecord> {
        self.videos.read().await.get(video_id).cloned()
    }
}

#[async_trait]
impl VideoRepository for InMemoryVideoRepository {
    async fn upsert(&self, mut video: VideoRecord) -> Result<UpsertOutcome, RepositoryError> {
        let mut videos = self.videos.write().await;
        match videos.get(&video.video_id) {
            Some(existing) => {
                video.discovered_at = existing.discovered_at;
                videos.insert(video.video_id.clone(), video);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                videos.insert(video.video_id.clone(), video);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn count_all(&self) -> Result<u64, RepositoryError> {
        Ok(self.videos.read().await.len() as u64)
    }

    async fn count_by_category(&self) -> Result<BTreeMap<String, u64>, RepositoryError> {
        let mut categories = BTreeMap::new();
        for video in self.videos.read().await.values() {
            *categories.entry(video.category.clone()).or_insert(0) += 1;
        }
        Ok(categories)
    }

    async fn count_channels(&self) -> Result<u64, RepositoryError> {
        let videos = self.videos.read().await;
        let channels: HashSet<&str> = videos.values().map(|v| v.channel_id.as_str()).collect();
        Ok(channels.len() as u64)
    }

    async fn refresh_candidates(
        &self,
        stale_before: DateTime<Utc>,
        published_after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, RepositoryError> {
        let (stale, recent) = (stale_before.timestamp(), published_after.timestamp());
        let videos = self.videos.read().await;
        let mut candidates: Vec<&VideoRecord> = videos
            .values()
            .filter(|v| v.refreshed_at < stale || v.published_at >= recent)
            .collect();
        candidates.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.video_id.cmp(&b.video_id))
        });
        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|v| v.video_id.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryChannelRepository {
    channels: RwLock<HashMap<String, ChannelRecord>>,
}

impl InMemoryChannelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, channel_id: &str) -> Option<ChannelRecord> {
        self.channels.read().await.get(channel_id).cloned()
    }
}

#[async_trait]
impl ChannelRepository for InMemoryChannelRepository {
    async fn list_stalest(
        &self,
        limit: usize,
        checked_before: DateTime<Utc>,
    ) -> Result<Vec<ChannelRecord>, RepositoryError> {
        let cutoff = checked_before.timestamp();
        let channels = self.channels.read().await;
        let mut stale: Vec<ChannelRecord> = channels
            .values()
            .filter(|c| c.last_checked.map_or(true, |checked| checked < cutoff))
            .cloned()
            .collect();
        // None sorts before Some, so never-checked channels lead.
        stale.sort_by(|a, b| {
            a.last_checked
                .cmp(&b.last_checked)
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        stale.truncate(limit);
        Ok(stale)
    }

    async fn mark_checked(
        &self,
        channel_id: &str,
        checked_at: DateTime<Utc>,
        new_videos: u64,
    ) -> Result<(), RepositoryError> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(channel_id)
            .ok_or_else(|| RepositoryError::WriteFailed {
                id: channel_id.to_string(),
                reason: "unknown channel".to_string(),
            })?;
        channel.last_checked = Some(checked_at.timestamp());
        channel.video_count += new_videos as i64;
        Ok(())
    }

    async fn register(&self, channel: ChannelRecord) -> Result<bool, RepositoryError> {
        let mut channels = self.channels.write().await;
        if channels.contains_key(&channel.channel_id) {
            return Ok(false);
        }
        channels.insert(channel.channel_id.clone(), channel);
        Ok(true)
    }

    async fn remove(&self, channel_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.channels.write().await.remove(channel_id).is_some())
    }

    async fn list_all(&self) -> Result<Vec<ChannelRecord>, RepositoryError> {
        let mut channels: Vec<ChannelRecord> =
            self.channels.read().await.values().cloned().collect();
        channels.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn video(id: &str, channel: &str, category: &str) -> VideoRecord {
        VideoRecord {
            video_id: id.to_string(),
            title: format!("video {id}"),
            channel_id: channel.to_string(),
            category: category.to_string(),
            discovered_at: 100,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upserting_the_same_video_twice_keeps_one_record() {
        let repo = InMemoryVideoRepository::new();

        assert_eq!(
            repo.upsert(video("a", "UC1", "tour")).await.unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            repo.upsert(video("a", "UC1", "tour")).await.unwrap(),
            UpsertOutcome::Updated
        );
        assert_eq!(repo.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_keeps_first_discovery_time() {
        let repo = InMemoryVideoRepository::new();
        repo.upsert(video("a", "UC1", "tour")).await.unwrap();

        let mut later = video("a", "UC1", "tour");
        later.discovered_at = 999;
        later.views = 42;
        repo.upsert(later).await.unwrap();

        let stored = repo.get("a").await.unwrap();
        assert_eq!(stored.discovered_at, 100);
        assert_eq!(stored.views, 42);
    }

    #[tokio::test]
    async fn counts_categories_and_channels() {
        let repo = InMemoryVideoRepository::new();
        repo.upsert(video("a", "UC1", "tour")).await.unwrap();
        repo.upsert(video("b", "UC1", "vlog")).await.unwrap();
        repo.upsert(video("c", "UC2", "tour")).await.unwrap();

        let categories = repo.count_by_category().await.unwrap();
        assert_eq!(categories.get("tour"), Some(&2));
        assert_eq!(categories.get("vlog"), Some(&1));
        assert_eq!(repo.count_channels().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn refresh_candidates_are_stale_or_recent() {
        let repo = InMemoryVideoRepository::new();
        let now = Utc::now();
        let hours_ago = |h: i64| (now - Duration::hours(h)).timestamp();
        for (id, published, refreshed) in [
            ("fresh-old", hours_ago(24 * 30), hours_ago(1)),
            ("stale-old", hours_ago(24 * 20), hours_ago(5)),
            ("fresh-new", hours_ago(24), hours_ago(1)),
            ("stale-new", hours_ago(2), hours_ago(3)),
        ] {
            let mut record = video(id, "UC1", "tour");
            record.published_at = published;
            record.refreshed_at = refreshed;
            repo.upsert(record).await.unwrap();
        }

        let ids = repo
            .refresh_candidates(now - Duration::hours(2), now - Duration::days(7), 10)
            .await
            .unwrap();
        assert_eq!(ids, vec!["stale-new", "fresh-new", "stale-old"]);

        let limited = repo
            .refresh_candidates(now - Duration::hours(2), now - Duration::days(7), 1)
            .await
            .unwrap();
        assert_eq!(limited, vec!["stale-new"]);
    }

    #[tokio::test]
    async fn stalest_channels_come_first() {
        let repo = InMemoryChannelRepository::new();
        let now = Utc::now();
        for (id, checked) in [
            ("UC-recent", Some(now - Duration::hours(1))),
            ("UC-old", Some(now - Duration::days(3))),
            ("UC-never", None),
            ("UC-older", Some(now - Duration::days(5))),
        ] {
            let mut channel = ChannelRecord::new(id, id);
            channel.last_checked = checked.map(|t| t.timestamp());
            repo.register(channel).await.unwrap();
        }

        let stale = repo
            .list_stalest(10, now - Duration::hours(12))
            .await
            .unwrap();
        let ids: Vec<&str> = stale.iter().map(|c| c.channel_id.as_str()).collect();
        assert_eq!(ids, vec!["UC-never", "UC-older", "UC-old"]);

        let limited = repo.list_stalest(1, now).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].channel_id, "UC-never");
    }

    #[tokio::test]
    async fn register_does_not_reset_known_channels() {
        let repo = InMemoryChannelRepository::new();
        assert!(repo.register(ChannelRecord::new("UC1", "One")).await.unwrap());
        repo.mark_checked("UC1", Utc::now(), 4).await.unwrap();

        assert!(!repo.register(ChannelRecord::new("UC1", "One")).await.unwrap());
        let stored = repo.get("UC1").await.unwrap();
        assert!(stored.last_checked.is_some());
        assert_eq!(stored.video_count, 4);
    }
}
