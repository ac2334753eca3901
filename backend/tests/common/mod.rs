#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collector::error::{ProviderError, ProviderFailure, RepositoryError};
use collector::models::{UpsertOutcome, VideoRecord};
use collector::services::quota_ledger::QuotaOperation;
use collector::services::traits::{ProviderPage, SearchProvider, VideoRepository};
use collector::services::OrchestratorSettings;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

type Outcome = Result<ProviderPage, ProviderFailure>;
type Script = Mutex<HashMap<String, VecDeque<Outcome>>>;

/// Provider whose answers are scripted per term, channel or id list.
/// Unscripted searches return an empty page billed at 100 units, unscripted
/// channels an empty page billed at 2, and unscripted detail lookups return
/// one video per id on channel `UC1`.
#[derive(Default)]
pub struct FakeProvider {
    searches: Script,
    uploads: Script,
    details: Script,
    hang_on: Mutex<HashSet<String>>,
    pub entered_hang: Arc<Notify>,
    calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_search(self, term: &str, result: Result<ProviderPage, ProviderError>) -> Self {
        push(&self.searches, term, result.map_err(ProviderFailure::from));
        self
    }

    /// Scripts a search that fails after part of it was already billed.
    pub fn on_search_failure(self, term: &str, failure: ProviderFailure) -> Self {
        push(&self.searches, term, Err(failure));
        self
    }

    pub fn on_uploads(self, channel_id: &str, result: Result<ProviderPage, ProviderError>) -> Self {
        push(&self.uploads, channel_id, result.map_err(ProviderFailure::from));
        self
    }

    /// Scripts the detail lookup for exactly `ids`, in order.
    pub fn on_details(self, ids: &[&str], result: Outcome) -> Self {
        push(&self.details, &ids.join(","), result);
        self
    }

    /// Makes the search for `term` never complete.
    pub fn hang_on(self, term: &str) -> Self {
        self.hang_on.lock().unwrap().insert(term.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn push(script: &Script, key: &str, result: Outcome) {
    script
        .lock()
        .unwrap()
        .entry(key.to_string())
        .or_default()
        .push_back(result);
}

fn next(script: &Script, key: &str) -> Option<Outcome> {
    script
        .lock()
        .unwrap()
        .get_mut(key)
        .and_then(|queue| queue.pop_front())
}

#[async_trait]
impl SearchProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn search(&self, term: &str) -> Outcome {
        self.calls.lock().unwrap().push(format!("search:{term}"));
        let hangs = self.hang_on.lock().unwrap().contains(term);
        if hangs {
            self.entered_hang.notify_one();
            std::future::pending::<()>().await;
        }
        next(&self.searches, term).unwrap_or_else(|| Ok(page(vec![], 100)))
    }

    async fn list_channel_uploads(&self, channel_id: &str) -> Outcome {
        self.calls.lock().unwrap().push(format!("uploads:{channel_id}"));
        next(&self.uploads, channel_id).unwrap_or_else(|| Ok(page(vec![], 2)))
    }

    async fn fetch_videos(&self, ids: &[String]) -> Outcome {
        let key = ids.join(",");
        self.calls.lock().unwrap().push(format!("details:{key}"));
        next(&self.details, &key).unwrap_or_else(|| {
            Ok(page(
                ids.iter().map(|id| video(id, "UC1")).collect(),
                QuotaOperation::VideoList.batch_cost(ids.len() as u32),
            ))
        })
    }
}

/// A failure after `units_spent` were billed, with `pending` ids left to fetch.
pub fn failed_after(error: ProviderError, units_spent: u32, pending: &[&str]) -> ProviderFailure {
    ProviderFailure {
        error,
        units_spent,
        videos: Vec::new(),
        pending_ids: pending.iter().map(|id| id.to_string()).collect(),
    }
}

/// Video store that rejects writes for selected ids.
pub struct FailingVideoRepository {
    pub reject: HashSet<String>,
    stored: Mutex<HashMap<String, VideoRecord>>,
}

impl FailingVideoRepository {
    pub fn rejecting(ids: &[&str]) -> Self {
        FailingVideoRepository {
            reject: ids.iter().map(|id| id.to_string()).collect(),
            stored: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VideoRepository for FailingVideoRepository {
    async fn upsert(&self, video: VideoRecord) -> Result<UpsertOutcome, RepositoryError> {
        if self.reject.contains(&video.video_id) {
            return Err(RepositoryError::WriteFailed {
                id: video.video_id,
                reason: "disk full".to_string(),
            });
        }
        let previous = self
            .stored
            .lock()
            .unwrap()
            .insert(video.video_id.clone(), video);
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn count_all(&self) -> Result<u64, RepositoryError> {
        Ok(self.stored.lock().unwrap().len() as u64)
    }

    async fn count_by_category(&self) -> Result<BTreeMap<String, u64>, RepositoryError> {
        Ok(BTreeMap::new())
    }

    async fn count_channels(&self) -> Result<u64, RepositoryError> {
        Ok(0)
    }

    async fn refresh_candidates(
        &self,
        _stale_before: DateTime<Utc>,
        _published_after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, RepositoryError> {
        let mut ids: Vec<String> = self.stored.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }
}

pub fn video(id: &str, channel_id: &str) -> VideoRecord {
    VideoRecord {
        video_id: id.to_string(),
        title: format!("Video {id}"),
        channel_id: channel_id.to_string(),
        channel_title: format!("Channel {channel_id}"),
        category: "general".to_string(),
        ..Default::default()
    }
}

pub fn page(videos: Vec<VideoRecord>, units_spent: u32) -> ProviderPage {
    ProviderPage {
        videos,
        units_spent,
    }
}

/// Default settings without pauses or backoff delays.
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        retry_base_delay: Duration::ZERO,
        retry_max_delay: Duration::ZERO,
        search_pause: Duration::ZERO,
        ..OrchestratorSettings::default()
    }
}
