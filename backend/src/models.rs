use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::Responder;
use rocket::serde::{Deserialize, Serialize};
use rocket::{response, Response};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub channel_id: String,
    pub channel_title: String,
    pub category: String,
    pub published_at: i64,  // unix
    pub discovered_at: i64, // unix
    pub refreshed_at: i64,  // unix
    pub duration_seconds: i64,
    pub views: i64,
    pub likes: i64,
    pub comment_count: i64,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub title: String,
    pub last_checked: Option<i64>, // unix
    pub video_count: i64,
    pub created_at: i64, // unix
}

impl ChannelRecord {
    pub fn new(channel_id: impl Into<String>, title: impl Into<String>) -> Self {
        ChannelRecord {
            channel_id: channel_id.into(),
            title: title.into(),
            last_checked: None,
            video_count: 0,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    ProviderTransient,
    ProviderPermanent,
    RepositoryWriteFailure,
    QuotaDenied,
}

/// A term, channel or video that was left out of a batch, with enough
/// context for the caller to retry it selectively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedWork {
    pub target: String,
    pub kind: SkipKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionReport {
    pub videos_processed: u64,
    pub estimated_quota_used: u64,
    pub duration: Duration,
    pub searches_run: u32,
    pub skipped: Vec<SkippedWork>,
    pub stopped_by_quota: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RescanReport {
    pub channels_checked: u32,
    pub new_videos_found: u64,
    pub videos_processed: u64,
    pub quota_used: u64,
    pub quota_remaining: u32,
    pub duration: Duration,
    pub skipped: Vec<SkippedWork>,
    pub stopped_by_quota: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RefreshReport {
    pub videos_requested: usize,
    pub videos_refreshed: u64,
    pub quota_used: u64,
    pub duration: Duration,
    pub skipped: Vec<SkippedWork>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_videos: u64,
    pub total_channels: u64,
    pub categories: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub category: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationBreakdown {
    pub searches: u32,
    pub channel_checks: u32,
    pub video_updates: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub date: String,
    pub daily_cap: u32,
    pub units_used: u32,
    pub units_pending: u32,
    pub units_remaining: u32,
    pub reset_time: Option<String>,
    pub operations: OperationBreakdown,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CollectRequest {
    #[serde(rename = "searchTerms", default)]
    pub search_terms: Option<Vec<String>>,
    #[serde(rename = "maxSearches", default)]
    pub max_searches: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectResponse {
    pub message: String,
    pub videos_processed: u64,
    pub estimated_quota_used: u64,
    pub duration_ms: u64,
    pub searches_run: u32,
    pub skipped: Vec<SkippedWork>,
    pub stopped_by_quota: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RescanResponse {
    pub message: String,
    pub channels_checked: u32,
    pub new_videos_found: u64,
    pub quota_used: u64,
    pub total_quota_today: u32,
    pub quota_remaining: u32,
    pub skipped: Vec<SkippedWork>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_videos: u64,
    pub total_channels: u64,
    pub categories: BTreeMap<String, u64>,
    pub category_shares: Vec<CategoryShare>,
    pub last_updated: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuotaResponse {
    pub date: String,
    pub units_used: u32,
    pub units_remaining: u32,
    pub units_pending: u32,
    pub percentage_used: String,
    pub reset_time: Option<String>,
    pub operations: OperationBreakdown,
    pub can_perform_search: bool,
    pub can_perform_batch_update: bool,
    pub efficiency: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewChannel {
    pub input: String,
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: Status,
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: Status, error: &str, message: impl Into<String>) -> Self {
        ErrorResponse {
            status,
            error: error.to_string(),
            message: message.into(),
        }
    }
}

impl<'r> Responder<'r, 'static> for ErrorResponse {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let json = serde_json::to_string(&self).map_err(|_| Status::InternalServerError)?;
        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}
