use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use url::Url;

use crate::error::{ProviderError, ProviderFailure};
use crate::models::VideoRecord;
use crate::services::quota_ledger::{QuotaOperation, VIDEO_LIST_BATCH};
use crate::services::traits::{ProviderPage, SearchProvider};
use crate::utils::{
    categorize_video, parse_iso8601_duration_to_seconds, parse_iso8601_to_timestamp,
    truncate_chars,
};

pub const DEFAULT_API_URL: &str = "https://www.googleapis.com/youtube/v3";
const MAX_DESCRIPTION_CHARS: usize = 1000;

#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    pub api_key: String,
    pub base_url: String,
    pub search_max_results: u32,
    pub search_window_days: i64,
    pub recent_uploads: u32,
}

impl YouTubeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        YouTubeConfig {
            api_key: api_key.into(),
            base_url: DEFAULT_API_URL.to_string(),
            search_max_results: 25,
            search_window_days: 30,
            recent_uploads: 10,
        }
    }
}

/// YouTube Data API v3 over plain HTTP. Reports what each call was billed
/// so the ledger can reconcile its estimate.
pub struct YouTubeProvider {
    client: Client,
    config: YouTubeConfig,
}

impl YouTubeProvider {
    pub fn new(config: YouTubeConfig) -> Self {
        YouTubeProvider {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self, resource: &str, params: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let base = self.config.base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{resource}"))
            .map_err(|e| ProviderError::Rejected(format!("invalid API url: {e}")))?;
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("key", &self.config.api_key);
        Ok(url)
    }

    async fn get_json(&self, url: Url, target: &str) -> Result<Value, ProviderError> {
        debug!("GET {}", url.path());
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("{target}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, target));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::Malformed(format!("{target}: {e}")))
    }

    /// Full records for `ids`, one `videos.list` call per batch of fifty. A
    /// failing batch reports the batches already billed and the ids still
    /// missing.
    async fn fetch_details(
        &self,
        ids: &[String],
        target: &str,
    ) -> Result<ProviderPage, ProviderFailure> {
        let mut page = ProviderPage {
            videos: Vec::with_capacity(ids.len()),
            units_spent: 0,
        };
        for (index, batch) in ids.chunks(VIDEO_LIST_BATCH as usize).enumerate() {
            let joined = batch.join(",");
            let response = match self.endpoint(
                "videos",
                &[("part", "snippet,statistics,contentDetails"), ("id", &joined)],
            ) {
                Ok(url) => self.get_json(url, target).await,
                Err(e) => Err(e),
            };
            match response {
                Ok(response) => {
                    page.units_spent += QuotaOperation::VideoList.unit_cost();
                    if let Some(items) = response["items"].as_array() {
                        page.videos.extend(items.iter().filter_map(parse_video));
                    }
                }
                Err(error) => {
                    warn!(
                        "Details batch {} of '{target}' failed after {} units: {error}",
                        index + 1,
                        page.units_spent
                    );
                    return Err(ProviderFailure {
                        error,
                        units_spent: page.units_spent,
                        videos: page.videos,
                        pending_ids: ids[index * VIDEO_LIST_BATCH as usize..].to_vec(),
                    });
                }
            }
        }
        Ok(page)
    }

    /// Video ids in a response, read from `path` inside each item.
    fn item_ids(response: &Value, path: &[&str]) -> Vec<String> {
        response["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| path.iter().fold(item, |value, key| &value[*key]).as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for YouTubeProvider {
    fn name(&self) -> &'static str {
        "youtube"
    }

    async fn search(&self, term: &str) -> Result<ProviderPage, ProviderFailure> {
        let published_after = (Utc::now() - Duration::days(self.config.search_window_days))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let max_results = self.config.search_max_results.to_string();
        let url = self.endpoint(
            "search",
            &[
                ("part", "snippet"),
                ("q", term),
                ("type", "video"),
                ("order", "relevance"),
                ("maxResults", &max_results),
                ("publishedAfter", &published_after),
            ],
        )?;

        let response = self.get_json(url, term).await?;
        let search_cost = QuotaOperation::Search.unit_cost();

        let ids = Self::item_ids(&response, &["id", "videoId"]);
        if ids.is_empty() {
            info!("No videos found for '{term}'");
            return Ok(ProviderPage {
                videos: Vec::new(),
                units_spent: search_cost,
            });
        }

        let mut page = self
            .fetch_details(&ids, term)
            .await
            .map_err(|failure| failure.billed_before(search_cost))?;
        page.units_spent += search_cost;
        info!("Found {} videos for '{term}'", page.videos.len());
        Ok(page)
    }

    async fn list_channel_uploads(
        &self,
        channel_id: &str,
    ) -> Result<ProviderPage, ProviderFailure> {
        let url = self.endpoint("channels", &[("part", "contentDetails"), ("id", channel_id)])?;
        let channel = self.get_json(url, channel_id).await?;
        let mut units_spent = QuotaOperation::ChannelList.unit_cost();

        let Some(item) = channel["items"].as_array().and_then(|items| items.first()) else {
            return Err(
                ProviderFailure::from(ProviderError::NotFound(format!("channel {channel_id}")))
                    .billed_before(units_spent),
            );
        };

        let Some(uploads) = item["contentDetails"]["relatedPlaylists"]["uploads"].as_str() else {
            warn!("No uploads playlist found for channel {channel_id}");
            return Ok(ProviderPage {
                videos: Vec::new(),
                units_spent,
            });
        };

        let max_results = self.config.recent_uploads.to_string();
        let url = self
            .endpoint(
                "playlistItems",
                &[
                    ("part", "snippet"),
                    ("playlistId", uploads),
                    ("maxResults", &max_results),
                ],
            )
            .map_err(|e| ProviderFailure::from(e).billed_before(units_spent))?;
        let playlist = self
            .get_json(url, channel_id)
            .await
            .map_err(|e| ProviderFailure::from(e).billed_before(units_spent))?;
        units_spent += QuotaOperation::PlaylistItems.unit_cost();

        let ids = Self::item_ids(&playlist, &["snippet", "resourceId", "videoId"]);
        if ids.is_empty() {
            return Ok(ProviderPage {
                videos: Vec::new(),
                units_spent,
            });
        }

        let mut page = self
            .fetch_details(&ids, channel_id)
            .await
            .map_err(|failure| failure.billed_before(units_spent))?;
        page.units_spent += units_spent;
        Ok(page)
    }

    async fn fetch_videos(&self, ids: &[String]) -> Result<ProviderPage, ProviderFailure> {
        if ids.is_empty() {
            return Ok(ProviderPage::default());
        }
        self.fetch_details(ids, "video details").await
    }
}

/// Maps a non-success HTTP status to a provider error. A 403 is only a rate
/// limit when the body names a quota reason.
pub fn classify_status(status: StatusCode, body: &str, target: &str) -> ProviderError {
    let detail = format!("{target}: HTTP {}", status.as_u16());
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
        StatusCode::FORBIDDEN
            if body.contains("quotaExceeded") || body.contains("rateLimitExceeded") =>
        {
            ProviderError::RateLimited(detail)
        }
        StatusCode::BAD_REQUEST => ProviderError::InvalidTerm(detail),
        StatusCode::NOT_FOUND => ProviderError::NotFound(detail),
        s if s.is_server_error() => ProviderError::Unavailable(detail),
        _ => ProviderError::Rejected(detail),
    }
}

fn parse_video(item: &Value) -> Option<VideoRecord> {
    let video_id = item["id"].as_str()?.to_string();
    let snippet = &item["snippet"];
    let statistics = &item["statistics"];

    let title = snippet["title"].as_str().unwrap_or("").to_string();
    let description = truncate_chars(
        snippet["description"].as_str().unwrap_or(""),
        MAX_DESCRIPTION_CHARS,
    );
    let count = |field: &str| -> i64 {
        statistics[field]
            .as_str()
            .unwrap_or("0")
            .parse()
            .unwrap_or(0)
    };

    Some(VideoRecord {
        category: categorize_video(&title, &description),
        channel_id: snippet["channelId"].as_str().unwrap_or("").to_string(),
        channel_title: snippet["channelTitle"].as_str().unwrap_or("").to_string(),
        published_at: parse_iso8601_to_timestamp(snippet["publishedAt"].as_str().unwrap_or("")),
        discovered_at: Utc::now().timestamp(),
        refreshed_at: Utc::now().timestamp(),
        duration_seconds: parse_iso8601_duration_to_seconds(
            item["contentDetails"]["duration"].as_str().unwrap_or(""),
        ),
        views: count("viewCount"),
        likes: count("likeCount"),
        comment_count: count("commentCount"),
        tags: snippet["tags"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
        video_id,
        title,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quota_reasons_on_403_are_rate_limits() {
        let body = r#"{"error":{"errors":[{"reason":"quotaExceeded"}]}}"#;
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, body, "golf"),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "{}", "golf"),
            ProviderError::Rejected(_)
        ));
    }

    #[test]
    fn status_classes() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "", "t").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "", "t").is_transient());
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, "", "t"),
            ProviderError::InvalidTerm("t: HTTP 400".to_string())
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, "", "UC1"),
            ProviderError::NotFound("UC1: HTTP 404".to_string())
        );
    }

    #[test]
    fn parses_a_video_item() {
        let item = json!({
            "id": "abc123",
            "snippet": {
                "title": "Driver swing tips",
                "description": "x".repeat(1500),
                "channelId": "UC1",
                "channelTitle": "Golf Channel",
                "publishedAt": "2024-05-01T12:00:00Z",
                "tags": ["golf", "driver"]
            },
            "statistics": { "viewCount": "1200", "likeCount": "40" },
            "contentDetails": { "duration": "PT4M13S" }
        });

        let video = parse_video(&item).unwrap();
        assert_eq!(video.video_id, "abc123");
        assert_eq!(video.category, "instruction");
        assert_eq!(video.description.chars().count(), 1000);
        assert_eq!(video.duration_seconds, 253);
        assert_eq!(video.views, 1200);
        assert_eq!(video.comment_count, 0);
        assert_eq!(video.published_at, 1714564800);
        assert_eq!(video.tags, vec!["golf", "driver"]);
    }

    #[test]
    fn items_without_an_id_are_dropped() {
        assert!(parse_video(&json!({ "snippet": { "title": "x" } })).is_none());
    }
}
