use async_trait::async_trait;
use chrono::{DateTime, Utc};
use elasticsearch::http::response::Response;
use elasticsearch::{
    indices::IndicesCreateParts, CountParts, CreateParts, DeleteParts, Elasticsearch,
    SearchParts, UpdateParts,
};
use log::{error, info};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::RepositoryError;
use crate::models::{ChannelRecord, UpsertOutcome, VideoRecord};
use crate::services::traits::{ChannelRepository, VideoRepository};

pub const VIDEO_INDEX: &str = "youtube_videos";
pub const CHANNEL_INDEX: &str = "monitored_channels";
/// Largest page a single search request may ask for.
const MAX_PAGE: usize = 10_000;

pub async fn create_es_indices(es_client: &Elasticsearch) {
    let indices = [
        (
            VIDEO_INDEX,
            json!({
                "mappings": {
                    "properties": {
                        "video_id": { "type": "keyword" },
                        "title": { "type": "text" },
                        "description": { "type": "text" },
                        "channel_id": { "type": "keyword" },
                        "channel_title": { "type": "keyword" },
                        "category": { "type": "keyword" },
                        "published_at": { "type": "long" },
                        "discovered_at": { "type": "long" },
                        "refreshed_at": { "type": "long" },
                        "duration_seconds": { "type": "long" },
                        "views": { "type": "long" },
                        "likes": { "type": "long" },
                        "comment_count": { "type": "long" },
                        "tags": { "type": "keyword" }
                    }
                }
            }),
        ),
        (
            CHANNEL_INDEX,
            json!({
                "mappings": {
                    "properties": {
                        "channel_id": { "type": "keyword" },
                        "title": { "type": "keyword" },
                        "last_checked": { "type": "long" },
                        "video_count": { "type": "long" },
                        "created_at": { "type": "long" }
                    }
                }
            }),
        ),
    ];

    for (index, body) in indices {
        match es_client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(body)
            .send()
            .await
        {
            Ok(response) => {
                if response.status_code().is_success() {
                    info!("Elasticsearch index '{index}' created.");
                } else {
                    let response_text = response.text().await.unwrap_or_default();
                    if response_text.contains("resource_already_exists_exception") {
                        info!("Elasticsearch index '{index}' already exists.");
                    } else {
                        error!("Failed to create Elasticsearch index '{index}': {response_text}");
                    }
                }
            }
            Err(e) => {
                error!("Failed to connect to Elasticsearch to create index '{index}': {e:?}");
            }
        }
    }
}

fn read_failed(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::ReadFailed(e.to_string())
}

fn write_failed(id: &str, e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::WriteFailed {
        id: id.to_string(),
        reason: e.to_string(),
    }
}

/// Parses a successful search or count response, turning any other status
/// into a read failure.
async fn read_json(response: Response) -> Result<Value, RepositoryError> {
    let status = response.status_code();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(read_failed(format!("status {status}: {body}")));
    }
    response.json::<Value>().await.map_err(read_failed)
}

#[derive(Clone)]
pub struct ElasticVideoRepository {
    es_client: Elasticsearch,
}

impl ElasticVideoRepository {
    pub fn new(es_client: Elasticsearch) -> Self {
        ElasticVideoRepository { es_client }
    }
}

#[async_trait]
impl VideoRepository for ElasticVideoRepository {
    async fn upsert(&self, video: VideoRecord) -> Result<UpsertOutcome, RepositoryError> {
        let video_id = video.video_id.clone();
        let upsert = serde_json::to_value(&video).map_err(|e| write_failed(&video_id, e))?;
        // Updates never overwrite the first discovery time.
        let mut doc = upsert.clone();
        if let Some(fields) = doc.as_object_mut() {
            fields.remove("discovered_at");
        }

        let response = self
            .es_client
            .update(UpdateParts::IndexId(VIDEO_INDEX, &video_id))
            .body(json!({ "doc": doc, "upsert": upsert }))
            .send()
            .await
            .map_err(|e| write_failed(&video_id, e))?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(write_failed(&video_id, format!("status {status}: {body}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| write_failed(&video_id, e))?;
        match body["result"].as_str() {
            Some("created") => Ok(UpsertOutcome::Inserted),
            _ => Ok(UpsertOutcome::Updated),
        }
    }

    async fn count_all(&self) -> Result<u64, RepositoryError> {
        let response = self
            .es_client
            .count(CountParts::Index(&[VIDEO_INDEX]))
            .send()
            .await
            .map_err(read_failed)?;
        let body = read_json(response).await?;
        Ok(body["count"].as_u64().unwrap_or(0))
    }

    async fn count_by_category(&self) -> Result<BTreeMap<String, u64>, RepositoryError> {
        let response = self
            .es_client
            .search(SearchParts::Index(&[VIDEO_INDEX]))
            .body(json!({
                "size": 0,
                "aggs": {
                    "categories": { "terms": { "field": "category", "size": 100 } }
                }
            }))
            .send()
            .await
            .map_err(read_failed)?;
        let body = read_json(response).await?;

        let mut categories = BTreeMap::new();
        if let Some(buckets) = body["aggregations"]["categories"]["buckets"].as_array() {
            for bucket in buckets {
                if let Some(key) = bucket["key"].as_str() {
                    categories.insert(key.to_string(), bucket["doc_count"].as_u64().unwrap_or(0));
                }
            }
        }
        Ok(categories)
    }

    async fn count_channels(&self) -> Result<u64, RepositoryError> {
        let response = self
            .es_client
            .search(SearchParts::Index(&[VIDEO_INDEX]))
            .body(json!({
                "size": 0,
                "aggs": {
                    "channels": { "cardinality": { "field": "channel_id" } }
                }
            }))
            .send()
            .await
            .map_err(read_failed)?;
        let body = read_json(response).await?;
        Ok(body["aggregations"]["channels"]["value"]
            .as_u64()
            .unwrap_or(0))
    }

    async fn refresh_candidates(
        &self,
        stale_before: DateTime<Utc>,
        published_after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, RepositoryError> {
        let response = self
            .es_client
            .search(SearchParts::Index(&[VIDEO_INDEX]))
            .body(json!({
                "size": limit.min(MAX_PAGE),
                "_source": ["video_id"],
                "query": {
                    "bool": {
                        "should": [
                            { "range": { "refreshed_at": { "lt": stale_before.timestamp() } } },
                            { "range": { "published_at": { "gte": published_after.timestamp() } } }
                        ],
                        "minimum_should_match": 1
                    }
                },
                "sort": [{ "published_at": { "order": "desc" } }]
            }))
            .send()
            .await
            .map_err(read_failed)?;
        let body = read_json(response).await?;

        Ok(body["hits"]["hits"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit["_source"]["video_id"].as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Clone)]
pub struct ElasticChannelRepository {
    es_client: Elasticsearch,
}

impl ElasticChannelRepository {
    pub fn new(es_client: Elasticsearch) -> Self {
        ElasticChannelRepository { es_client }
    }

    async fn search_channels(&self, body: Value) -> Result<Vec<ChannelRecord>, RepositoryError> {
        let response = self
            .es_client
            .search(SearchParts::Index(&[CHANNEL_INDEX]))
            .body(body)
            .send()
            .await
            .map_err(read_failed)?;
        let body = read_json(response).await?;

        let mut channels = Vec::new();
        if let Some(hits) = body["hits"]["hits"].as_array() {
            for hit in hits {
                match serde_json::from_value::<ChannelRecord>(hit["_source"].clone()) {
                    Ok(channel) => channels.push(channel),
                    Err(e) => error!("Skipping malformed channel document: {e}"),
                }
            }
        }
        Ok(channels)
    }
}

#[async_trait]
impl ChannelRepository for ElasticChannelRepository {
    async fn list_stalest(
        &self,
        limit: usize,
        checked_before: DateTime<Utc>,
    ) -> Result<Vec<ChannelRecord>, RepositoryError> {
        self.search_channels(json!({
            "size": limit.min(MAX_PAGE),
            "query": {
                "bool": {
                    "should": [
                        { "bool": { "must_not": { "exists": { "field": "last_checked" } } } },
                        { "range": { "last_checked": { "lt": checked_before.timestamp() } } }
                    ],
                    "minimum_should_match": 1
                }
            },
            "sort": [
                { "last_checked": { "order": "asc", "missing": "_first" } },
                { "channel_id": { "order": "asc" } }
            ]
        }))
        .await
    }

    async fn mark_checked(
        &self,
        channel_id: &str,
        checked_at: DateTime<Utc>,
        new_videos: u64,
    ) -> Result<(), RepositoryError> {
        let response = self
            .es_client
            .update(UpdateParts::IndexId(CHANNEL_INDEX, channel_id))
            .body(json!({
                "script": {
                    "source": "ctx._source.last_checked = params.checked_at; ctx._source.video_count += params.new_videos",
                    "params": {
                        "checked_at": checked_at.timestamp(),
                        "new_videos": new_videos
                    }
                }
            }))
            .send()
            .await
            .map_err(|e| write_failed(channel_id, e))?;

        let status = response.status_code();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(write_failed(channel_id, format!("status {status}: {body}")))
        }
    }

    async fn register(&self, channel: ChannelRecord) -> Result<bool, RepositoryError> {
        let channel_id = channel.channel_id.clone();
        let response = self
            .es_client
            .create(CreateParts::IndexId(CHANNEL_INDEX, &channel_id))
            .body(&channel)
            .send()
            .await
            .map_err(|e| write_failed(&channel_id, e))?;

        let status = response.status_code();
        match status.as_u16() {
            409 => Ok(false),
            _ if status.is_success() => Ok(true),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(write_failed(&channel_id, format!("status {status}: {body}")))
            }
        }
    }

    async fn remove(&self, channel_id: &str) -> Result<bool, RepositoryError> {
        let response = self
            .es_client
            .delete(DeleteParts::IndexId(CHANNEL_INDEX, channel_id))
            .send()
            .await
            .map_err(|e| write_failed(channel_id, e))?;

        let status = response.status_code();
        match status.as_u16() {
            404 => Ok(false),
            _ if status.is_success() => Ok(true),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(write_failed(channel_id, format!("status {status}: {body}")))
            }
        }
    }

    async fn list_all(&self) -> Result<Vec<ChannelRecord>, RepositoryError> {
        self.search_channels(json!({
            "size": 1000,
            "query": { "match_all": {} },
            "sort": [{ "title": { "order": "asc" } }]
        }))
        .await
    }
}
