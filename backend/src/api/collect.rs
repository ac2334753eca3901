use crate::models::{CollectRequest, CollectResponse, ErrorResponse};
use crate::AppState;
use log::{error, info};
use rocket::serde::json::Json;
use rocket::{post, State};

pub const DEFAULT_MAX_SEARCHES: usize = 3;
pub const DEFAULT_SEARCH_TERMS: [&str; 3] = ["golf", "Good Good golf", "golf highlights"];
pub const REFRESH_BATCH_LIMIT: usize = 100;

#[post("/collect-videos-efficient?<max_searches>&<update_only>", data = "<request>")]
pub async fn collect_videos_efficient(
    max_searches: Option<usize>,
    update_only: Option<bool>,
    request: Option<Json<CollectRequest>>,
    state: &State<AppState>,
) -> Result<Json<CollectResponse>, ErrorResponse> {
    if update_only.unwrap_or(false) {
        return refresh_existing_videos(state).await;
    }

    let request = request.map(Json::into_inner).unwrap_or_default();
    let max_searches = max_searches
        .or(request.max_searches)
        .unwrap_or(DEFAULT_MAX_SEARCHES);
    let terms = match request.search_terms {
        Some(terms) if !terms.is_empty() => terms,
        _ => DEFAULT_SEARCH_TERMS.iter().map(|t| t.to_string()).collect(),
    };

    info!("Collection requested for {} terms (max {max_searches})", terms.len());

    match state.orchestrator.collect(terms.as_slice(), max_searches).await {
        Ok(report) => Ok(Json(CollectResponse {
            message: if report.stopped_by_quota {
                "Collection stopped at the quota limit".to_string()
            } else {
                "Videos collected with quota management".to_string()
            },
            videos_processed: report.videos_processed,
            estimated_quota_used: report.estimated_quota_used,
            duration_ms: report.duration.as_millis() as u64,
            searches_run: report.searches_run,
            skipped: report.skipped,
            stopped_by_quota: report.stopped_by_quota,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })),
        Err(e) => {
            error!("Efficient video collection failed: {e}");
            Err(e.into())
        }
    }
}

async fn refresh_existing_videos(
    state: &State<AppState>,
) -> Result<Json<CollectResponse>, ErrorResponse> {
    match state.orchestrator.refresh(REFRESH_BATCH_LIMIT).await {
        Ok(report) => Ok(Json(CollectResponse {
            message: "Videos updated efficiently".to_string(),
            videos_processed: report.videos_refreshed,
            estimated_quota_used: report.quota_used,
            duration_ms: report.duration.as_millis() as u64,
            searches_run: 0,
            skipped: report.skipped,
            stopped_by_quota: false,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })),
        Err(e) => {
            error!("Video refresh failed: {e}");
            Err(e.into())
        }
    }
}
