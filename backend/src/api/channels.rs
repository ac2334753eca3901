use crate::models::{ChannelRecord, ErrorResponse, NewChannel, RescanResponse};
use crate::utils::extract_channel_id;
use crate::AppState;
use log::{error, info};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};

pub const DEFAULT_CHECK_LIMIT: usize = 5;
pub const MAX_CHECK_LIMIT: usize = 50;

#[post("/channels/check?<limit>")]
pub async fn check_channels(
    limit: Option<usize>,
    state: &State<AppState>,
) -> Result<Json<RescanResponse>, ErrorResponse> {
    let limit = limit.unwrap_or(DEFAULT_CHECK_LIMIT).min(MAX_CHECK_LIMIT);

    match state.orchestrator.rescan(limit).await {
        Ok(report) => Ok(Json(RescanResponse {
            message: "Channel check completed".to_string(),
            channels_checked: report.channels_checked,
            new_videos_found: report.new_videos_found,
            quota_used: report.quota_used,
            total_quota_today: state.orchestrator.ledger().units_used(),
            quota_remaining: report.quota_remaining,
            skipped: report.skipped,
        })),
        Err(e) => {
            error!("Channel check failed: {e}");
            Err(e.into())
        }
    }
}

#[get("/channels")]
pub async fn list_channels(
    state: &State<AppState>,
) -> Result<Json<Vec<ChannelRecord>>, ErrorResponse> {
    let channels = state.orchestrator.channels().list_all().await?;
    Ok(Json(channels))
}

#[post("/channels", data = "<channel>")]
pub async fn add_channel(
    channel: Json<NewChannel>,
    state: &State<AppState>,
) -> Result<Status, ErrorResponse> {
    let channel = channel.into_inner();
    let Some(channel_id) = extract_channel_id(&channel.input) else {
        return Err(ErrorResponse::new(
            Status::BadRequest,
            "Invalid channel",
            format!("'{}' is not a channel id or channel URL", channel.input),
        ));
    };

    let title = channel.title.unwrap_or_else(|| channel_id.clone());
    let created = state
        .orchestrator
        .channels()
        .register(ChannelRecord::new(channel_id.clone(), title))
        .await?;

    if created {
        info!("Registered channel {channel_id}");
        Ok(Status::Created)
    } else {
        Ok(Status::Ok)
    }
}

#[delete("/channels/<channel_id>")]
pub async fn remove_channel(
    channel_id: &str,
    state: &State<AppState>,
) -> Result<Status, ErrorResponse> {
    if state.orchestrator.channels().remove(channel_id).await? {
        info!("Removed channel {channel_id}");
        Ok(Status::NoContent)
    } else {
        Err(ErrorResponse::new(
            Status::NotFound,
            "Unknown channel",
            format!("channel {channel_id} is not registered"),
        ))
    }
}
