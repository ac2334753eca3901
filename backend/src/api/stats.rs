use crate::models::{ErrorResponse, QuotaResponse, StatsResponse};
use crate::services::quota_ledger::{QuotaOperation, SEARCH_ESTIMATE};
use crate::services::stats_service::category_shares;
use crate::AppState;
use rocket::serde::json::Json;
use rocket::{get, State};

#[get("/stats")]
pub async fn get_stats(state: &State<AppState>) -> Result<Json<StatsResponse>, ErrorResponse> {
    let snapshot = state.stats.snapshot().await?;

    Ok(Json(StatsResponse {
        total_videos: snapshot.total_videos,
        total_channels: snapshot.total_channels,
        category_shares: category_shares(&snapshot.categories),
        categories: snapshot.categories,
        last_updated: chrono::Utc::now().to_rfc3339(),
    }))
}

#[get("/quota/usage")]
pub async fn get_quota_usage(
    state: &State<AppState>,
) -> Result<Json<QuotaResponse>, ErrorResponse> {
    let ledger = state.orchestrator.ledger();
    let usage = ledger.usage();
    let efficiency = state.stats.efficiency(ledger).await?;
    let percentage = f64::from(usage.units_used) * 100.0 / f64::from(usage.daily_cap.max(1));

    Ok(Json(QuotaResponse {
        date: usage.date,
        units_used: usage.units_used,
        units_remaining: usage.units_remaining,
        units_pending: usage.units_pending,
        percentage_used: format!("{percentage:.2}%"),
        reset_time: usage.reset_time,
        operations: usage.operations,
        can_perform_search: usage.units_remaining >= SEARCH_ESTIMATE,
        can_perform_batch_update: usage.units_remaining >= QuotaOperation::VideoList.unit_cost(),
        efficiency,
    }))
}
