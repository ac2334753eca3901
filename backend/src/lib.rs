#[macro_use]
extern crate rocket;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use rocket::{Build, Rocket};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;

use crate::services::{CollectionOrchestrator, StatsAggregator};

pub struct AppState {
    pub orchestrator: Arc<CollectionOrchestrator>,
    pub stats: StatsAggregator,
    /// Held so the scheduled jobs live as long as the server. `None` when
    /// running without background jobs.
    pub scheduler: Mutex<Option<JobScheduler>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<CollectionOrchestrator>) -> Self {
        let stats = StatsAggregator::new(orchestrator.videos());
        AppState {
            orchestrator,
            stats,
            scheduler: Mutex::new(None),
        }
    }
}

pub fn build_rocket(state: AppState) -> Rocket<Build> {
    rocket::build().manage(state).mount(
        "/api",
        routes![
            api::collect_videos_efficient,
            api::check_channels,
            api::list_channels,
            api::add_channel,
            api::remove_channel,
            api::get_stats,
            api::get_quota_usage,
        ],
    )
}
