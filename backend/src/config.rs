use crate::models::ChannelRecord;
use crate::services::elasticsearch_service::{
    create_es_indices, ElasticChannelRepository, ElasticVideoRepository,
};
use crate::services::memory_store::{InMemoryChannelRepository, InMemoryVideoRepository};
use crate::services::traits::{ChannelRepository, VideoRepository};
use crate::services::youtube::{YouTubeConfig, YouTubeProvider, DEFAULT_API_URL};
use crate::services::{CollectionOrchestrator, OrchestratorSettings, QuotaConfig, QuotaLedger};
use crate::utils::extract_channel_id;
use crate::AppState;
use anyhow::{Context, Result};
use elasticsearch::{
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    Elasticsearch,
};
use env_logger::Builder;
use lazy_static::lazy_static;
use log::{error, info, warn, LevelFilter};
use rocket::http::Method;
use rocket_cors::{AllowedHeaders, AllowedOrigins, CorsOptions};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

lazy_static! {
    pub static ref YOUTUBE_API_URL: String =
        env::var("YOUTUBE_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
    pub static ref ELASTICSEARCH_URL: String =
        env::var("ELASTICSEARCH_URL").unwrap_or_else(|_| "http://localhost:9200".to_string());
    pub static ref STORAGE_BACKEND: String =
        env::var("STORAGE_BACKEND").unwrap_or_else(|_| "elasticsearch".to_string());
    pub static ref DAILY_QUOTA_LIMIT: u32 = env_or("DAILY_QUOTA_LIMIT", 10_000);
    pub static ref QUOTA_RESET_HOUR_UTC: u32 = env_or("QUOTA_RESET_HOUR_UTC", 8);
    pub static ref RESERVATION_TIMEOUT_SECS: i64 = env_or("RESERVATION_TIMEOUT_SECS", 300);
    pub static ref SEARCH_MAX_RESULTS: u32 = env_or("SEARCH_MAX_RESULTS", 25);
    pub static ref SEARCH_WINDOW_DAYS: i64 = env_or("SEARCH_WINDOW_DAYS", 30);
    pub static ref SEARCH_PAUSE_MS: u64 = env_or("SEARCH_PAUSE_MS", 1000);
    pub static ref RETRY_MAX_ATTEMPTS: u32 = env_or("RETRY_MAX_ATTEMPTS", 3);
    pub static ref RETRY_BASE_DELAY_MS: u64 = env_or("RETRY_BASE_DELAY_MS", 500);
    pub static ref RETRY_MAX_DELAY_MS: u64 = env_or("RETRY_MAX_DELAY_MS", 30_000);
    pub static ref RESCAN_SCHEDULE: String =
        env::var("RESCAN_SCHEDULE").unwrap_or_else(|_| "0 */10 * * * *".to_string());
    pub static ref RESCAN_BATCH_LIMIT: usize = env_or("RESCAN_BATCH_LIMIT", 10);
    pub static ref RESCAN_MIN_INTERVAL_HOURS: i64 = env_or("RESCAN_MIN_INTERVAL_HOURS", 12);
    pub static ref SEED_CHANNEL_IDS: Vec<String> = env::var("SEED_CHANNEL_IDS")
        .map(|ids| {
            ids.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    pub static ref CORS_ALLOWED_ORIGIN: String =
        env::var("CORS_ALLOWED_ORIGIN").unwrap_or_else(|_| "http://localhost:8080".to_string());
}

const SWEEP_SCHEDULE: &str = "0 * * * * *";

pub fn init_logger() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
    info!("Starting video collector backend...");
}

pub fn load_environment() {
    dotenv::dotenv().ok();
}

pub fn create_elasticsearch_client() -> Result<Elasticsearch> {
    let es_url = &*ELASTICSEARCH_URL;
    info!("Connecting to Elasticsearch at: {es_url}");

    let transport =
        TransportBuilder::new(SingleNodeConnectionPool::new(es_url.parse()?)).build()?;

    Ok(Elasticsearch::new(transport))
}

pub fn quota_config() -> QuotaConfig {
    QuotaConfig {
        daily_cap: *DAILY_QUOTA_LIMIT,
        reset_hour_utc: (*QUOTA_RESET_HOUR_UTC).min(23),
        reservation_timeout: chrono::Duration::seconds(*RESERVATION_TIMEOUT_SECS),
    }
}

pub fn orchestrator_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        max_attempts: *RETRY_MAX_ATTEMPTS,
        retry_base_delay: Duration::from_millis(*RETRY_BASE_DELAY_MS),
        retry_max_delay: Duration::from_millis(*RETRY_MAX_DELAY_MS),
        search_pause: Duration::from_millis(*SEARCH_PAUSE_MS),
        min_recheck_interval: chrono::Duration::hours(*RESCAN_MIN_INTERVAL_HOURS),
        ..OrchestratorSettings::default()
    }
}

pub fn youtube_config() -> Result<YouTubeConfig> {
    let api_key = env::var("YOUTUBE_API_KEY")
        .context("YOUTUBE_API_KEY environment variable must be set")?;
    Ok(YouTubeConfig {
        base_url: YOUTUBE_API_URL.clone(),
        search_max_results: *SEARCH_MAX_RESULTS,
        search_window_days: *SEARCH_WINDOW_DAYS,
        ..YouTubeConfig::new(api_key)
    })
}

type Repositories = (Arc<dyn VideoRepository>, Arc<dyn ChannelRepository>);

pub async fn create_repositories() -> Result<Repositories> {
    match STORAGE_BACKEND.as_str() {
        "memory" => {
            warn!("Using in-memory storage, collected videos are lost on restart");
            let videos: Arc<dyn VideoRepository> = Arc::new(InMemoryVideoRepository::new());
            let channels: Arc<dyn ChannelRepository> = Arc::new(InMemoryChannelRepository::new());
            Ok((videos, channels))
        }
        "elasticsearch" => {
            let es_client = create_elasticsearch_client()?;
            create_es_indices(&es_client).await;
            let videos: Arc<dyn VideoRepository> =
                Arc::new(ElasticVideoRepository::new(es_client.clone()));
            let channels: Arc<dyn ChannelRepository> =
                Arc::new(ElasticChannelRepository::new(es_client));
            Ok((videos, channels))
        }
        other => anyhow::bail!("Unknown STORAGE_BACKEND '{other}'"),
    }
}

pub async fn seed_channels(channels: &dyn ChannelRepository, inputs: &[String]) {
    for input in inputs {
        let Some(channel_id) = extract_channel_id(input) else {
            warn!("Ignoring invalid seed channel '{input}'");
            continue;
        };
        match channels
            .register(ChannelRecord::new(channel_id.clone(), channel_id.clone()))
            .await
        {
            Ok(true) => info!("Seeded channel {channel_id}"),
            Ok(false) => {}
            Err(e) => error!("Failed to seed channel {channel_id}: {e}"),
        }
    }
}

pub async fn setup_rescan_scheduler(
    orchestrator: Arc<CollectionOrchestrator>,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let rescan_limit = *RESCAN_BATCH_LIMIT;

    let rescan_orchestrator = orchestrator.clone();
    let rescan_job = Job::new_async(RESCAN_SCHEDULE.as_str(), move |_uuid, _l| {
        let orchestrator = rescan_orchestrator.clone();
        Box::pin(async move {
            info!("Running scheduled rescan of {rescan_limit} channels");
            match orchestrator.rescan(rescan_limit).await {
                Ok(report) => info!(
                    "Scheduled rescan checked {} channels, found {} new videos",
                    report.channels_checked, report.new_videos_found
                ),
                Err(e) => warn!("Scheduled rescan did not run: {e}"),
            }
        })
    })?;

    let sweep_orchestrator = orchestrator.clone();
    let sweep_job = Job::new_async(SWEEP_SCHEDULE, move |_uuid, _l| {
        let orchestrator = sweep_orchestrator.clone();
        Box::pin(async move {
            let expired = orchestrator.ledger().sweep_expired();
            if expired > 0 {
                warn!("Released {expired} expired quota reservations");
            }
        })
    })?;

    scheduler.add(rescan_job).await?;
    scheduler.add(sweep_job).await?;
    scheduler.start().await?;
    info!("Rescan scheduler started ({}).", RESCAN_SCHEDULE.as_str());

    Ok(scheduler)
}

pub async fn create_app_state() -> Result<AppState> {
    let provider = Arc::new(YouTubeProvider::new(youtube_config()?));
    let (videos, channels) = create_repositories().await?;

    seed_channels(channels.as_ref(), &SEED_CHANNEL_IDS).await;

    let orchestrator = Arc::new(CollectionOrchestrator::new(
        QuotaLedger::new(quota_config()),
        provider,
        videos,
        channels,
        orchestrator_settings(),
    ));

    let scheduler = setup_rescan_scheduler(orchestrator.clone()).await?;

    let state = AppState::new(orchestrator);
    *state.scheduler.lock().await = Some(scheduler);
    Ok(state)
}

pub fn create_cors() -> Result<rocket_cors::Cors> {
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::some_exact(&[CORS_ALLOWED_ORIGIN.as_str()]))
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Delete, Method::Options]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allowed_headers(AllowedHeaders::some(&["Accept", "Content-Type"]))
        .allow_credentials(true)
        .to_cors()
        .map_err(|e| anyhow::anyhow!("Failed to create CORS options: {}", e))?;

    Ok(cors)
}
