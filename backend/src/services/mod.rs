pub mod channel_planner;
pub mod elasticsearch_service;
pub mod memory_store;
pub mod orchestrator;
pub mod quota_ledger;
pub mod stats_service;
pub mod term_dedup;
pub mod traits;
pub mod youtube;

pub use channel_planner::{ChannelClaim, ChannelRescanPlanner};
pub use orchestrator::{CollectionOrchestrator, OrchestratorSettings};
pub use quota_ledger::{QuotaConfig, QuotaLedger};
pub use stats_service::StatsAggregator;
