use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::RepositoryError;
use crate::models::{CategoryShare, StatsSnapshot};
use crate::services::quota_ledger::QuotaLedger;
use crate::services::traits::VideoRepository;

/// Read-only aggregation over the video store.
#[derive(Clone)]
pub struct StatsAggregator {
    videos: Arc<dyn VideoRepository>,
}

impl StatsAggregator {
    pub fn new(videos: Arc<dyn VideoRepository>) -> Self {
        StatsAggregator { videos }
    }

    pub async fn snapshot(&self) -> Result<StatsSnapshot, RepositoryError> {
        Ok(StatsSnapshot {
            total_videos: self.videos.count_all().await?,
            total_channels: self.videos.count_channels().await?,
            categories: self.videos.count_by_category().await?,
        })
    }

    /// Stored videos per quota unit spent in the current window.
    pub async fn efficiency(&self, ledger: &QuotaLedger) -> Result<f64, RepositoryError> {
        let total = self.videos.count_all().await?;
        Ok(efficiency_ratio(total, ledger.units_used()))
    }
}

pub fn efficiency_ratio(total_videos: u64, units_used: u32) -> f64 {
    total_videos as f64 / f64::from(units_used.max(1))
}

/// Percent share of each category, largest first. Ties keep name order.
pub fn category_shares(categories: &BTreeMap<String, u64>) -> Vec<CategoryShare> {
    let total: u64 = categories.values().sum();
    let mut shares: Vec<CategoryShare> = categories
        .iter()
        .map(|(category, &count)| CategoryShare {
            category: category.clone(),
            count,
            percentage: if total == 0 {
                0.0
            } else {
                count as f64 * 100.0 / total as f64
            },
        })
        .collect();
    shares.sort_by(|a, b| b.count.cmp(&a.count));
    shares
}
