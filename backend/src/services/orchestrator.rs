//! Term-based collection and channel rescans under the daily quota.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::Utc;
use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{CollectError, ProviderError, ProviderFailure};
use crate::models::{
    ChannelRecord, CollectionReport, RefreshReport, RescanReport, SkipKind, SkippedWork,
    UpsertOutcome, VideoRecord,
};
use crate::services::channel_planner::ChannelRescanPlanner;
use crate::services::quota_ledger::{
    PendingCharge, QuotaLedger, QuotaOperation, Reservation, UsageKind,
    CHANNEL_UPLOADS_ESTIMATE, SEARCH_ESTIMATE,
};
use crate::services::term_dedup::TermDeduplicator;
use crate::services::traits::{
    ChannelRepository, ProviderPage, SearchProvider, VideoRepository,
};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub search_estimate: u32,
    pub channel_estimate: u32,
    /// Total attempts per term or channel, first call included.
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    /// Upper bound for a single backoff delay.
    pub retry_max_delay: Duration,
    /// Pause between consecutive searches of one collection.
    pub search_pause: Duration,
    /// Channels contributing at least this many videos to one collection are
    /// registered for rescans.
    pub discovery_min_videos: usize,
    pub min_recheck_interval: chrono::Duration,
    /// Stored videos not refreshed for this long are refresh candidates.
    pub refresh_stale_after: chrono::Duration,
    /// Videos published within this window are always refresh candidates.
    pub refresh_recent_window: chrono::Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings {
            search_estimate: SEARCH_ESTIMATE,
            channel_estimate: CHANNEL_UPLOADS_ESTIMATE,
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            search_pause: Duration::from_secs(1),
            discovery_min_videos: 2,
            min_recheck_interval: chrono::Duration::hours(12),
            refresh_stale_after: chrono::Duration::hours(2),
            refresh_recent_window: chrono::Duration::days(7),
        }
    }
}

pub struct CollectionOrchestrator {
    ledger: QuotaLedger,
    provider: Arc<dyn SearchProvider>,
    videos: Arc<dyn VideoRepository>,
    channels: Arc<dyn ChannelRepository>,
    planner: ChannelRescanPlanner,
    settings: OrchestratorSettings,
}

impl CollectionOrchestrator {
    pub fn new(
        ledger: QuotaLedger,
        provider: Arc<dyn SearchProvider>,
        videos: Arc<dyn VideoRepository>,
        channels: Arc<dyn ChannelRepository>,
        settings: OrchestratorSettings,
    ) -> Self {
        let planner = ChannelRescanPlanner::new(channels.clone(), settings.min_recheck_interval);
        CollectionOrchestrator {
            ledger,
            provider,
            videos,
            channels,
            planner,
            settings,
        }
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn videos(&self) -> Arc<dyn VideoRepository> {
        self.videos.clone()
    }

    pub fn channels(&self) -> Arc<dyn ChannelRepository> {
        self.channels.clone()
    }

    pub fn planner(&self) -> &ChannelRescanPlanner {
        &self.planner
    }

    /// Searches at most `max_searches` distinct terms and stores what they
    /// return. Fails only when the very first reservation is denied.
    pub async fn collect<S: AsRef<str>>(
        &self,
        terms: &[S],
        max_searches: usize,
    ) -> Result<CollectionReport, CollectError> {
        let started = Instant::now();
        let mut report = CollectionReport::default();

        if terms.is_empty() || max_searches == 0 {
            report.duration = started.elapsed();
            return Ok(report);
        }

        let selected: Vec<String> = TermDeduplicator::filter(terms, &HashSet::new())
            .into_iter()
            .take(max_searches)
            .collect();

        info!(
            "Starting collection of {} terms via {}",
            selected.len(),
            self.provider.name()
        );

        let mut channel_hits: HashMap<String, (String, usize)> = HashMap::new();

        for (index, term) in selected.iter().enumerate() {
            let charge = match self
                .ledger
                .reserve(UsageKind::Search, self.settings.search_estimate)
            {
                Reservation::Allowed(charge) => charge,
                Reservation::Denied {
                    requested,
                    remaining,
                } => {
                    if index == 0 {
                        warn!("Quota exhausted before collection started ({remaining} units left)");
                        return Err(CollectError::QuotaExhausted {
                            required: requested,
                            remaining,
                        });
                    }
                    warn!(
                        "Quota exhausted after {index} terms, {} terms left unsearched",
                        selected.len() - index
                    );
                    report.stopped_by_quota = true;
                    report
                        .skipped
                        .extend(selected[index..].iter().map(|term| SkippedWork {
                            target: term.clone(),
                            kind: SkipKind::QuotaDenied,
                            reason: format!("{requested} units required, {remaining} remaining"),
                        }));
                    break;
                }
            };

            if index > 0 && !self.settings.search_pause.is_zero() {
                tokio::time::sleep(self.settings.search_pause).await;
            }

            info!("Collecting videos for: {term}");
            let (page, failure) =
                split_outcome(self.with_retry(term, || self.provider.search(term)).await);
            settle(charge, page.units_spent, failure.is_some());
            report.estimated_quota_used += u64::from(page.units_spent);
            match &failure {
                None => report.searches_run += 1,
                Some(e) => report.skipped.push(skip_for(term, e)),
            }

            if failure.is_none() && page.videos.is_empty() {
                info!("Search for '{term}' returned no videos");
            }

            for stored in self.store_videos(page.videos, &mut report.skipped).await {
                report.videos_processed += 1;
                if !stored.channel_id.is_empty() {
                    channel_hits
                        .entry(stored.channel_id)
                        .or_insert_with(|| (stored.channel_title, 0))
                        .1 += 1;
                }
            }
        }

        self.register_discovered_channels(channel_hits).await;

        report.duration = started.elapsed();
        info!(
            "Collection finished: {} videos from {} searches, {} units, {} skipped in {:?}",
            report.videos_processed,
            report.searches_run,
            report.estimated_quota_used,
            report.skipped.len(),
            report.duration
        );
        Ok(report)
    }

    /// Polls up to `limit` of the stalest known channels for recent uploads.
    pub async fn rescan(&self, limit: usize) -> Result<RescanReport, CollectError> {
        let started = Instant::now();
        let mut report = RescanReport::default();

        let claims = self.planner.plan(limit).await?;

        let mut claims = claims.into_iter().enumerate();
        while let Some((index, claim)) = claims.next() {
            let channel_id = claim.channel_id().to_string();

            let charge = match self
                .ledger
                .reserve(UsageKind::ChannelCheck, self.settings.channel_estimate)
            {
                Reservation::Allowed(charge) => charge,
                Reservation::Denied {
                    requested,
                    remaining,
                } => {
                    if index == 0 {
                        warn!("Quota limit reached, skipping channel check");
                        return Err(CollectError::QuotaExhausted {
                            required: requested,
                            remaining,
                        });
                    }
                    report.stopped_by_quota = true;
                    let reason = format!("{requested} units required, {remaining} remaining");
                    report.skipped.push(SkippedWork {
                        target: channel_id,
                        kind: SkipKind::QuotaDenied,
                        reason: reason.clone(),
                    });
                    report
                        .skipped
                        .extend(claims.by_ref().map(|(_, rest)| SkippedWork {
                            target: rest.channel_id().to_string(),
                            kind: SkipKind::QuotaDenied,
                            reason: reason.clone(),
                        }));
                    break;
                }
            };

            info!("Checking channel: {} ({channel_id})", claim.title());
            let (page, failure) = split_outcome(
                self.with_retry(&channel_id, || self.provider.list_channel_uploads(&channel_id))
                    .await,
            );
            settle(charge, page.units_spent, failure.is_some());
            report.quota_used += u64::from(page.units_spent);
            match &failure {
                None => report.channels_checked += 1,
                Some(e) => report.skipped.push(skip_for(&channel_id, e)),
            }

            let mut inserted = 0;
            for stored in self.store_videos(page.videos, &mut report.skipped).await {
                report.videos_processed += 1;
                if stored.outcome == UpsertOutcome::Inserted {
                    inserted += 1;
                }
            }
            report.new_videos_found += inserted;

            // A failing channel still rotates to the back of the queue.
            if let Err(e) = claim.complete(Utc::now(), inserted).await {
                error!("Failed to mark channel {channel_id} as checked: {e}");
            }
        }

        report.quota_remaining = self.ledger.remaining();
        report.duration = started.elapsed();
        info!(
            "Rescan finished: {} channels, {} new videos, {} units used, {} remaining",
            report.channels_checked,
            report.new_videos_found,
            report.quota_used,
            report.quota_remaining
        );
        Ok(report)
    }

    /// Refreshes the statistics of up to `limit` stored videos that are stale
    /// or recently published, at one unit per fifty ids.
    pub async fn refresh(&self, limit: usize) -> Result<RefreshReport, CollectError> {
        let started = Instant::now();
        let mut report = RefreshReport::default();

        let now = Utc::now();
        let ids = self
            .videos
            .refresh_candidates(
                now - self.settings.refresh_stale_after,
                now - self.settings.refresh_recent_window,
                limit,
            )
            .await?;
        if ids.is_empty() {
            info!("No videos need a refresh");
            report.duration = started.elapsed();
            return Ok(report);
        }
        report.videos_requested = ids.len();

        let estimate = QuotaOperation::VideoList.batch_cost(ids.len() as u32);
        let charge = match self.ledger.reserve(UsageKind::VideoUpdate, estimate) {
            Reservation::Allowed(charge) => charge,
            Reservation::Denied {
                requested,
                remaining,
            } => {
                warn!("Quota exhausted, skipping refresh of {} videos", ids.len());
                return Err(CollectError::QuotaExhausted {
                    required: requested,
                    remaining,
                });
            }
        };

        info!("Updating {} existing videos", ids.len());
        let (page, failure) = split_outcome(
            self.with_retry("video refresh", || self.provider.fetch_videos(&ids))
                .await,
        );
        settle(charge, page.units_spent, failure.is_some());
        report.quota_used = u64::from(page.units_spent);
        if let Some(e) = &failure {
            report.skipped.push(skip_for("video refresh", e));
        }

        let stored = self.store_videos(page.videos, &mut report.skipped).await;
        report.videos_refreshed = stored.len() as u64;

        report.duration = started.elapsed();
        info!(
            "Refresh finished: {} of {} videos updated, {} units",
            report.videos_refreshed, report.videos_requested, report.quota_used
        );
        Ok(report)
    }

    /// Upserts `videos`, recording write failures as skips.
    async fn store_videos(
        &self,
        videos: Vec<VideoRecord>,
        skipped: &mut Vec<SkippedWork>,
    ) -> Vec<StoredVideo> {
        let mut stored = Vec::with_capacity(videos.len());
        for video in videos {
            let video_id = video.video_id.clone();
            let channel_id = video.channel_id.clone();
            let channel_title = video.channel_title.clone();
            match self.videos.upsert(video).await {
                Ok(outcome) => stored.push(StoredVideo {
                    channel_id,
                    channel_title,
                    outcome,
                }),
                Err(e) => {
                    error!("Error saving video {video_id}: {e}");
                    skipped.push(SkippedWork {
                        target: video_id,
                        kind: SkipKind::RepositoryWriteFailure,
                        reason: e.to_string(),
                    });
                }
            }
        }
        stored
    }

    fn retry_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.settings.retry_base_delay)
            .with_max_interval(self.settings.retry_max_delay)
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Retries transient provider failures with exponential backoff. Units
    /// billed by failed attempts are carried into the result, and a call that
    /// failed during its detail lookups resumes with the ids still missing.
    async fn with_retry<F, Fut>(
        &self,
        target: &str,
        call: F,
    ) -> Result<ProviderPage, ProviderFailure>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ProviderPage, ProviderFailure>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut backoff = self.retry_backoff();
        let mut units_spent = 0u32;
        let mut videos = Vec::new();
        let mut pending_ids: Vec<String> = Vec::new();
        let mut attempt = 1;
        loop {
            let outcome = if pending_ids.is_empty() {
                call().await
            } else {
                self.provider.fetch_videos(&pending_ids).await
            };

            let failure = match outcome {
                Ok(mut page) => {
                    videos.append(&mut page.videos);
                    return Ok(ProviderPage {
                        videos,
                        units_spent: units_spent.saturating_add(page.units_spent),
                    });
                }
                Err(failure) => failure,
            };

            units_spent = units_spent.saturating_add(failure.units_spent);
            videos.extend(failure.videos);
            if !failure.pending_ids.is_empty() {
                pending_ids = failure.pending_ids;
            }

            let error = failure.error;
            let delay = if error.is_transient() && attempt < max_attempts {
                backoff.next_backoff()
            } else {
                None
            };
            match delay {
                Some(delay) => {
                    warn!(
                        "Attempt {attempt}/{max_attempts} for '{target}' failed: {error}, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    error!("Giving up on '{target}' after {attempt} attempts: {error}");
                    return Err(ProviderFailure {
                        error,
                        units_spent,
                        videos,
                        pending_ids,
                    });
                }
            }
        }
    }

    async fn register_discovered_channels(&self, channel_hits: HashMap<String, (String, usize)>) {
        for (channel_id, (title, hits)) in channel_hits {
            if hits < self.settings.discovery_min_videos {
                continue;
            }
            match self
                .channels
                .register(ChannelRecord::new(channel_id.clone(), title))
                .await
            {
                Ok(true) => info!("Discovered channel {channel_id} ({hits} videos)"),
                Ok(false) => {}
                Err(e) => warn!("Failed to register channel {channel_id}: {e}"),
            }
        }
    }
}

struct StoredVideo {
    channel_id: String,
    channel_title: String,
    outcome: UpsertOutcome,
}

fn split_outcome(
    outcome: Result<ProviderPage, ProviderFailure>,
) -> (ProviderPage, Option<ProviderError>) {
    match outcome {
        Ok(page) => (page, None),
        Err(failure) => {
            let (error, partial) = failure.into_parts();
            (partial, Some(error))
        }
    }
}

/// Charges what the provider billed. A failure that billed nothing only
/// returns the reservation.
fn settle(charge: PendingCharge, units_spent: u32, failed: bool) {
    if failed && units_spent == 0 {
        charge.release();
    } else {
        charge.commit(units_spent);
    }
}

fn skip_for(target: &str, error: &ProviderError) -> SkippedWork {
    SkippedWork {
        target: target.to_string(),
        kind: if error.is_transient() {
            SkipKind::ProviderTransient
        } else {
            SkipKind::ProviderPermanent
        },
        reason: error.to_string(),
    }
}
