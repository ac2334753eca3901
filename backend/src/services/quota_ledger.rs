//! Daily quota accounting for provider calls.
//!
//! Every external call is bracketed by a reservation: [`QuotaLedger::reserve`]
//! holds the estimated cost, and the returned [`PendingCharge`] is either
//! committed with the actual cost once the call has completed or released.
//! Pending charges that are dropped release themselves, and charges that are
//! never settled expire after the configured timeout.

use crate::models::{OperationBreakdown, QuotaUsage};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Provider operations and their fixed unit costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOperation {
    Search,
    VideoList,
    ChannelList,
    PlaylistItems,
}

/// Ids per `videos.list` request.
pub const VIDEO_LIST_BATCH: u32 = 50;

impl QuotaOperation {
    pub const fn unit_cost(self) -> u32 {
        match self {
            QuotaOperation::Search => 100,
            QuotaOperation::VideoList => 1,
            QuotaOperation::ChannelList => 1,
            QuotaOperation::PlaylistItems => 1,
        }
    }

    /// Cost of `count` operations of this kind. Video lookups are billed per
    /// batch of up to fifty ids.
    pub fn batch_cost(self, count: u32) -> u32 {
        match self {
            QuotaOperation::VideoList => count.div_ceil(VIDEO_LIST_BATCH) * self.unit_cost(),
            _ => count.saturating_mul(self.unit_cost()),
        }
    }
}

/// Worst-case cost of one keyword search: the search itself plus one batch of
/// video details.
pub const SEARCH_ESTIMATE: u32 =
    QuotaOperation::Search.unit_cost() + QuotaOperation::VideoList.unit_cost();

/// Worst-case cost of listing a channel's recent uploads.
pub const CHANNEL_UPLOADS_ESTIMATE: u32 = QuotaOperation::ChannelList.unit_cost()
    + QuotaOperation::PlaylistItems.unit_cost()
    + QuotaOperation::VideoList.unit_cost();

/// What a charge is booked as in the per-operation breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Search,
    ChannelCheck,
    VideoUpdate,
}

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub daily_cap: u32,
    /// Hour of the day (UTC) at which the provider resets the budget.
    pub reset_hour_utc: u32,
    pub reservation_timeout: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        QuotaConfig {
            daily_cap: 10_000,
            reset_hour_utc: 8,
            reservation_timeout: Duration::minutes(5),
        }
    }
}

#[derive(Debug)]
struct PendingEntry {
    cost: u32,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct LedgerState {
    units_used: u32,
    window_reset_at: DateTime<Utc>,
    pending: HashMap<u64, PendingEntry>,
    next_id: u64,
    operations: OperationBreakdown,
}

impl LedgerState {
    fn pending_units(&self) -> u32 {
        self.pending
            .values()
            .fold(0u32, |sum, entry| sum.saturating_add(entry.cost))
    }

    fn remaining(&self, daily_cap: u32) -> u32 {
        daily_cap
            .saturating_sub(self.units_used)
            .saturating_sub(self.pending_units())
    }
}

struct Shared {
    config: QuotaConfig,
    clock: Clock,
    state: Mutex<LedgerState>,
}

impl Shared {
    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Locks the state after rolling the window over and dropping expired
    /// reservations.
    fn lock_at(&self, now: DateTime<Utc>) -> MutexGuard<'_, LedgerState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if now >= state.window_reset_at {
            info!(
                "Quota window reset: {} units used in the previous window",
                state.units_used
            );
            state.units_used = 0;
            state.operations = OperationBreakdown::default();
            state.window_reset_at = next_reset_after(now, self.config.reset_hour_utc);
        }

        let before = state.pending.len();
        state.pending.retain(|id, entry| {
            let keep = entry.expires_at > now;
            if !keep {
                warn!(
                    "Reservation {id} of {} units expired uncommitted, releasing",
                    entry.cost
                );
            }
            keep
        });
        let expired = before - state.pending.len();
        if expired > 0 {
            debug!("Released {expired} expired reservations");
        }

        state
    }

    fn commit(&self, id: u64, kind: UsageKind, actual_cost: u32) {
        let now = self.now();
        let mut state = self.lock_at(now);
        if state.pending.remove(&id).is_none() {
            warn!("Committing reservation {id} after it expired, charging {actual_cost} units");
        }
        state.units_used = state.units_used.saturating_add(actual_cost);
        match kind {
            UsageKind::Search => state.operations.searches += 1,
            UsageKind::ChannelCheck => state.operations.channel_checks += 1,
            UsageKind::VideoUpdate => state.operations.video_updates += 1,
        }
        debug!(
            "Committed {actual_cost} units ({} used of {})",
            state.units_used, self.config.daily_cap
        );
    }

    fn release(&self, id: u64) {
        let now = self.now();
        let mut state = self.lock_at(now);
        if let Some(entry) = state.pending.remove(&id) {
            debug!("Released reservation {id} of {} units", entry.cost);
        }
    }
}

fn next_reset_after(now: DateTime<Utc>, reset_hour_utc: u32) -> DateTime<Utc> {
    let reset_time = NaiveTime::from_hms_opt(reset_hour_utc % 24, 0, 0).unwrap_or_default();
    let today = now.date_naive().and_time(reset_time).and_utc();
    if now < today {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Outcome of a reservation attempt.
pub enum Reservation {
    Allowed(PendingCharge),
    Denied { requested: u32, remaining: u32 },
}

/// A reserved but not yet settled charge.
pub struct PendingCharge {
    shared: Arc<Shared>,
    id: u64,
    kind: UsageKind,
    settled: bool,
}

impl PendingCharge {
    /// Finalizes the charge with the cost the provider actually billed.
    pub fn commit(mut self, actual_cost: u32) {
        self.settled = true;
        self.shared.commit(self.id, self.kind, actual_cost);
    }

    /// Returns the reserved units without charging anything.
    pub fn release(mut self) {
        self.settled = true;
        self.shared.release(self.id);
    }
}

impl Drop for PendingCharge {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.release(self.id);
        }
    }
}

/// Shared, injectable quota budget. Clones refer to the same ledger.
#[derive(Clone)]
pub struct QuotaLedger {
    shared: Arc<Shared>,
}

impl QuotaLedger {
    pub fn new(config: QuotaConfig) -> Self {
        Self::with_clock(config, Arc::new(Utc::now))
    }

    pub fn with_clock(config: QuotaConfig, clock: Clock) -> Self {
        let now = clock();
        let state = LedgerState {
            units_used: 0,
            window_reset_at: next_reset_after(now, config.reset_hour_utc),
            pending: HashMap::new(),
            next_id: 1,
            operations: OperationBreakdown::default(),
        };
        QuotaLedger {
            shared: Arc::new(Shared {
                config,
                clock,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn daily_cap(&self) -> u32 {
        self.shared.config.daily_cap
    }

    /// Holds `cost` units if the remaining budget can absorb them.
    pub fn reserve(&self, kind: UsageKind, cost: u32) -> Reservation {
        let now = self.shared.now();
        let mut state = self.shared.lock_at(now);
        let remaining = state.remaining(self.shared.config.daily_cap);

        if remaining < cost {
            debug!("Denied reservation of {cost} units, {remaining} remaining");
            return Reservation::Denied {
                requested: cost,
                remaining,
            };
        }

        let id = state.next_id;
        state.next_id += 1;
        state.pending.insert(
            id,
            PendingEntry {
                cost,
                expires_at: now + self.shared.config.reservation_timeout,
            },
        );
        drop(state);

        Reservation::Allowed(PendingCharge {
            shared: self.shared.clone(),
            id,
            kind,
            settled: false,
        })
    }

    /// Units still available, net of committed and pending charges.
    pub fn remaining(&self) -> u32 {
        let now = self.shared.now();
        let state = self.shared.lock_at(now);
        state.remaining(self.shared.config.daily_cap)
    }

    pub fn units_used(&self) -> u32 {
        let now = self.shared.now();
        self.shared.lock_at(now).units_used
    }

    pub fn reset_at(&self) -> DateTime<Utc> {
        let now = self.shared.now();
        self.shared.lock_at(now).window_reset_at
    }

    /// Drops reservations whose timeout has passed. Returns how many were
    /// released.
    pub fn sweep_expired(&self) -> usize {
        let now = self.shared.now();
        let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.pending.len();
        state.pending.retain(|_, entry| entry.expires_at > now);
        before - state.pending.len()
    }

    pub fn usage(&self) -> QuotaUsage {
        let now = self.shared.now();
        let state = self.shared.lock_at(now);
        let daily_cap = self.shared.config.daily_cap;
        QuotaUsage {
            date: now.format("%Y-%m-%d").to_string(),
            daily_cap,
            units_used: state.units_used,
            units_pending: state.pending_units(),
            units_remaining: state.remaining(daily_cap),
            reset_time: Some(state.window_reset_at.to_rfc3339()),
            operations: state.operations,
        }
    }
}
