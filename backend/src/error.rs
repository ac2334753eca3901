use thiserror::Error;

use crate::models::VideoRecord;
use crate::services::traits::ProviderPage;

/// Failures reported by a [`SearchProvider`](crate::services::traits::SearchProvider).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited by provider: {0}")]
    RateLimited(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("invalid search term: {0}")]
    InvalidTerm(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request rejected by provider: {0}")]
    Rejected(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Transient failures are worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Unavailable(_)
        )
    }
}

/// A provider call that failed, with whatever it was billed for and had
/// fetched before failing.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{error}")]
pub struct ProviderFailure {
    pub error: ProviderError,
    pub units_spent: u32,
    pub videos: Vec<VideoRecord>,
    /// Ids whose details were never fetched. Passing them to
    /// `fetch_videos` resumes the call without repeating billed requests.
    pub pending_ids: Vec<String>,
}

impl ProviderFailure {
    pub fn is_transient(&self) -> bool {
        self.error.is_transient()
    }

    /// Adds units billed by earlier requests of the same call.
    pub fn billed_before(mut self, units: u32) -> Self {
        self.units_spent = self.units_spent.saturating_add(units);
        self
    }

    /// Splits into the error and the partial page that was already paid for.
    pub fn into_parts(self) -> (ProviderError, ProviderPage) {
        (
            self.error,
            ProviderPage {
                videos: self.videos,
                units_spent: self.units_spent,
            },
        )
    }
}

impl From<ProviderError> for ProviderFailure {
    fn from(error: ProviderError) -> Self {
        ProviderFailure {
            error,
            units_spent: 0,
            videos: Vec::new(),
            pending_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("write failed for {id}: {reason}")]
    WriteFailed { id: String, reason: String },
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// Hard failures of a collection or rescan call. Per-term and per-channel
/// failures never surface here, they are reported as skips instead.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("quota exhausted: {required} units required, {remaining} remaining")]
    QuotaExhausted { required: u32, remaining: u32 },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limits_and_outages_are_transient() {
        assert!(ProviderError::RateLimited("429".into()).is_transient());
        assert!(ProviderError::Unavailable("503".into()).is_transient());
        assert!(!ProviderError::InvalidTerm("".into()).is_transient());
        assert!(!ProviderError::NotFound("UC123".into()).is_transient());
        assert!(!ProviderError::Malformed("items".into()).is_transient());
    }

    #[test]
    fn failures_keep_what_was_billed() {
        let failure = ProviderFailure::from(ProviderError::Unavailable("videos".into()))
            .billed_before(100);

        assert!(failure.is_transient());
        assert_eq!(failure.to_string(), "provider unavailable: videos");
        let (error, partial) = failure.into_parts();
        assert_eq!(error, ProviderError::Unavailable("videos".into()));
        assert_eq!(partial.units_spent, 100);
        assert!(partial.videos.is_empty());
    }

    #[test]
    fn quota_error_names_the_shortfall() {
        let err = CollectError::QuotaExhausted {
            required: 101,
            remaining: 40,
        };
        assert_eq!(
            err.to_string(),
            "quota exhausted: 101 units required, 40 remaining"
        );
    }
}
