//! Pipeline error taxonomy.
//!
//! Per-sport fetch errors are isolated and recorded; parse errors fall back
//! to defaults rather than failing, so processing itself has no error
//! variant; persistence errors are captured per chunk; cache errors are
//! soft. Only a cycle that fetched nothing is fatal and eligible for retry.

use crate::types::Sport;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("odds source fetch failed for {sport}: {message}")]
    SourceFetch { sport: Sport, message: String },

    #[error("all configured sports failed to fetch: {0:?}")]
    AllSportsFailed(Vec<Sport>),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("job cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether a job that failed with this error should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::AllSportsFailed(_)
                | PipelineError::SourceFetch { .. }
                | PipelineError::Persistence(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(PipelineError::AllSportsFailed(vec![Sport::NFL]).is_retryable());
        assert!(PipelineError::SourceFetch {
            sport: Sport::NBA,
            message: "timeout".into()
        }
        .is_retryable());
        assert!(!PipelineError::Cancelled.is_retryable());
        assert!(!PipelineError::Cache("down".into()).is_retryable());
    }
}
