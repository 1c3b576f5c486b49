//! Background-job orchestration primitives.
//!
//! Jobs are typed definitions submitted to a fixed worker pool through a
//! queue; the lifecycle is an explicit state machine rather than implicit
//! framework state: `Pending -> Progress(stage) -> Success | Failure`.

pub mod pool;
pub mod refresh;

pub use pool::WorkerPool;
pub use refresh::RefreshReport;

use parking_lot::RwLock;
use rand::Rng;
use rustc_hash::FxHashMap;
use std::time::Duration;
use uuid::Uuid;

/// Coarse progress checkpoints reported while a refresh runs, enough for a
/// polling client to show status without fine-grained step counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStage {
    FetchStarted,
    Processing,
    Storing,
}

impl JobStage {
    pub fn key(&self) -> &'static str {
        match self {
            JobStage::FetchStarted => "fetch_started",
            JobStage::Processing => "processing",
            JobStage::Storing => "storing",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Progress(JobStage),
    Success,
    Failure,
}

/// Retry policy with capped exponential backoff and jitter.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn refresh_default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }

    pub fn health_default() -> Self {
        Self {
            max_attempts: 2,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        }
    }

    /// Backoff before retrying after `attempt` failures (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_backoff);
        let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 4);
        exp + Duration::from_millis(jitter_ms)
    }
}

#[derive(Clone, Debug)]
pub enum JobKind {
    /// The refresh pipeline. `batch_id` is set for on-demand batch jobs
    /// polled by clients; scheduled refreshes leave it empty.
    Refresh { batch_id: Option<String> },
    HealthCheck,
}

#[derive(Clone, Debug)]
pub struct JobEnvelope {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub policy: RetryPolicy,
}

impl JobEnvelope {
    pub fn refresh() -> Self {
        Self {
            job_id: Uuid::new_v4(),
            kind: JobKind::Refresh { batch_id: None },
            policy: RetryPolicy::refresh_default(),
        }
    }

    pub fn batch(batch_id: &str) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            kind: JobKind::Refresh {
                batch_id: Some(batch_id.to_string()),
            },
            policy: RetryPolicy::refresh_default(),
        }
    }

    pub fn health_check() -> Self {
        Self {
            job_id: Uuid::new_v4(),
            kind: JobKind::HealthCheck,
            policy: RetryPolicy::health_default(),
        }
    }
}

/// In-process view of job states, for schedulers and tests. Batch jobs are
/// additionally mirrored to the cache for external polling.
#[derive(Default)]
pub struct JobRegistry {
    states: RwLock<FxHashMap<Uuid, JobState>>,
}

impl JobRegistry {
    pub fn set(&self, job_id: Uuid, state: JobState) {
        self.states.write().insert(job_id, state);
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobState> {
        self.states.read().get(&job_id).copied()
    }
}
