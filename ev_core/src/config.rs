//! Environment-driven pipeline configuration.

use crate::types::Sport;
use std::env;

#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub database_url: String,
    pub redis_url: String,
    pub odds_api_base: String,
    pub odds_api_key: String,
    /// Sports enumerated by each refresh cycle
    pub sports: Vec<Sport>,
    /// Persistence chunk size (rows per statement)
    pub write_chunk_size: usize,
    /// Heartbeat time-to-live for dashboard sessions
    pub session_ttl_secs: u64,
    /// Minimum gap between activity-gated scheduled refreshes
    pub auto_refresh_interval_secs: u64,
    /// Data considered stale after this on first access
    pub staleness_threshold_secs: u64,
    pub worker_count: usize,
    pub scheduler_tick_secs: u64,
    pub health_check_interval_secs: u64,
    /// Soft job limit: cooperative wind-down
    pub job_soft_limit_secs: u64,
    /// Hard job limit: forced termination, job retried from the top
    pub job_hard_limit_secs: u64,
    /// Cache invalidations allowed per key per minute
    pub invalidation_per_minute: u32,
    /// Result-count bound for the restricted role view
    pub restricted_view_limit: usize,
    /// Opportunities included in the pub/sub preview
    pub publish_preview_limit: usize,
    pub batch_result_ttl_secs: u64,
    pub batch_status_ttl_secs: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let sports = env::var("EV_SPORTS")
            .map(|raw| {
                raw.split(',')
                    .filter_map(|key| Sport::from_key(key.trim()))
                    .collect::<Vec<_>>()
            })
            .ok()
            .filter(|sports| !sports.is_empty())
            .unwrap_or_else(|| vec![Sport::NFL, Sport::NBA, Sport::NHL, Sport::MLB]);

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/oddsedge".to_string()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            odds_api_base: env::var("ODDS_API_BASE")
                .unwrap_or_else(|_| "https://api.the-odds-api.com/v4".to_string()),
            odds_api_key: env::var("ODDS_API_KEY").unwrap_or_default(),
            sports,
            write_chunk_size: env_parse("EV_WRITE_CHUNK_SIZE", 100),
            session_ttl_secs: env_parse("EV_SESSION_TTL_SECS", 300),
            auto_refresh_interval_secs: env_parse("EV_AUTO_REFRESH_INTERVAL_SECS", 900),
            staleness_threshold_secs: env_parse("EV_STALENESS_THRESHOLD_SECS", 1800),
            worker_count: env_parse("EV_WORKER_COUNT", 2),
            scheduler_tick_secs: env_parse("EV_SCHEDULER_TICK_SECS", 60),
            health_check_interval_secs: env_parse("EV_HEALTH_CHECK_INTERVAL_SECS", 120),
            job_soft_limit_secs: env_parse("EV_JOB_SOFT_LIMIT_SECS", 240),
            job_hard_limit_secs: env_parse("EV_JOB_HARD_LIMIT_SECS", 300),
            invalidation_per_minute: env_parse("EV_INVALIDATIONS_PER_MINUTE", 3),
            restricted_view_limit: env_parse("EV_RESTRICTED_VIEW_LIMIT", 20),
            publish_preview_limit: env_parse("EV_PUBLISH_PREVIEW_LIMIT", 10),
            batch_result_ttl_secs: env_parse("EV_BATCH_RESULT_TTL_SECS", 300),
            batch_status_ttl_secs: env_parse("EV_BATCH_STATUS_TTL_SECS", 600),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = CoreConfig::from_env();
        assert!(config.write_chunk_size > 0);
        assert!(config.auto_refresh_interval_secs < config.staleness_threshold_secs);
        assert!(config.job_soft_limit_secs <= config.job_hard_limit_secs);
        assert!(!config.sports.is_empty());
    }
}
