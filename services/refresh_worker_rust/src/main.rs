//! Refresh worker service.
//!
//! Hosts the worker pool and three driving loops: the activity-gated
//! scheduler, the periodic health check, and a Redis trigger listener for
//! on-demand refreshes, cache clears and session heartbeats.

use anyhow::Result;
use dotenv::dotenv;
use futures_util::StreamExt;
use oddsedge_core::jobs::JobEnvelope;
use oddsedge_core::{ActivityTracker, AppContext, CoreConfig, WorkerPool};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const TRIGGER_CHANNEL: &str = "ev_jobs:trigger";

/// Commands accepted on the trigger channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Trigger {
    /// Run a refresh now. With a batch_id the result is cached for polling.
    Refresh {
        #[serde(default)]
        batch_id: Option<String>,
    },
    /// Clear the opportunity cache keys. `force` bypasses the rate limiter.
    ClearCache {
        #[serde(default)]
        force: bool,
    },
    /// Dashboard session heartbeat.
    Heartbeat {
        session_id: String,
        #[serde(default)]
        user_id: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    info!(host, "starting refresh worker service");

    let config = CoreConfig::from_env();
    let ctx = AppContext::bootstrap(config.clone()).await?;
    let pool = Arc::new(WorkerPool::start(ctx.clone(), config.worker_count));

    // Cold start: serve fresh data on the first access after downtime.
    if let Some(job) = refresh_for_stale_access(&ctx.activity) {
        info!("no recent refresh on record, scheduling startup refresh");
        if let Err(e) = pool.submit(job) {
            error!(error = %e, "startup refresh submission failed");
        }
    }

    let mut tasks = Vec::new();

    // 1. Activity-gated scheduler
    {
        let ctx = ctx.clone();
        let pool = pool.clone();
        let tick = config.scheduler_tick_secs;
        tasks.push(tokio::spawn(async move {
            info!(tick_secs = tick, "scheduler loop started");
            loop {
                tokio::time::sleep(Duration::from_secs(tick)).await;
                if ctx.activity.should_auto_refresh() {
                    info!("active sessions present and interval elapsed, scheduling refresh");
                    if let Err(e) = pool.submit(JobEnvelope::refresh()) {
                        warn!(error = %e, "scheduled refresh submission failed");
                    }
                }
            }
        }));
    }

    // 2. Health check loop
    {
        let ctx = ctx.clone();
        let pool = pool.clone();
        let interval = config.health_check_interval_secs;
        tasks.push(tokio::spawn(async move {
            info!(interval_secs = interval, "health check loop started");
            loop {
                if let Err(e) = pool.submit(JobEnvelope::health_check()) {
                    warn!(error = %e, "health check submission failed");
                }
                oddsedge_core::jobs::refresh::mirror_activity(&ctx).await;
                tokio::time::sleep(Duration::from_secs(interval)).await;
            }
        }));
    }

    // 3. Trigger listener
    {
        let ctx = ctx.clone();
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match ctx.cache.subscribe(TRIGGER_CHANNEL).await {
                    Ok(mut pubsub) => {
                        info!(channel = TRIGGER_CHANNEL, "trigger listener started");
                        let mut stream = pubsub.on_message();
                        while let Some(msg) = stream.next().await {
                            let Ok(payload) = msg.get_payload::<String>() else {
                                continue;
                            };
                            match serde_json::from_str::<Trigger>(&payload) {
                                Ok(trigger) => handle_trigger(&ctx, &pool, trigger).await,
                                Err(e) => {
                                    warn!(error = %e, payload, "unrecognized trigger message");
                                }
                            }
                        }
                        warn!("trigger stream ended, reconnecting");
                    }
                    Err(e) => {
                        error!(error = %format!("{e:#}"), "trigger subscription failed, retrying");
                    }
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }));
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "unable to listen for shutdown signal"),
    }

    for task in &tasks {
        task.abort();
    }
    pool.shutdown().await;
    ctx.shutdown().await;
    info!("refresh worker stopped");
    Ok(())
}

async fn handle_trigger(ctx: &Arc<AppContext>, pool: &Arc<WorkerPool>, trigger: Trigger) {
    match trigger {
        Trigger::Refresh { batch_id } => {
            let job = match batch_id.as_deref() {
                Some(batch_id) => {
                    info!(batch_id, "on-demand batch refresh requested");
                    JobEnvelope::batch(batch_id)
                }
                None => {
                    info!("on-demand refresh requested");
                    JobEnvelope::refresh()
                }
            };
            if let Err(e) = pool.submit(job) {
                warn!(error = %e, "trigger refresh submission failed");
            }
        }
        Trigger::ClearCache { force } => match ctx.cache.invalidate_opportunities(force).await {
            Ok(true) => info!(force, "opportunity cache cleared"),
            Ok(false) => warn!("cache clear rejected by rate limiter"),
            Err(e) => warn!(error = %format!("{e:#}"), "cache clear failed"),
        },
        Trigger::Heartbeat {
            session_id,
            user_id,
        } => {
            ctx.activity.track_access(user_id, &session_id);
            if let Err(e) = ctx.cache.record_heartbeat(&session_id, user_id).await {
                warn!(error = %format!("{e:#}"), "heartbeat mirror failed");
            }
            if let Some(job) = refresh_for_stale_access(&ctx.activity) {
                info!("data stale on access, scheduling refresh");
                if let Err(e) = pool.submit(job) {
                    warn!(error = %e, "on-access refresh submission failed");
                }
            }
        }
    }
}

/// The first access after the staleness threshold refreshes immediately
/// instead of waiting for the next scheduler tick.
fn refresh_for_stale_access(activity: &ActivityTracker) -> Option<JobEnvelope> {
    activity.should_refresh_on_load().then(JobEnvelope::refresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oddsedge_core::activity::ActivityConfig;
    use oddsedge_core::jobs::JobKind;

    #[test]
    fn test_stale_access_schedules_refresh() {
        let activity = ActivityTracker::new(ActivityConfig::default());

        // No refresh on record yet: the first access refreshes
        let job = refresh_for_stale_access(&activity).expect("refresh job");
        assert!(matches!(job.kind, JobKind::Refresh { batch_id: None }));

        // Fresh data: heartbeats only record the session
        activity.record_refresh();
        assert!(refresh_for_stale_access(&activity).is_none());
    }

    #[test]
    fn test_trigger_decoding() {
        let t: Trigger =
            serde_json::from_str(r#"{"action":"heartbeat","session_id":"s1","user_id":7}"#)
                .unwrap();
        assert!(matches!(t, Trigger::Heartbeat { user_id: Some(7), .. }));

        let t: Trigger = serde_json::from_str(r#"{"action":"refresh","batch_id":"b1"}"#).unwrap();
        assert!(matches!(t, Trigger::Refresh { batch_id: Some(_) }));

        let t: Trigger = serde_json::from_str(r#"{"action":"clear_cache","force":true}"#).unwrap();
        assert!(matches!(t, Trigger::ClearCache { force: true }));
    }
}
