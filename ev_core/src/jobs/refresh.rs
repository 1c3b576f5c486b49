//! The refresh pipeline job and the health-check job.
//!
//! One refresh cycle: fetch each configured sport (failures isolated per
//! sport), compute EV, aggregate into one candidate per bet, then persist
//! and write through the cache in parallel, publish the real-time preview
//! and stamp the activity tracker. Cancellation is honored only at the
//! external-call boundaries, never mid-chunk.

use crate::aggregate::aggregate;
use crate::cache::BatchJobStatus;
use crate::context::AppContext;
use crate::db::{BatchStatus, BatchWriteReport};
use crate::error::PipelineError;
use crate::ev::EvAnalytics;
use crate::jobs::{JobRegistry, JobStage, JobState};
use crate::source::FetchStatus;
use crate::types::{RawEvent, Sport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Summary of one completed refresh cycle.
#[derive(Clone, Debug)]
pub struct RefreshReport {
    pub refresh_cycle_id: Uuid,
    pub opportunity_count: usize,
    pub offers_written: u64,
    pub offers_skipped: u64,
    pub failed_sports: Vec<Sport>,
    pub dropped_quotes: u32,
    pub analytics: EvAnalytics,
    pub write: BatchWriteReport,
    /// True when the soft time limit cut fetching short
    pub partial: bool,
}

fn cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

fn ensure_any_sport_fetched(fetched: usize, failed: &[Sport]) -> Result<(), PipelineError> {
    if fetched == 0 {
        return Err(PipelineError::AllSportsFailed(failed.to_vec()));
    }
    Ok(())
}

async fn report_stage(
    ctx: &AppContext,
    registry: &JobRegistry,
    job_id: Uuid,
    batch_id: Option<&str>,
    stage: JobStage,
) {
    registry.set(job_id, JobState::Progress(stage));
    if let Some(batch_id) = batch_id {
        let status = BatchJobStatus::processing(batch_id, stage.key());
        if let Err(e) = ctx.cache.store_batch_status(&status).await {
            warn!(batch_id, error = %e, "failed to mirror batch status to cache");
        }
    }
}

/// Run one refresh cycle.
pub async fn run_refresh(
    ctx: &Arc<AppContext>,
    job_id: Uuid,
    batch_id: Option<&str>,
    cancel: &watch::Receiver<bool>,
    soft_deadline: Instant,
    registry: &JobRegistry,
) -> Result<RefreshReport, PipelineError> {
    let refresh_cycle_id = Uuid::new_v4();
    report_stage(ctx, registry, job_id, batch_id, JobStage::FetchStarted).await;

    // Per-sport fetch with fault isolation: one sport failing never
    // aborts the others.
    let mut events: Vec<RawEvent> = Vec::new();
    let mut failed_sports: Vec<Sport> = Vec::new();
    let mut fetched_sports = 0usize;
    let mut partial = false;

    for sport in &ctx.config.sports {
        if cancelled(cancel) {
            return Err(PipelineError::Cancelled);
        }
        if Instant::now() >= soft_deadline {
            warn!(%sport, "soft time limit reached, winding down with partial fetch");
            partial = true;
            break;
        }

        match ctx.source.fetch(std::slice::from_ref(sport)).await {
            Ok(outcome) if outcome.status == FetchStatus::Success => {
                info!(%sport, events = outcome.total_events, "fetched sport");
                fetched_sports += 1;
                events.extend(outcome.events);
            }
            Ok(_) => {
                let err = PipelineError::SourceFetch {
                    sport: *sport,
                    message: "source returned error status".to_string(),
                };
                warn!(error = %err, "sport fetch failed");
                failed_sports.push(*sport);
            }
            Err(e) => {
                let err = PipelineError::SourceFetch {
                    sport: *sport,
                    message: format!("{e:#}"),
                };
                warn!(error = %err, "sport fetch failed");
                failed_sports.push(*sport);
            }
        }
    }

    // A cycle that fetched nothing, whether every sport failed or the soft
    // limit tripped before the first fetch, never publishes: the cached
    // snapshot stays the truth.
    ensure_any_sport_fetched(fetched_sports, &failed_sports)?;

    report_stage(ctx, registry, job_id, batch_id, JobStage::Processing).await;
    let (opportunities, analytics) = ctx.processor.process(&events);
    let outcome = aggregate(opportunities.clone(), refresh_cycle_id);

    if cancelled(cancel) {
        return Err(PipelineError::Cancelled);
    }
    report_stage(ctx, registry, job_id, batch_id, JobStage::Storing).await;

    // Durable write and cache write-through run in parallel; the cache is
    // a soft dependency and never fails the job.
    let source_name = ctx.source.source_name().to_string();
    let (write, cache_result) = tokio::join!(
        ctx.store.save_batch(&outcome.candidates, &source_name),
        ctx.cache
            .store_opportunities(&opportunities, &analytics, refresh_cycle_id),
    );
    if let Err(e) = cache_result {
        warn!(error = %format!("{e:#}"), "cache write-through failed");
    }
    if write.status == BatchStatus::Error {
        return Err(PipelineError::Persistence(write.errors.join("; ")));
    }

    if let Err(e) = ctx.cache.publish_update(&opportunities, &analytics).await {
        warn!(error = %format!("{e:#}"), "publish of update preview failed");
    }

    ctx.activity.record_refresh();
    if let Err(e) = ctx.cache.record_last_refresh(chrono::Utc::now()).await {
        warn!(error = %format!("{e:#}"), "failed to mirror last-refresh stamp");
    }

    if let Some(batch_id) = batch_id {
        let snapshot = crate::cache::OpportunitySnapshot {
            updated_at: chrono::Utc::now(),
            refresh_cycle_id,
            opportunities: ctx
                .cache
                .role_view(&opportunities, crate::cache::RoleTier::Full),
            summary: analytics.clone(),
        };
        if let Err(e) = ctx.cache.store_batch_result(batch_id, &snapshot).await {
            warn!(batch_id, error = %format!("{e:#}"), "failed to store batch result");
        }
        let status = BatchJobStatus::completed(batch_id, opportunities.len());
        if let Err(e) = ctx.cache.store_batch_status(&status).await {
            warn!(batch_id, error = %format!("{e:#}"), "failed to store batch completion");
        }
    }

    let report = RefreshReport {
        refresh_cycle_id,
        opportunity_count: opportunities.len(),
        offers_written: write.offers_created,
        offers_skipped: write.offers_skipped,
        failed_sports,
        dropped_quotes: outcome.dropped_quotes,
        analytics,
        write,
        partial,
    };
    info!(
        %report.refresh_cycle_id,
        opportunities = report.opportunity_count,
        offers_written = report.offers_written,
        offers_skipped = report.offers_skipped,
        failed_sports = report.failed_sports.len(),
        partial = report.partial,
        "refresh cycle complete"
    );
    Ok(report)
}

/// Health-check job: database, cache and data staleness.
pub async fn run_health_check(ctx: &Arc<AppContext>) -> Result<(), PipelineError> {
    crate::db::health::check_pool_health(&ctx.db)
        .await
        .map_err(|e| PipelineError::Persistence(format!("{e:#}")))?;

    ctx.cache
        .ping()
        .await
        .map_err(|e| PipelineError::Cache(format!("{e:#}")))?;

    match ctx.cache.last_update().await {
        Ok(Some(at)) => {
            let age = chrono::Utc::now() - at;
            if age.num_seconds() as u64 > ctx.config.staleness_threshold_secs {
                warn!(age_secs = age.num_seconds(), "cached data is stale");
            }
        }
        Ok(None) => info!("no cached data yet"),
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to read last_update");
        }
    }
    Ok(())
}

/// Mirror in-process session heartbeats into the dashboard hash. Runs
/// best-effort from the service loop.
pub async fn mirror_activity(ctx: &Arc<AppContext>) {
    for (session_id, user_id) in ctx.activity.active_sessions() {
        if let Err(e) = ctx.cache.record_heartbeat(&session_id, user_id).await {
            warn!(error = %format!("{e:#}"), "heartbeat mirror failed");
            break;
        }
    }
}

pub fn soft_deadline(soft_limit: Duration) -> Instant {
    Instant::now() + soft_limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_fetch_never_commits() {
        assert!(matches!(
            ensure_any_sport_fetched(0, &[Sport::NFL, Sport::NBA]),
            Err(PipelineError::AllSportsFailed(_))
        ));
        // Wind-down before the first fetch attempt fails the same way
        assert!(ensure_any_sport_fetched(0, &[]).is_err());
    }

    #[test]
    fn test_partial_fetch_continues() {
        assert!(ensure_any_sport_fetched(1, &[Sport::NBA]).is_ok());
        assert!(ensure_any_sport_fetched(3, &[]).is_ok());
    }
}
