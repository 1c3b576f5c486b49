//! Tiered, staleness-aware serving cache.
//!
//! Two axes of segmentation: role tier (restricted vs full view) and
//! freshness tier (long-lived last-known-good snapshot vs short-lived
//! batch-job records keyed by batch id). Every write-through updates the
//! general key and all role-specific keys. Manual invalidation is
//! rate-limited per key; a force path bypasses the limiter for
//! administrative clears. The cache is a soft dependency everywhere: a
//! read failure falls back to a live fetch, a write failure is logged and
//! never fails the job.

pub mod bus;

pub use bus::RedisBus;

use crate::config::CoreConfig;
use crate::ev::EvAnalytics;
use crate::types::{Book, BookOdds, EvTier, MarketKind, Opportunity, OutcomeSide, Sport, UserContext};
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

pub const KEY_OPPORTUNITIES: &str = "ev_opportunities";
pub const KEY_LAST_UPDATE: &str = "last_update";
pub const KEY_ACTIVE_SESSIONS: &str = "dashboard:active_sessions";
pub const KEY_LAST_REFRESH: &str = "dashboard:last_refresh";
pub const CHANNEL_UPDATES: &str = "ev_updates";

pub fn role_key(role: RoleTier) -> String {
    format!("{}:role:{}", KEY_OPPORTUNITIES, role.key())
}

pub fn batch_result_key(batch_id: &str) -> String {
    format!("ev_batch_results:{batch_id}")
}

pub fn batch_status_key(batch_id: &str) -> String {
    format!("ev_batch_status:{batch_id}")
}

/// Role segmentation axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleTier {
    Restricted,
    Full,
}

impl RoleTier {
    pub const ALL: [RoleTier; 2] = [RoleTier::Restricted, RoleTier::Full];

    pub fn key(&self) -> &'static str {
        match self {
            RoleTier::Restricted => "restricted",
            RoleTier::Full => "full",
        }
    }

    pub fn for_user(user: &UserContext) -> RoleTier {
        if user.is_full_access() {
            RoleTier::Full
        } else {
            RoleTier::Restricted
        }
    }
}

/// Serving shape of one opportunity. Advanced fields are `None` in the
/// restricted view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpportunityView {
    pub sport: Sport,
    pub event_name: String,
    pub market: MarketKind,
    pub side: OutcomeSide,
    pub commence_time: DateTime<Utc>,
    pub best_book: Option<Book>,
    pub best_odds: f64,
    pub expected_value: f64,
    pub tier: EvTier,
    pub fair_odds: Option<f64>,
    pub implied_probability: Option<f64>,
    pub confidence: Option<f64>,
    pub book_odds: Option<BookOdds>,
}

impl OpportunityView {
    pub fn full(opp: &Opportunity) -> Self {
        let mut book_odds = BookOdds::new();
        for quote in &opp.quotes {
            book_odds.insert(quote.book, quote.decimal);
        }
        Self {
            sport: opp.sport,
            event_name: opp.event_name.clone(),
            market: opp.market,
            side: opp.side,
            commence_time: opp.commence_time,
            best_book: opp.best_book,
            best_odds: opp.best_decimal,
            expected_value: opp.expected_value,
            tier: opp.tier,
            fair_odds: Some(opp.fair_decimal),
            implied_probability: Some(opp.implied_probability),
            confidence: Some(opp.confidence),
            book_odds: Some(book_odds),
        }
    }

    pub fn restricted(opp: &Opportunity) -> Self {
        let mut view = Self::full(opp);
        view.fair_odds = None;
        view.implied_probability = None;
        view.confidence = None;
        view.book_odds = None;
        view
    }
}

/// Cached payload: a full opportunity set plus summary, stamped with the
/// refresh cycle that produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpportunitySnapshot {
    pub updated_at: DateTime<Utc>,
    pub refresh_cycle_id: Uuid,
    pub opportunities: Vec<OpportunityView>,
    pub summary: EvAnalytics,
}

/// Pub/sub message published once per successful refresh. Carries a
/// bounded preview rather than the full payload so slow consumers never
/// back-pressure the write path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub updated_at: DateTime<Utc>,
    pub data: Vec<OpportunityView>,
    pub summary: EvAnalytics,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Processing,
    Completed,
    Error,
}

/// Poll-able status of an on-demand batch job. Lives only in the cache
/// with a TTL; it expires rather than being deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchJobStatus {
    pub batch_id: String,
    pub status: BatchState,
    pub stage: Option<String>,
    pub opportunity_count: Option<usize>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl BatchJobStatus {
    pub fn processing(batch_id: &str, stage: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            status: BatchState::Processing,
            stage: Some(stage.to_string()),
            opportunity_count: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn completed(batch_id: &str, opportunity_count: usize) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            status: BatchState::Completed,
            stage: None,
            opportunity_count: Some(opportunity_count),
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn errored(batch_id: &str, error: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            status: BatchState::Error,
            stage: None,
            opportunity_count: None,
            error: Some(error.to_string()),
            updated_at: Utc::now(),
        }
    }
}

/// Per-key invalidation rate limiter. Bounds manual cache clears so a
/// hostile or buggy caller can't trigger repeated expensive recomputation.
pub struct InvalidationLimiter {
    max_per_window: u32,
    window: Duration,
    events: Mutex<FxHashMap<String, Vec<Instant>>>,
}

impl InvalidationLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            events: Mutex::new(FxHashMap::default()),
        }
    }

    /// Record an attempt against `key`; false when over the limit.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut events = self.events.lock();
        let entry = events.entry(key.to_string()).or_default();
        entry.retain(|at| now.duration_since(*at) < self.window);
        if entry.len() as u32 >= self.max_per_window {
            return false;
        }
        entry.push(now);
        true
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub batch_result_ttl_secs: u64,
    pub batch_status_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub restricted_view_limit: usize,
    pub publish_preview_limit: usize,
    pub invalidation_per_minute: u32,
}

impl CacheConfig {
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            batch_result_ttl_secs: config.batch_result_ttl_secs,
            batch_status_ttl_secs: config.batch_status_ttl_secs,
            session_ttl_secs: config.session_ttl_secs,
            restricted_view_limit: config.restricted_view_limit,
            publish_preview_limit: config.publish_preview_limit,
            invalidation_per_minute: config.invalidation_per_minute,
        }
    }
}

pub struct TieredCache {
    bus: RedisBus,
    config: CacheConfig,
    limiter: InvalidationLimiter,
}

impl TieredCache {
    pub fn new(bus: RedisBus, config: CacheConfig) -> Self {
        let limiter =
            InvalidationLimiter::new(config.invalidation_per_minute, Duration::from_secs(60));
        Self {
            bus,
            config,
            limiter,
        }
    }

    /// Build the role-segmented view of a full opportunity set.
    pub fn role_view(&self, opportunities: &[Opportunity], role: RoleTier) -> Vec<OpportunityView> {
        match role {
            RoleTier::Full => opportunities.iter().map(OpportunityView::full).collect(),
            RoleTier::Restricted => opportunities
                .iter()
                .filter(|o| o.market == MarketKind::Moneyline)
                .take(self.config.restricted_view_limit)
                .map(OpportunityView::restricted)
                .collect(),
        }
    }

    /// Write-through of one refresh cycle's result: general key, every
    /// role key and the last-update stamp.
    pub async fn store_opportunities(
        &self,
        opportunities: &[Opportunity],
        summary: &EvAnalytics,
        refresh_cycle_id: Uuid,
    ) -> Result<()> {
        let updated_at = Utc::now();

        let general = OpportunitySnapshot {
            updated_at,
            refresh_cycle_id,
            opportunities: self.role_view(opportunities, RoleTier::Full),
            summary: summary.clone(),
        };
        self.bus
            .set(KEY_OPPORTUNITIES, &serde_json::to_string(&general)?)
            .await?;

        for role in RoleTier::ALL {
            let snapshot = OpportunitySnapshot {
                updated_at,
                refresh_cycle_id,
                opportunities: self.role_view(opportunities, role),
                summary: summary.clone(),
            };
            self.bus
                .set(&role_key(role), &serde_json::to_string(&snapshot)?)
                .await?;
        }

        self.bus
            .set(KEY_LAST_UPDATE, &updated_at.to_rfc3339())
            .await?;
        debug!(count = opportunities.len(), %refresh_cycle_id, "cache write-through complete");
        Ok(())
    }

    /// Load the last-known-good snapshot for a caller. `Ok(None)` means a
    /// cold cache; callers fall back to a live refresh.
    pub async fn load_opportunities(
        &self,
        user: &UserContext,
    ) -> Result<Option<OpportunitySnapshot>> {
        let key = role_key(RoleTier::for_user(user));
        match self.bus.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn last_update(&self) -> Result<Option<DateTime<Utc>>> {
        match self.bus.get(KEY_LAST_UPDATE).await? {
            Some(raw) => Ok(DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))),
            None => Ok(None),
        }
    }

    pub async fn store_batch_status(&self, status: &BatchJobStatus) -> Result<()> {
        self.bus
            .set_ex(
                &batch_status_key(&status.batch_id),
                &serde_json::to_string(status)?,
                self.config.batch_status_ttl_secs,
            )
            .await
    }

    pub async fn load_batch_status(&self, batch_id: &str) -> Result<Option<BatchJobStatus>> {
        match self.bus.get(&batch_status_key(batch_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn store_batch_result(
        &self,
        batch_id: &str,
        snapshot: &OpportunitySnapshot,
    ) -> Result<()> {
        self.bus
            .set_ex(
                &batch_result_key(batch_id),
                &serde_json::to_string(snapshot)?,
                self.config.batch_result_ttl_secs,
            )
            .await
    }

    pub async fn load_batch_result(&self, batch_id: &str) -> Result<Option<OpportunitySnapshot>> {
        match self.bus.get(&batch_result_key(batch_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Manual cache clear. Rate-limited per key unless `force` (the
    /// administrative path). Returns whether the clear was performed.
    pub async fn invalidate(&self, key: &str, force: bool) -> Result<bool> {
        if !force && !self.limiter.allow(key) {
            warn!(key, "cache invalidation rate-limited");
            return Ok(false);
        }
        self.bus.del(key).await?;
        debug!(key, force, "cache key invalidated");
        Ok(true)
    }

    /// Clear the opportunity keys (general + all roles).
    pub async fn invalidate_opportunities(&self, force: bool) -> Result<bool> {
        if !self.invalidate(KEY_OPPORTUNITIES, force).await? {
            return Ok(false);
        }
        for role in RoleTier::ALL {
            self.invalidate(&role_key(role), force).await?;
        }
        Ok(true)
    }

    /// Publish the bounded update preview for real-time consumers.
    pub async fn publish_update(
        &self,
        opportunities: &[Opportunity],
        summary: &EvAnalytics,
    ) -> Result<()> {
        let message = UpdateMessage {
            message_type: "ev_update".to_string(),
            updated_at: Utc::now(),
            data: opportunities
                .iter()
                .take(self.config.publish_preview_limit)
                .map(OpportunityView::full)
                .collect(),
            summary: summary.clone(),
        };
        self.bus.publish(CHANNEL_UPDATES, &message).await
    }

    /// Mirror one heartbeat into the observability hash.
    pub async fn record_heartbeat(&self, session_id: &str, user_id: Option<i64>) -> Result<()> {
        let value = serde_json::json!({
            "user_id": user_id,
            "last_seen": Utc::now().to_rfc3339(),
        });
        self.bus
            .hset_with_ttl(
                KEY_ACTIVE_SESSIONS,
                session_id,
                &value.to_string(),
                self.config.session_ttl_secs,
            )
            .await
    }

    pub async fn record_last_refresh(&self, at: DateTime<Utc>) -> Result<()> {
        self.bus.set(KEY_LAST_REFRESH, &at.to_rfc3339()).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.bus.ping().await
    }

    /// Dedicated pub/sub connection for listener tasks.
    pub async fn subscribe(&self, channel: &str) -> Result<redis::aio::PubSub> {
        self.bus.subscribe(channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BetParams, BookQuote};

    fn opportunity(market: MarketKind, ev: f64) -> Opportunity {
        Opportunity {
            sport: Sport::NBA,
            league: None,
            event_name: "Celtics @ Lakers".to_string(),
            home_team: "Lakers".to_string(),
            away_team: "Celtics".to_string(),
            market,
            market_description: "test".to_string(),
            params: BetParams::default(),
            side: OutcomeSide::Home,
            commence_time: Utc::now(),
            quotes: vec![BookQuote {
                book: Book::Pinnacle,
                decimal: 1.95,
            }],
            dropped_books: 0,
            fair_decimal: 1.9,
            implied_probability: 0.526,
            best_book: Some(Book::Pinnacle),
            best_decimal: 1.95,
            expected_value: ev,
            tier: EvTier::classify(ev),
            parse_failed: false,
            confidence: 0.4,
            volume_indicator: 1.0,
        }
    }

    fn cache_config() -> CacheConfig {
        CacheConfig {
            batch_result_ttl_secs: 300,
            batch_status_ttl_secs: 600,
            session_ttl_secs: 300,
            restricted_view_limit: 2,
            publish_preview_limit: 10,
            invalidation_per_minute: 3,
        }
    }

    #[test]
    fn test_key_namespace() {
        assert_eq!(role_key(RoleTier::Restricted), "ev_opportunities:role:restricted");
        assert_eq!(batch_result_key("abc"), "ev_batch_results:abc");
        assert_eq!(batch_status_key("abc"), "ev_batch_status:abc");
    }

    #[test]
    fn test_role_view_masking() {
        let opportunities = vec![
            opportunity(MarketKind::Moneyline, 0.03),
            opportunity(MarketKind::Spread, 0.05),
            opportunity(MarketKind::Moneyline, 0.01),
            opportunity(MarketKind::Moneyline, 0.02),
        ];
        let config = cache_config();

        let restricted: Vec<OpportunityView> = opportunities
            .iter()
            .filter(|o| o.market == MarketKind::Moneyline)
            .take(config.restricted_view_limit)
            .map(OpportunityView::restricted)
            .collect();
        assert_eq!(restricted.len(), 2);
        assert!(restricted.iter().all(|v| v.fair_odds.is_none()
            && v.confidence.is_none()
            && v.book_odds.is_none()));

        let full: Vec<OpportunityView> =
            opportunities.iter().map(OpportunityView::full).collect();
        assert_eq!(full.len(), 4);
        assert!(full.iter().all(|v| v.fair_odds.is_some()));
    }

    #[test]
    fn test_invalidation_limiter_bounds_clears() {
        let limiter = InvalidationLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.allow("ev_opportunities"));
        assert!(limiter.allow("ev_opportunities"));
        assert!(limiter.allow("ev_opportunities"));
        assert!(!limiter.allow("ev_opportunities"));
        // Other keys are tracked independently
        assert!(limiter.allow("last_update"));
    }

    #[test]
    fn test_update_message_shape() {
        let message = UpdateMessage {
            message_type: "ev_update".to_string(),
            updated_at: Utc::now(),
            data: vec![],
            summary: EvAnalytics::default(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"type\":\"ev_update\""));
    }

    #[test]
    fn test_role_for_user() {
        assert_eq!(RoleTier::for_user(&UserContext::Guest), RoleTier::Restricted);
    }
}
