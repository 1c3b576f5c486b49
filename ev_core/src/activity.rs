//! Activity-driven refresh policy.
//!
//! Tracks client heartbeats and derives two booleans: "should a scheduled
//! refresh fire now" and "should an access trigger a refresh because the
//! data has gone stale". The point of the first gate is to never spend a
//! scheduled-refresh API call when nobody is watching; the point of the
//! second is that the first access after a long idle period refreshes
//! rather than serving stale data.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Time source seam so the refresh policy can be tested at boundary values.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Debug)]
struct Heartbeat {
    user_id: Option<i64>,
    last_seen: DateTime<Utc>,
}

#[derive(Default)]
struct TrackerState {
    sessions: FxHashMap<String, Heartbeat>,
    last_refresh: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct ActivityConfig {
    /// Heartbeat time-to-live
    pub session_ttl: Duration,
    /// Minimum gap between activity-gated scheduled refreshes
    pub auto_refresh_interval: Duration,
    /// Data older than this triggers a refresh on next access
    pub staleness_threshold: Duration,
}

impl ActivityConfig {
    pub fn new(session_ttl_secs: u64, auto_refresh_secs: u64, staleness_secs: u64) -> Self {
        Self {
            session_ttl: Duration::seconds(session_ttl_secs as i64),
            auto_refresh_interval: Duration::seconds(auto_refresh_secs as i64),
            staleness_threshold: Duration::seconds(staleness_secs as i64),
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self::new(300, 900, 1800)
    }
}

pub struct ActivityTracker<C: Clock = SystemClock> {
    state: RwLock<TrackerState>,
    config: ActivityConfig,
    clock: C,
}

impl ActivityTracker<SystemClock> {
    pub fn new(config: ActivityConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> ActivityTracker<C> {
    pub fn with_clock(config: ActivityConfig, clock: C) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            config,
            clock,
        }
    }

    /// Upsert a session heartbeat, extending its TTL.
    pub fn track_access(&self, user_id: Option<i64>, session_id: &str) {
        let now = self.clock.now();
        let mut state = self.state.write();
        state.sessions.insert(
            session_id.to_string(),
            Heartbeat {
                user_id,
                last_seen: now,
            },
        );
    }

    /// True if any non-expired heartbeat exists. Stale entries are expired
    /// lazily here.
    pub fn has_active_sessions(&self) -> bool {
        let now = self.clock.now();
        let ttl = self.config.session_ttl;
        let mut state = self.state.write();
        let before = state.sessions.len();
        state.sessions.retain(|_, hb| now - hb.last_seen < ttl);
        if state.sessions.len() != before {
            debug!(
                expired = before - state.sessions.len(),
                remaining = state.sessions.len(),
                "expired stale dashboard sessions"
            );
        }
        !state.sessions.is_empty()
    }

    /// Scheduled-refresh gate: someone is watching AND the refresh
    /// interval has elapsed. Never true without an active session.
    pub fn should_auto_refresh(&self) -> bool {
        if !self.has_active_sessions() {
            return false;
        }
        let now = self.clock.now();
        match self.state.read().last_refresh {
            None => true,
            Some(at) => now - at >= self.config.auto_refresh_interval,
        }
    }

    /// On-access gate: true when no refresh has ever run or the data has
    /// crossed the staleness threshold, regardless of active sessions.
    pub fn should_refresh_on_load(&self) -> bool {
        let now = self.clock.now();
        match self.state.read().last_refresh {
            None => true,
            Some(at) => now - at >= self.config.staleness_threshold,
        }
    }

    /// Stamp the last-refresh time. Called only after a refresh batch
    /// completes successfully.
    pub fn record_refresh(&self) {
        let now = self.clock.now();
        self.state.write().last_refresh = Some(now);
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_refresh
    }

    pub fn active_session_count(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.session_ttl;
        self.state
            .read()
            .sessions
            .values()
            .filter(|hb| now - hb.last_seen < ttl)
            .count()
    }

    /// Most recent user id per active session, for observability mirrors.
    pub fn active_sessions(&self) -> Vec<(String, Option<i64>)> {
        let now = self.clock.now();
        let ttl = self.config.session_ttl;
        self.state
            .read()
            .sessions
            .iter()
            .filter(|(_, hb)| now - hb.last_seen < ttl)
            .map(|(id, hb)| (id.clone(), hb.user_id))
            .collect()
    }
}
