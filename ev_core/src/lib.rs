//! OddsEdge Core - Positive-EV detection pipeline for US sportsbooks.
//!
//! This crate provides:
//! - American-odds parsing with EVEN/PK literals and parenthetical noise
//! - EV computation against a pluggable fair-odds model
//! - Deterministic bet identity (stable SHA-based `bet_id` / `sha_key`)
//! - Change-detection gating so unchanged offers are never re-written
//! - Chunked, idempotent persistence of bets and offer snapshots
//! - A tiered Redis serving cache with role segmentation and pub/sub
//! - Activity-driven refresh policy (no API spend while nobody watches)
//! - A background worker pool with retries, time limits and cancellation

pub mod activity;
pub mod aggregate;
pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod ev;
pub mod identity;
pub mod jobs;
pub mod odds;
pub mod source;
pub mod types;

pub use activity::{ActivityConfig, ActivityTracker, Clock, SystemClock};
pub use aggregate::{aggregate, offer_changed, AggregateOutcome, OfferCandidate, StoredOffer};
pub use cache::{RedisBus, RoleTier, TieredCache};
pub use config::CoreConfig;
pub use context::AppContext;
pub use db::{BatchStatus, BatchWriteReport, BetStore};
pub use error::PipelineError;
pub use ev::{EvAnalytics, EvProcessor};
pub use identity::{bet_identity, BetIdentity};
pub use jobs::{JobEnvelope, JobKind, JobRegistry, JobStage, JobState, RetryPolicy, WorkerPool};
pub use odds::AmericanOdds;
pub use source::{FetchOutcome, FetchStatus, HttpOddsSource, OddsSource, RetryingSource};
pub use types::{
    Book, BookOdds, BookQuote, EvTier, MarketKind, Opportunity, OutcomeSide, RawEvent, Sport,
    UserContext,
};
