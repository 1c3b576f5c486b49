//! Explicit application context.
//!
//! All shared resources are constructed once at startup and passed to
//! components through this struct; shutdown is an explicit call rather
//! than a registered-callback list or module-level singletons.

use crate::activity::{ActivityConfig, ActivityTracker};
use crate::cache::{CacheConfig, RedisBus, TieredCache};
use crate::config::CoreConfig;
use crate::db::{create_pool, BetStore, DbPoolConfig};
use crate::ev::EvProcessor;
use crate::source::{HttpOddsSource, OddsSource, RetryingSource};
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

pub struct AppContext {
    pub config: CoreConfig,
    pub db: PgPool,
    pub store: BetStore,
    pub cache: TieredCache,
    pub activity: ActivityTracker,
    pub processor: EvProcessor,
    pub source: Arc<dyn OddsSource>,
}

impl AppContext {
    /// Connect every shared resource and assemble the context.
    pub async fn bootstrap(config: CoreConfig) -> Result<Arc<Self>> {
        let db = create_pool(&config.database_url, DbPoolConfig::batch_writer()).await?;
        let bus = RedisBus::connect(&config.redis_url).await?;

        let http = HttpOddsSource::new(&config.odds_api_base, &config.odds_api_key)?;
        let source: Arc<dyn OddsSource> = Arc::new(RetryingSource::new(Arc::new(http), 3));

        Ok(Self::assemble(config, db, bus, source))
    }

    /// Assemble from already-connected parts. Lets tests and alternate
    /// binaries swap the odds source.
    pub fn assemble(
        config: CoreConfig,
        db: PgPool,
        bus: RedisBus,
        source: Arc<dyn OddsSource>,
    ) -> Arc<Self> {
        let store = BetStore::new(db.clone(), config.write_chunk_size);
        let cache = TieredCache::new(bus, CacheConfig::from_core(&config));
        let activity = ActivityTracker::new(ActivityConfig::new(
            config.session_ttl_secs,
            config.auto_refresh_interval_secs,
            config.staleness_threshold_secs,
        ));

        Arc::new(Self {
            config,
            db,
            store,
            cache,
            activity,
            processor: EvProcessor::default(),
            source,
        })
    }

    /// Release shared resources. Worker pools must be stopped first.
    pub async fn shutdown(&self) {
        info!("closing application context");
        self.db.close().await;
    }
}
