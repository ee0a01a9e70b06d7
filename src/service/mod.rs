//! Stats Service
//!
//! Transport-independent facade over one `CounterStore` and the query
//! caches. Each method is one logical operation a reporting endpoint
//! exposes: single and batch reports, and the two cached aggregate views.
//!
//! Reports go straight to the store; cached views are refreshed only when
//! their TTL runs out.

use crate::cache::{CacheStats, CacheSweeper, QueryCache};
use crate::clock::{Clock, ProductionClock};
use crate::config::StatsConfig;
use crate::model::{Pagination, SubscribeCounter, SubscribeReport};
use crate::persistence::CounterRepository;
use crate::store::CounterStore;
use crate::{StatsError, StatsResult};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type PluginStatistics = Arc<BTreeMap<String, u64>>;
pub type SubscribeStatistics = Arc<Vec<SubscribeCounter>>;

/// Cache key of an aggregate query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// The full plugin install mapping
    Plugins,
    /// One page of subscription counters of one media type
    Subscribes {
        media_type: String,
        page: Pagination,
    },
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryKey::Plugins => write!(f, "plugin"),
            QueryKey::Subscribes { media_type, page } => write!(
                f,
                "subscribe_{}_{}_{}",
                media_type, page.page, page.page_size
            ),
        }
    }
}

pub struct StatsService<R: CounterRepository, C: Clock + Clone = ProductionClock> {
    store: CounterStore<R>,
    plugins: Arc<QueryCache<PluginStatistics, C>>,
    subscribes: Arc<QueryCache<SubscribeStatistics, C>>,
}

impl<R: CounterRepository> StatsService<R, ProductionClock> {
    pub fn new(repo: R, config: &StatsConfig) -> Self {
        Self::with_clock(repo, config, ProductionClock::new())
    }
}

impl<R: CounterRepository, C: Clock + Clone> StatsService<R, C> {
    pub fn with_clock(repo: R, config: &StatsConfig, clock: C) -> Self {
        info!(
            cache_capacity = config.cache.capacity,
            cache_ttl_secs = config.cache.ttl.as_secs(),
            persistence_timeout_ms = config.persistence.timeout.as_millis() as u64,
            "stats service ready"
        );
        StatsService {
            store: CounterStore::new(repo, config.persistence.timeout),
            // A single key lives here
            plugins: Arc::new(QueryCache::with_clock(1, config.cache.ttl, clock.clone())),
            subscribes: Arc::new(QueryCache::with_clock(
                config.cache.capacity,
                config.cache.ttl,
                clock,
            )),
        }
    }

    pub fn store(&self) -> &CounterStore<R> {
        &self.store
    }

    /// Start a background task dropping expired cache entries
    pub fn spawn_sweeper(&self, period: std::time::Duration) -> JoinHandle<()> {
        CacheSweeper::new(period)
            .watch(self.plugins.clone())
            .watch(self.subscribes.clone())
            .spawn()
    }

    /// Combined stats of both caches
    pub fn cache_stats(&self) -> CacheStats {
        let p = self.plugins.stats();
        let s = self.subscribes.stats();
        CacheStats {
            hits: p.hits + s.hits,
            misses: p.misses + s.misses,
            load_failures: p.load_failures + s.load_failures,
            evictions: p.evictions + s.evictions,
            expirations: p.expirations + s.expirations,
        }
    }

    pub async fn report_plugin_install(&self, plugin_id: &str) -> StatsResult<u64> {
        self.store.bump_plugin(plugin_id).await
    }

    /// Apply installs in order, stopping at the first failure.
    ///
    /// Installs applied before the failure stay applied. Returns how many
    /// were applied.
    pub async fn report_plugin_installs(&self, plugin_ids: &[String]) -> StatsResult<usize> {
        for plugin_id in plugin_ids {
            self.store.bump_plugin(plugin_id).await?;
        }
        debug!(count = plugin_ids.len(), "plugin install batch applied");
        Ok(plugin_ids.len())
    }

    pub async fn plugin_statistics(&self) -> StatsResult<PluginStatistics> {
        let key = QueryKey::Plugins.to_string();
        cached(self.plugins.as_ref(), key, || async {
            Ok::<_, StatsError>(Arc::new(self.store.list_plugins().await?))
        })
        .await
    }

    pub async fn report_subscribe_add(&self, report: &SubscribeReport) -> StatsResult<u64> {
        let identity = report.identity()?;
        self.store.add_subscribe(&identity, report).await
    }

    /// Apply subscription reports in order.
    ///
    /// Every identity is resolved before anything is written, so one bad
    /// report rejects the whole batch. A persistence failure stops the batch
    /// with earlier reports applied.
    pub async fn report_subscribes(&self, reports: &[SubscribeReport]) -> StatsResult<usize> {
        let identities = reports
            .iter()
            .map(SubscribeReport::identity)
            .collect::<StatsResult<Vec<_>>>()?;

        for (identity, report) in identities.iter().zip(reports) {
            self.store.add_subscribe(identity, report).await?;
        }
        debug!(count = reports.len(), "subscription batch applied");
        Ok(reports.len())
    }

    /// Returns true when the subscription row was removed
    pub async fn report_subscribe_done(&self, report: &SubscribeReport) -> StatsResult<bool> {
        let identity = report.identity()?;
        self.store.done_subscribe(&identity).await
    }

    pub async fn subscribe_statistics(
        &self,
        media_type: &str,
        page: i64,
        page_size: i64,
    ) -> StatsResult<SubscribeStatistics> {
        let window = Pagination::new(page, page_size)?;
        let key = QueryKey::Subscribes {
            media_type: media_type.to_string(),
            page: window,
        }
        .to_string();
        cached(self.subscribes.as_ref(), key, || async {
            let rows = self
                .store
                .list_subscribes(media_type, page, page_size)
                .await?;
            Ok::<_, StatsError>(Arc::new(rows))
        })
        .await
    }
}

/// Read through `cache`, tagging loader failures with the key
async fn cached<V, C, F, Fut>(cache: &QueryCache<V, C>, key: String, loader: F) -> StatsResult<V>
where
    V: Clone,
    C: Clock,
    F: FnOnce() -> Fut,
    Fut: Future<Output = StatsResult<V>>,
{
    match cache.get(&key, loader).await {
        Ok(value) => Ok(value),
        Err(source) => Err(StatsError::CacheLoadFailure {
            key,
            source: Box::new(source),
        }),
    }
}
