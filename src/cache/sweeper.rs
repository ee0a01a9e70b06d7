use super::QueryCache;
use crate::clock::Clock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::debug;

/// Anything holding entries that can expire
pub trait Sweep: Send + Sync + 'static {
    /// Drop expired entries; returns how many were dropped
    fn purge_expired(&self) -> usize;
}

impl<V, C> Sweep for QueryCache<V, C>
where
    V: Clone + Send + 'static,
    C: Clock,
{
    fn purge_expired(&self) -> usize {
        QueryCache::purge_expired(self)
    }
}

/// Background task that drops expired cache entries.
///
/// Reads already ignore expired entries; this only returns their memory
/// earlier than the next access or insert would.
pub struct CacheSweeper {
    caches: Vec<Arc<dyn Sweep>>,
    period: Duration,
}

impl CacheSweeper {
    pub fn new(period: Duration) -> Self {
        CacheSweeper {
            caches: Vec::new(),
            period,
        }
    }

    pub fn watch(mut self, cache: Arc<dyn Sweep>) -> Self {
        self.caches.push(cache);
        self
    }

    pub async fn run(self) {
        let mut tick = interval(self.period);

        loop {
            tick.tick().await;
            let purged: usize = self.caches.iter().map(|c| c.purge_expired()).sum();
            if purged > 0 {
                debug!(purged, "cache sweeper dropped expired entries");
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use std::convert::Infallible;

    #[tokio::test]
    async fn test_sweeper_purges_in_background() {
        let clock = SimulatedClock::new(0);
        let cache = Arc::new(QueryCache::with_clock(
            8,
            Duration::from_millis(100),
            clock.clone(),
        ));
        cache
            .get("k", || async { Ok::<_, Infallible>(1u64) })
            .await
            .unwrap();

        let handle = CacheSweeper::new(Duration::from_millis(5))
            .watch(cache.clone())
            .spawn();
        clock.advance_ms(100);

        for _ in 0..100 {
            if cache.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();

        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }
}
