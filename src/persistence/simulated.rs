//! Simulated Repository with Fault Injection
//!
//! Wraps another repository and, driven by a seeded ChaCha RNG, fails calls,
//! stalls them past any reasonable timeout, or delays them to widen race
//! windows. Faults fire before the inner call, so a failed write never
//! reaches the wrapped tables.

use super::{CounterRepository, PersistenceError, PersistenceResult, RepoFuture};
use crate::model::{PluginCounter, SubscribeCounter, SubscribeIdentity, SubscribeReport};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;

/// How long a stalled call sleeps; callers are expected to time out first
const STALL: Duration = Duration::from_secs(3600);

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedRepoConfig {
    /// Probability a read (get/list) fails
    pub read_fail_prob: f64,
    /// Probability a write (put/insert/update/delete) fails
    pub write_fail_prob: f64,
    /// Probability a call hangs instead of answering
    pub stall_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedRepoConfig {
    fn default() -> Self {
        SimulatedRepoConfig {
            read_fail_prob: 0.01,
            write_fail_prob: 0.01,
            stall_prob: 0.0,
            latency_range_us: (0, 500),
        }
    }
}

impl SimulatedRepoConfig {
    /// No faults, only latency - for race-window tests
    pub fn latency_only(max_us: u64) -> Self {
        SimulatedRepoConfig {
            read_fail_prob: 0.0,
            write_fail_prob: 0.0,
            stall_prob: 0.0,
            latency_range_us: (0, max_us),
        }
    }

    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedRepoConfig {
            read_fail_prob: 0.1,
            write_fail_prob: 0.2,
            stall_prob: 0.0,
            latency_range_us: (0, 1_000),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedRepoStats {
    pub read_attempts: u64,
    pub read_failures: u64,
    pub write_attempts: u64,
    pub write_failures: u64,
    pub stalls: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    Fail,
    Stall,
}

struct SimulatedRepoInner {
    rng: ChaCha8Rng,
    stats: SimulatedRepoStats,
    /// When set, every write fails regardless of probability
    writes_down: bool,
}

/// Fault-injecting wrapper around any repository
pub struct SimulatedRepository<R: CounterRepository> {
    inner: R,
    config: SimulatedRepoConfig,
    state: Arc<Mutex<SimulatedRepoInner>>,
}

impl<R: CounterRepository> SimulatedRepository<R> {
    pub fn new(inner: R, seed: u64, config: SimulatedRepoConfig) -> Self {
        SimulatedRepository {
            inner,
            config,
            state: Arc::new(Mutex::new(SimulatedRepoInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedRepoStats::default(),
                writes_down: false,
            })),
        }
    }

    pub fn stats(&self) -> SimulatedRepoStats {
        self.state.lock().stats.clone()
    }

    /// Force every subsequent write to fail (or recover)
    pub fn set_writes_down(&self, down: bool) {
        self.state.lock().writes_down = down;
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Roll the dice for one call, then sleep for latency or stall
    async fn inject(&self, is_write: bool) -> PersistenceResult<()> {
        let (fault, latency_us) = {
            let mut s = self.state.lock();
            let fail_prob = if is_write {
                s.stats.write_attempts += 1;
                self.config.write_fail_prob
            } else {
                s.stats.read_attempts += 1;
                self.config.read_fail_prob
            };

            let fault = if is_write && s.writes_down {
                Fault::Fail
            } else if s.rng.gen_bool(self.config.stall_prob.clamp(0.0, 1.0)) {
                Fault::Stall
            } else if s.rng.gen_bool(fail_prob.clamp(0.0, 1.0)) {
                Fault::Fail
            } else {
                Fault::None
            };

            match (fault, is_write) {
                (Fault::Fail, true) => s.stats.write_failures += 1,
                (Fault::Fail, false) => s.stats.read_failures += 1,
                (Fault::Stall, _) => s.stats.stalls += 1,
                (Fault::None, _) => {}
            }

            let (min, max) = self.config.latency_range_us;
            let latency_us = if max > min {
                s.rng.gen_range(min..=max)
            } else {
                min
            };
            (fault, latency_us)
        };

        if latency_us > 0 {
            tokio::time::sleep(Duration::from_micros(latency_us)).await;
        }

        match fault {
            Fault::None => Ok(()),
            Fault::Fail => Err(PersistenceError::Unavailable(format!(
                "simulated {} failure",
                if is_write { "write" } else { "read" }
            ))),
            Fault::Stall => {
                tokio::time::sleep(STALL).await;
                Ok(())
            }
        }
    }
}

impl<R: CounterRepository> CounterRepository for SimulatedRepository<R> {
    fn get_plugin<'a>(&'a self, plugin_id: &'a str) -> RepoFuture<'a, Option<PluginCounter>> {
        Box::pin(async move {
            self.inject(false).await?;
            self.inner.get_plugin(plugin_id).await
        })
    }

    fn put_plugin<'a>(&'a self, counter: &'a PluginCounter) -> RepoFuture<'a, ()> {
        Box::pin(async move {
            self.inject(true).await?;
            self.inner.put_plugin(counter).await
        })
    }

    fn list_plugins(&self) -> RepoFuture<'_, Vec<PluginCounter>> {
        Box::pin(async move {
            self.inject(false).await?;
            self.inner.list_plugins().await
        })
    }

    fn get_subscribe<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
    ) -> RepoFuture<'a, Option<SubscribeCounter>> {
        Box::pin(async move {
            self.inject(false).await?;
            self.inner.get_subscribe(identity).await
        })
    }

    fn insert_subscribe<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
        attributes: &'a SubscribeReport,
        count: u64,
    ) -> RepoFuture<'a, SubscribeCounter> {
        Box::pin(async move {
            self.inject(true).await?;
            self.inner.insert_subscribe(identity, attributes, count).await
        })
    }

    fn update_subscribe_count<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
        count: u64,
    ) -> RepoFuture<'a, bool> {
        Box::pin(async move {
            self.inject(true).await?;
            self.inner.update_subscribe_count(identity, count).await
        })
    }

    fn delete_subscribe<'a>(&'a self, identity: &'a SubscribeIdentity) -> RepoFuture<'a, bool> {
        Box::pin(async move {
            self.inject(true).await?;
            self.inner.delete_subscribe(identity).await
        })
    }

    fn list_subscribes<'a>(
        &'a self,
        media_type: &'a str,
        offset: u64,
        limit: u64,
    ) -> RepoFuture<'a, Vec<SubscribeCounter>> {
        Box::pin(async move {
            self.inject(false).await?;
            self.inner.list_subscribes(media_type, offset, limit).await
        })
    }
}
