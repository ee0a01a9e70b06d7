//! Counter Store
//!
//! Owns the read-modify-write of every counter. The repository is the source
//! of truth; this layer makes each lookup -> compute -> persist sequence
//! exclusive per identity so concurrent reports never lose an update.
//! Different identities proceed in parallel.
//!
//! Plugins are increment-only. Subscriptions count up on `add` and down on
//! `done`; a `done` that would reach zero deletes the row instead.

use crate::model::{Pagination, PluginCounter, SubscribeCounter, SubscribeIdentity, SubscribeReport};
use crate::persistence::{with_timeout, CounterRepository, PersistenceResult};
use crate::sync::KeyedMutex;
use crate::{StatsError, StatsResult};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub struct CounterStore<R: CounterRepository> {
    repo: R,
    timeout: Duration,
    plugin_locks: KeyedMutex<String>,
    subscribe_locks: KeyedMutex<SubscribeIdentity>,
}

impl<R: CounterRepository> CounterStore<R> {
    /// `timeout` bounds every individual repository call
    pub fn new(repo: R, timeout: Duration) -> Self {
        CounterStore {
            repo,
            timeout,
            plugin_locks: KeyedMutex::new(),
            subscribe_locks: KeyedMutex::new(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> PersistenceResult<T>
    where
        F: Future<Output = PersistenceResult<T>>,
    {
        let result = with_timeout(self.timeout, fut).await;
        if let Err(e) = &result {
            warn!(op, error = %e, "repository call failed");
        }
        result
    }

    /// Count one install of `plugin_id`; returns the new count
    pub async fn bump_plugin(&self, plugin_id: &str) -> StatsResult<u64> {
        let _guard = self.plugin_locks.lock(&plugin_id.to_string()).await;

        let current = self
            .call("get_plugin", self.repo.get_plugin(plugin_id))
            .await?;
        let counter = PluginCounter {
            plugin_id: plugin_id.to_string(),
            count: current.map_or(1, |c| c.count + 1),
        };
        self.call("put_plugin", self.repo.put_plugin(&counter))
            .await?;

        debug!(plugin_id, count = counter.count, "plugin install counted");
        Ok(counter.count)
    }

    /// Count one subscription; returns the new count.
    ///
    /// `attributes` are only stored when the row is created. Later reports
    /// bump the count and leave the first snapshot in place. A report that
    /// resolves to a different identity is rejected with `InvalidIdentity`.
    pub async fn add_subscribe(
        &self,
        identity: &SubscribeIdentity,
        attributes: &SubscribeReport,
    ) -> StatsResult<u64> {
        if attributes.identity()? != *identity {
            return Err(StatsError::InvalidIdentity);
        }
        let _guard = self.subscribe_locks.lock(identity).await;

        let count = match self
            .call("get_subscribe", self.repo.get_subscribe(identity))
            .await?
        {
            None => {
                self.call(
                    "insert_subscribe",
                    self.repo.insert_subscribe(identity, attributes, 1),
                )
                .await?
                .count
            }
            Some(row) => {
                let count = row.count + 1;
                self.call(
                    "update_subscribe_count",
                    self.repo.update_subscribe_count(identity, count),
                )
                .await?;
                count
            }
        };

        debug!(%identity, count, "subscription added");
        Ok(count)
    }

    /// Retire one subscription; returns true when the row was deleted.
    ///
    /// Unknown identities are a no-op.
    pub async fn done_subscribe(&self, identity: &SubscribeIdentity) -> StatsResult<bool> {
        let _guard = self.subscribe_locks.lock(identity).await;

        let Some(row) = self
            .call("get_subscribe", self.repo.get_subscribe(identity))
            .await?
        else {
            debug!(%identity, "done for unknown subscription ignored");
            return Ok(false);
        };

        if row.count <= 1 {
            self.call("delete_subscribe", self.repo.delete_subscribe(identity))
                .await?;
            debug!(%identity, "subscription row deleted");
            Ok(true)
        } else {
            let count = row.count - 1;
            self.call(
                "update_subscribe_count",
                self.repo.update_subscribe_count(identity, count),
            )
            .await?;
            debug!(%identity, count, "subscription done");
            Ok(false)
        }
    }

    /// One page of `media_type` rows, ordered by primary key
    pub async fn list_subscribes(
        &self,
        media_type: &str,
        page: i64,
        page_size: i64,
    ) -> StatsResult<Vec<SubscribeCounter>> {
        let window = Pagination::new(page, page_size)?;
        let rows = self
            .call(
                "list_subscribes",
                self.repo
                    .list_subscribes(media_type, window.offset(), window.limit()),
            )
            .await?;
        Ok(rows)
    }

    /// Every plugin with its install count
    pub async fn list_plugins(&self) -> StatsResult<BTreeMap<String, u64>> {
        let rows = self.call("list_plugins", self.repo.list_plugins()).await?;
        Ok(rows.into_iter().map(|c| (c.plugin_id, c.count)).collect())
    }
}
