use super::{CounterRepository, RepoFuture};
use crate::model::{PluginCounter, SubscribeCounter, SubscribeIdentity, SubscribeReport};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// The two counter tables plus the primary key sequence.
///
/// Shared by the in-memory and file-backed repositories.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    next_id: u64,
    plugins: BTreeMap<String, u64>,
    subscribes: HashMap<SubscribeIdentity, SubscribeCounter>,
}

/// On-disk form of `Tables`; identity keys are not valid JSON object keys
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    next_id: u64,
    plugins: Vec<PluginCounter>,
    subscribes: Vec<SubscribeCounter>,
}

impl Tables {
    pub(crate) fn get_plugin(&self, plugin_id: &str) -> Option<PluginCounter> {
        self.plugins.get(plugin_id).map(|&count| PluginCounter {
            plugin_id: plugin_id.to_string(),
            count,
        })
    }

    pub(crate) fn put_plugin(&mut self, counter: &PluginCounter) {
        debug_assert!(counter.count >= 1, "plugin rows never hold a zero count");
        self.plugins.insert(counter.plugin_id.clone(), counter.count);
    }

    pub(crate) fn list_plugins(&self) -> Vec<PluginCounter> {
        self.plugins
            .iter()
            .map(|(plugin_id, &count)| PluginCounter {
                plugin_id: plugin_id.clone(),
                count,
            })
            .collect()
    }

    pub(crate) fn get_subscribe(&self, identity: &SubscribeIdentity) -> Option<SubscribeCounter> {
        self.subscribes.get(identity).cloned()
    }

    pub(crate) fn insert_subscribe(
        &mut self,
        identity: &SubscribeIdentity,
        attributes: &SubscribeReport,
        count: u64,
    ) -> SubscribeCounter {
        debug_assert!(count >= 1, "subscribe rows never hold a zero count");
        self.next_id += 1;
        let row = SubscribeCounter {
            id: self.next_id,
            identity: identity.clone(),
            attributes: attributes.clone(),
            count,
        };
        self.subscribes.insert(identity.clone(), row.clone());
        row
    }

    pub(crate) fn update_subscribe_count(&mut self, identity: &SubscribeIdentity, count: u64) -> bool {
        debug_assert!(count >= 1, "subscribe rows never hold a zero count");
        match self.subscribes.get_mut(identity) {
            Some(row) => {
                row.count = count;
                true
            }
            None => false,
        }
    }

    pub(crate) fn delete_subscribe(&mut self, identity: &SubscribeIdentity) -> bool {
        self.subscribes.remove(identity).is_some()
    }

    pub(crate) fn list_subscribes(
        &self,
        media_type: &str,
        offset: u64,
        limit: u64,
    ) -> Vec<SubscribeCounter> {
        let mut rows: Vec<&SubscribeCounter> = self
            .subscribes
            .values()
            .filter(|row| row.media_type() == Some(media_type))
            .collect();
        rows.sort_by_key(|row| row.id);
        rows.into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect()
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        let mut subscribes: Vec<SubscribeCounter> = self.subscribes.values().cloned().collect();
        subscribes.sort_by_key(|row| row.id);
        Snapshot {
            next_id: self.next_id,
            plugins: self.list_plugins(),
            subscribes,
        }
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        // Never hand out an id that a loaded row already owns
        let max_id = snapshot.subscribes.iter().map(|row| row.id).max().unwrap_or(0);
        Tables {
            next_id: snapshot.next_id.max(max_id),
            plugins: snapshot
                .plugins
                .into_iter()
                .map(|p| (p.plugin_id, p.count))
                .collect(),
            subscribes: snapshot
                .subscribes
                .into_iter()
                .map(|row| (row.identity.clone(), row))
                .collect(),
        }
    }
}

/// In-memory repository; clones share the same tables
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribe rows (for testing)
    pub fn subscribe_len(&self) -> usize {
        self.tables.read().subscribes.len()
    }

    /// Drop every row (for testing)
    pub fn clear(&self) {
        *self.tables.write() = Tables::default();
    }
}

impl CounterRepository for InMemoryRepository {
    fn get_plugin<'a>(&'a self, plugin_id: &'a str) -> RepoFuture<'a, Option<PluginCounter>> {
        Box::pin(async move { Ok(self.tables.read().get_plugin(plugin_id)) })
    }

    fn put_plugin<'a>(&'a self, counter: &'a PluginCounter) -> RepoFuture<'a, ()> {
        Box::pin(async move {
            self.tables.write().put_plugin(counter);
            Ok(())
        })
    }

    fn list_plugins(&self) -> RepoFuture<'_, Vec<PluginCounter>> {
        Box::pin(async move { Ok(self.tables.read().list_plugins()) })
    }

    fn get_subscribe<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
    ) -> RepoFuture<'a, Option<SubscribeCounter>> {
        Box::pin(async move { Ok(self.tables.read().get_subscribe(identity)) })
    }

    fn insert_subscribe<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
        attributes: &'a SubscribeReport,
        count: u64,
    ) -> RepoFuture<'a, SubscribeCounter> {
        Box::pin(async move {
            Ok(self
                .tables
                .write()
                .insert_subscribe(identity, attributes, count))
        })
    }

    fn update_subscribe_count<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
        count: u64,
    ) -> RepoFuture<'a, bool> {
        Box::pin(async move { Ok(self.tables.write().update_subscribe_count(identity, count)) })
    }

    fn delete_subscribe<'a>(&'a self, identity: &'a SubscribeIdentity) -> RepoFuture<'a, bool> {
        Box::pin(async move { Ok(self.tables.write().delete_subscribe(identity)) })
    }

    fn list_subscribes<'a>(
        &'a self,
        media_type: &'a str,
        offset: u64,
        limit: u64,
    ) -> RepoFuture<'a, Vec<SubscribeCounter>> {
        Box::pin(async move {
            Ok(self
                .tables
                .read()
                .list_subscribes(media_type, offset, limit))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaId;

    fn movie(tmdbid: u64) -> (SubscribeIdentity, SubscribeReport) {
        let report = SubscribeReport::tmdb(tmdbid, None).with_media_type("电影");
        (SubscribeIdentity::new(MediaId::Tmdb(tmdbid), None), report)
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let repo = InMemoryRepository::new();
        let (id_a, attrs_a) = movie(1);
        let (id_b, attrs_b) = movie(2);

        let a = repo.insert_subscribe(&id_a, &attrs_a, 1).await.unwrap();
        let b = repo.insert_subscribe(&id_b, &attrs_b, 1).await.unwrap();
        assert!(a.id < b.id);
        assert_eq!(repo.subscribe_len(), 2);
    }

    #[tokio::test]
    async fn test_list_filters_type_and_paginates_in_id_order() {
        let repo = InMemoryRepository::new();
        for tmdbid in [30, 10, 20] {
            let (identity, attrs) = movie(tmdbid);
            repo.insert_subscribe(&identity, &attrs, 1).await.unwrap();
        }
        let tv = SubscribeReport::tmdb(99, Some(1)).with_media_type("电视剧");
        repo.insert_subscribe(&tv.identity().unwrap(), &tv, 1)
            .await
            .unwrap();

        let page1 = repo.list_subscribes("电影", 0, 2).await.unwrap();
        let ids: Vec<_> = page1.iter().map(|r| r.identity.media_id.clone()).collect();
        assert_eq!(ids, vec![MediaId::Tmdb(30), MediaId::Tmdb(10)]);

        let page2 = repo.list_subscribes("电影", 2, 2).await.unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].identity.media_id, MediaId::Tmdb(20));

        assert_eq!(repo.list_subscribes("电视剧", 0, 30).await.unwrap().len(), 1);
        assert!(repo.list_subscribes("动漫", 0, 30).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_rows() {
        let repo = InMemoryRepository::new();
        let (identity, _) = movie(5);
        assert!(!repo.update_subscribe_count(&identity, 3).await.unwrap());
        assert!(!repo.delete_subscribe(&identity).await.unwrap());
    }

    #[test]
    fn test_snapshot_preserves_id_sequence() {
        let mut tables = Tables::default();
        let (identity, attrs) = movie(1);
        tables.insert_subscribe(&identity, &attrs, 4);
        tables.put_plugin(&PluginCounter {
            plugin_id: "AutoSignIn".to_string(),
            count: 2,
        });

        let mut restored = Tables::from_snapshot(tables.to_snapshot());
        assert_eq!(restored.get_subscribe(&identity).unwrap().count, 4);
        assert_eq!(restored.get_plugin("AutoSignIn").unwrap().count, 2);

        let (next, attrs) = movie(2);
        assert_eq!(restored.insert_subscribe(&next, &attrs, 1).id, 2);
    }
}
