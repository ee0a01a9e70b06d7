use super::memory::{Snapshot, Tables};
use super::{CounterRepository, PersistenceResult, RepoFuture};
use crate::model::{PluginCounter, SubscribeCounter, SubscribeIdentity, SubscribeReport};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Repository that keeps the tables in memory and rewrites a JSON snapshot
/// after every successful mutation.
///
/// A mutation is applied to a copy of the tables, the copy is written to
/// `<path>.<seq>.tmp` and renamed over `<path>`, and only then does the copy
/// replace the live tables. A failed write therefore changes nothing.
///
/// Every write gets its own temp file: a write abandoned by a timeout keeps
/// running on the blocking pool and must not share a file with the next one.
#[derive(Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
    tables: Mutex<Tables>,
    write_seq: AtomicU64,
}

impl JsonFileRepository {
    /// Open the snapshot at `path`, starting empty if the file does not exist
    pub async fn open(path: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let path = path.into();
        let tables = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                Tables::from_snapshot(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), "opened counter snapshot");
        Ok(JsonFileRepository {
            path,
            tables: Mutex::new(tables),
            write_seq: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, tables: &Tables) -> PersistenceResult<()> {
        let bytes = serde_json::to_vec_pretty(&tables.to_snapshot())?;
        let tmp = self.temp_path(self.write_seq.fetch_add(1, Ordering::Relaxed));
        let written = match tokio::fs::write(&tmp, &bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot written");
        Ok(())
    }

    fn temp_path(&self, seq: u64) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".{}.tmp", seq));
        PathBuf::from(tmp)
    }

    /// Apply `f` to a copy of the tables, persist it, then publish it
    async fn mutate<T, F>(&self, f: F) -> PersistenceResult<T>
    where
        F: FnOnce(&mut Tables) -> T,
    {
        let mut tables = self.tables.lock().await;
        let mut next = tables.clone();
        let out = f(&mut next);
        self.persist(&next).await?;
        *tables = next;
        Ok(out)
    }
}

impl CounterRepository for JsonFileRepository {
    fn get_plugin<'a>(&'a self, plugin_id: &'a str) -> RepoFuture<'a, Option<PluginCounter>> {
        Box::pin(async move { Ok(self.tables.lock().await.get_plugin(plugin_id)) })
    }

    fn put_plugin<'a>(&'a self, counter: &'a PluginCounter) -> RepoFuture<'a, ()> {
        Box::pin(async move { self.mutate(|t| t.put_plugin(counter)).await })
    }

    fn list_plugins(&self) -> RepoFuture<'_, Vec<PluginCounter>> {
        Box::pin(async move { Ok(self.tables.lock().await.list_plugins()) })
    }

    fn get_subscribe<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
    ) -> RepoFuture<'a, Option<SubscribeCounter>> {
        Box::pin(async move { Ok(self.tables.lock().await.get_subscribe(identity)) })
    }

    fn insert_subscribe<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
        attributes: &'a SubscribeReport,
        count: u64,
    ) -> RepoFuture<'a, SubscribeCounter> {
        Box::pin(async move {
            self.mutate(|t| t.insert_subscribe(identity, attributes, count))
                .await
        })
    }

    fn update_subscribe_count<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
        count: u64,
    ) -> RepoFuture<'a, bool> {
        Box::pin(async move {
            self.mutate(|t| t.update_subscribe_count(identity, count))
                .await
        })
    }

    fn delete_subscribe<'a>(&'a self, identity: &'a SubscribeIdentity) -> RepoFuture<'a, bool> {
        Box::pin(async move { self.mutate(|t| t.delete_subscribe(identity)).await })
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
                .lock()
                .await
                .list_subscribes(media_type, offset, limit))
        })
    }
}
