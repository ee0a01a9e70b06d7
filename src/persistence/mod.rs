//! Persistence Collaborator
//!
//! `CounterRepository` is the keyed record store the counter store reads and
//! writes through. It is object-safe and returns boxed futures so that any
//! backend (and the fault-injecting wrapper) can sit behind `Arc<dyn ...>`.
//!
//! Implementations:
//! - `InMemoryRepository`: for tests and ephemeral deployments
//! - `JsonFileRepository`: tables snapshotted to a JSON file after each write
//! - `SimulatedRepository`: wraps another repository and injects faults

mod file;
mod memory;
mod simulated;

pub use file::JsonFileRepository;
pub use memory::InMemoryRepository;
pub use simulated::{SimulatedRepoConfig, SimulatedRepoStats, SimulatedRepository};

use crate::model::{PluginCounter, SubscribeCounter, SubscribeIdentity, SubscribeReport};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Boxed future returned by every repository call
pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = PersistenceResult<T>> + Send + 'a>>;

/// Error type for repository operations
#[derive(Debug)]
pub enum PersistenceError {
    /// The call did not finish within the configured bound
    Timeout(Duration),
    /// I/O error from a file-backed repository
    Io(std::io::Error),
    /// Snapshot could not be encoded or decoded
    Serialization(serde_json::Error),
    /// Backend refused or dropped the call
    Unavailable(String),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
            PersistenceError::Io(e) => write!(f, "I/O error: {}", e),
            PersistenceError::Serialization(e) => write!(f, "serialization error: {}", e),
            PersistenceError::Unavailable(msg) => write!(f, "backend unavailable: {}", msg),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistenceError::Io(e) => Some(e),
            PersistenceError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e)
    }
}

/// Keyed record store for the two counter tables.
///
/// Single calls are atomic: a failed call leaves the tables as they were.
/// Read-modify-write sequences across calls are NOT atomic here; the counter
/// store serializes them per identity.
pub trait CounterRepository: Send + Sync + 'static {
    fn get_plugin<'a>(&'a self, plugin_id: &'a str) -> RepoFuture<'a, Option<PluginCounter>>;

    /// Create or overwrite the row for `counter.plugin_id`
    fn put_plugin<'a>(&'a self, counter: &'a PluginCounter) -> RepoFuture<'a, ()>;

    /// All plugin rows ordered by plugin id
    fn list_plugins(&self) -> RepoFuture<'_, Vec<PluginCounter>>;

    fn get_subscribe<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
    ) -> RepoFuture<'a, Option<SubscribeCounter>>;

    /// Create a row and assign it the next primary key
    fn insert_subscribe<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
        attributes: &'a SubscribeReport,
        count: u64,
    ) -> RepoFuture<'a, SubscribeCounter>;

    /// Overwrite the count of an existing row; returns false if no row matched
    fn update_subscribe_count<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
        count: u64,
    ) -> RepoFuture<'a, bool>;

    /// Remove a row; returns false if no row matched
    fn delete_subscribe<'a>(&'a self, identity: &'a SubscribeIdentity) -> RepoFuture<'a, bool>;

    /// Rows whose media type equals `media_type`, ordered by primary key
    fn list_subscribes<'a>(
        &'a self,
        media_type: &'a str,
        offset: u64,
        limit: u64,
    ) -> RepoFuture<'a, Vec<SubscribeCounter>>;
}

impl<R: CounterRepository + ?Sized> CounterRepository for Arc<R> {
    fn get_plugin<'a>(&'a self, plugin_id: &'a str) -> RepoFuture<'a, Option<PluginCounter>> {
        (**self).get_plugin(plugin_id)
    }

    fn put_plugin<'a>(&'a self, counter: &'a PluginCounter) -> RepoFuture<'a, ()> {
        (**self).put_plugin(counter)
    }

    fn list_plugins(&self) -> RepoFuture<'_, Vec<PluginCounter>> {
        (**self).list_plugins()
    }

    fn get_subscribe<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
    ) -> RepoFuture<'a, Option<SubscribeCounter>> {
        (**self).get_subscribe(identity)
    }

    fn insert_subscribe<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
        attributes: &'a SubscribeReport,
        count: u64,
    ) -> RepoFuture<'a, SubscribeCounter> {
        (**self).insert_subscribe(identity, attributes, count)
    }

    fn update_subscribe_count<'a>(
        &'a self,
        identity: &'a SubscribeIdentity,
        count: u64,
    ) -> RepoFuture<'a, bool> {
        (**self).update_subscribe_count(identity, count)
    }

    fn delete_subscribe<'a>(&'a self, identity: &'a SubscribeIdentity) -> RepoFuture<'a, bool> {
        (**self).delete_subscribe(identity)
    }

    fn list_subscribes<'a>(
        &'a self,
        media_type: &'a str,
        offset: u64,
        limit: u64,
    ) -> RepoFuture<'a, Vec<SubscribeCounter>> {
        (**self).list_subscribes(media_type, offset, limit)
    }
}

/// Bound a repository call; elapse maps to `PersistenceError::Timeout`
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> PersistenceResult<T>
where
    F: Future<Output = PersistenceResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(PersistenceError::Timeout(timeout)),
    }
}
