pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod observability;
pub mod persistence;
pub mod service;
pub mod store;
pub mod sync;

pub use cache::{CacheStats, QueryCache};
pub use config::StatsConfig;
pub use error::{StatsError, StatsResult};
pub use model::{MediaId, PluginCounter, SubscribeCounter, SubscribeIdentity, SubscribeReport};
pub use persistence::{CounterRepository, InMemoryRepository, JsonFileRepository, PersistenceError};
pub use service::StatsService;
pub use store::CounterStore;
