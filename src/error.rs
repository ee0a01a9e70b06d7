//! Error taxonomy for the counter store and the query cache

use crate::persistence::PersistenceError;

pub type StatsResult<T> = Result<T, StatsError>;

/// Errors surfaced to callers of the store and the service.
///
/// Nothing in the crate retries on these; a failed write leaves counters
/// unchanged and a failed cache fill leaves the cache unchanged.
#[derive(Debug)]
pub enum StatsError {
    /// Subscription report carries neither a TMDB nor a Douban id
    InvalidIdentity,
    /// Page or page size was zero or negative
    InvalidPagination { page: i64, page_size: i64 },
    /// The persistence collaborator failed or timed out
    PersistenceUnavailable(PersistenceError),
    /// The loader behind a cache key failed
    CacheLoadFailure {
        key: String,
        source: Box<StatsError>,
    },
}

impl std::fmt::Display for StatsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsError::InvalidIdentity => {
                write!(f, "invalid identity: report has no tmdbid or doubanid")
            }
            StatsError::InvalidPagination { page, page_size } => write!(
                f,
                "invalid pagination: page={} page_size={} (both must be >= 1)",
                page, page_size
            ),
            StatsError::PersistenceUnavailable(e) => write!(f, "persistence unavailable: {}", e),
            StatsError::CacheLoadFailure { key, source } => {
                write!(f, "cache load failed for '{}': {}", key, source)
            }
        }
    }
}

impl std::error::Error for StatsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatsError::PersistenceUnavailable(e) => Some(e),
            StatsError::CacheLoadFailure { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<PersistenceError> for StatsError {
    fn from(e: PersistenceError) -> Self {
        StatsError::PersistenceUnavailable(e)
    }
}

impl StatsError {
    /// True when the failure came from persistence, directly or through a cache fill
    pub fn is_persistence(&self) -> bool {
        match self {
            StatsError::PersistenceUnavailable(_) => true,
            StatsError::CacheLoadFailure { source, .. } => source.is_persistence(),
            _ => false,
        }
    }
}
