//! Identity resolution for subscription reports
//!
//! A title may arrive keyed by TMDB or by Douban. The TMDB id wins when it
//! is present and non-zero; otherwise a non-empty Douban id is used. The
//! season (if any) completes the identity.

use crate::model::SubscribeReport;
use crate::{StatsError, StatsResult};
use serde::{Deserialize, Serialize};

/// Canonical catalog id of a title
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MediaId {
    Tmdb(u64),
    Douban(String),
}

impl std::fmt::Display for MediaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaId::Tmdb(id) => write!(f, "tmdb:{}", id),
            MediaId::Douban(id) => write!(f, "douban:{}", id),
        }
    }
}

/// Key of a subscription counter row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscribeIdentity {
    pub media_id: MediaId,
    pub season: Option<u32>,
}

impl SubscribeIdentity {
    pub fn new(media_id: MediaId, season: Option<u32>) -> Self {
        SubscribeIdentity { media_id, season }
    }
}

impl std::fmt::Display for SubscribeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.season {
            Some(season) => write!(f, "{}/S{}", self.media_id, season),
            None => write!(f, "{}", self.media_id),
        }
    }
}

/// Resolve the canonical identity of a report.
///
/// Pure and deterministic: the same logical title always maps to the same
/// identity, which is what keeps repeated reports landing on one row.
pub fn resolve_identity(report: &SubscribeReport) -> StatsResult<SubscribeIdentity> {
    let media_id = match (report.tmdbid, report.doubanid.as_deref()) {
        (Some(tmdbid), _) if tmdbid != 0 => MediaId::Tmdb(tmdbid),
        (_, Some(doubanid)) if !doubanid.is_empty() => MediaId::Douban(doubanid.to_string()),
        _ => return Err(StatsError::InvalidIdentity),
    };
    Ok(SubscribeIdentity::new(media_id, report.season))
}

impl SubscribeReport {
    pub fn identity(&self) -> StatsResult<SubscribeIdentity> {
        resolve_identity(self)
    }
}
