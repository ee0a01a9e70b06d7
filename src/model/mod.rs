//! Counter rows and report payloads
//!
//! `PluginCounter` and `SubscribeCounter` mirror the two persisted tables.
//! A row only exists while its count is at least 1.

mod identity;

pub use identity::{resolve_identity, MediaId, SubscribeIdentity};

use serde::{Deserialize, Serialize};

/// Install tally for one plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCounter {
    pub plugin_id: String,
    pub count: u64,
}

/// A subscription report as sent by a client.
///
/// Everything except the catalog ids and `season` is descriptive and only
/// recorded when the row is first created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeReport {
    pub name: Option<String>,
    pub year: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub tmdbid: Option<u64>,
    pub imdbid: Option<String>,
    pub tvdbid: Option<u64>,
    pub doubanid: Option<String>,
    pub bangumiid: Option<u64>,
    pub season: Option<u32>,
    pub poster: Option<String>,
    pub backdrop: Option<String>,
    pub vote: Option<f64>,
    pub description: Option<String>,
}

impl SubscribeReport {
    /// Report keyed by a TMDB id
    pub fn tmdb(tmdbid: u64, season: Option<u32>) -> Self {
        SubscribeReport {
            tmdbid: Some(tmdbid),
            season,
            ..Default::default()
        }
    }

    /// Report keyed by a Douban id
    pub fn douban(doubanid: impl Into<String>, season: Option<u32>) -> Self {
        SubscribeReport {
            doubanid: Some(doubanid.into()),
            season,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }
}

/// Subscription tally for one title (and season)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeCounter {
    /// Primary key assigned by the repository; listings are ordered by it
    pub id: u64,
    pub identity: SubscribeIdentity,
    /// Snapshot of the first report that created the row
    pub attributes: SubscribeReport,
    pub count: u64,
}

impl SubscribeCounter {
    pub fn media_type(&self) -> Option<&str> {
        self.attributes.media_type.as_deref()
    }
}

/// 1-indexed page window for subscription listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            page: 1,
            page_size: 30,
        }
    }
}

impl Pagination {
    /// Validate raw caller input; both values must be >= 1
    pub fn new(page: i64, page_size: i64) -> crate::StatsResult<Self> {
        if page < 1 || page_size < 1 {
            return Err(crate::StatsError::InvalidPagination { page, page_size });
        }
        Ok(Pagination {
            page: page as u64,
            page_size: page_size as u64,
        })
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatsError;

    #[test]
    fn test_pagination_window() {
        let p = Pagination::new(3, 30).unwrap();
        assert_eq!(p.offset(), 60);
        assert_eq!(p.limit(), 30);
        assert_eq!(Pagination::default().offset(), 0);
    }

    #[test]
    fn test_pagination_rejects_non_positive() {
        for (page, size) in [(0, 30), (1, 0), (-1, 10), (2, -5)] {
            match Pagination::new(page, size) {
                Err(StatsError::InvalidPagination { page: p, page_size: s }) => {
                    assert_eq!((p, s), (page, size));
                }
                other => panic!("expected InvalidPagination, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_report_wire_names() {
        let json = r#"{"name":"The Matrix","type":"电影","tmdbid":603,"season":null}"#;
        let report: SubscribeReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.media_type.as_deref(), Some("电影"));
        assert_eq!(report.tmdbid, Some(603));
        assert!(report.doubanid.is_none());
    }
}
