use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Full page payload as returned by a single-page fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub fullname: String,
    pub title: Option<String>,
    pub created_at: Option<String>,
    pub created_by: Option<String>,
    pub updated_at: Option<String>,
    pub updated_by: Option<String>,
    pub parent_fullname: Option<String>,
    pub parent_title: Option<String>,
    pub rating: i64,
    pub revisions: i64,
    pub children: i64,
    pub comments: i64,
    pub commented_at: Option<String>,
    pub commented_by: Option<String>,
    pub content: Option<String>,
    pub html: Option<String>,
}

/// Batch metadata for one identifier. The tag list here is the one that gets
/// stored; the full fetch does not carry tags reliably.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMeta {
    pub updated_at: Option<String>,
    pub revisions: Option<i64>,
    pub tags: Vec<String>,
}

/// Change-detection fingerprint of a stored page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSnapshot {
    pub updated_at: Option<String>,
    pub revisions: Option<i64>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PageSnapshot {
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// True when the remote metadata describes exactly what is stored.
    pub fn matches(&self, meta: &PageMeta) -> bool {
        self.updated_at == meta.updated_at && self.revisions == meta.revisions
    }
}

/// An active page row as read back for export.
#[derive(Debug, Clone)]
pub struct StoredPage {
    pub site: String,
    pub fullname: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub created_by: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub rating: i64,
}
