use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub size: Option<i64>,
    pub comment: Option<String>,
    pub mime_type: Option<String>,
    pub mime_description: Option<String>,
    pub uploaded_by: Option<String>,
    pub uploaded_at: Option<String>,
    pub download_url: Option<String>,
}

/// A comment (forum post) attached to a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    pub reply_to: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub html: Option<String>,
    pub created_by: Option<String>,
    pub created_at: Option<String>,
    pub replies: i64,
}
