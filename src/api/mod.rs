mod wikidot;
pub mod xmlrpc;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{FileRecord, PageMeta, PageRecord, PostRecord};

pub use wikidot::WikidotClient;

const FORBIDDEN_CODE: i32 = 403;
const NOT_FOUND_CODE: i32 = 406;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("remote fault {code}: {message}")]
    Fault { code: i32, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// How the retry policy treats a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    NotFound,
    Forbidden,
}

impl ApiError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ApiError::Fault { code, .. } if *code == FORBIDDEN_CODE => FailureKind::Forbidden,
            ApiError::Fault { code, message } if *code == NOT_FOUND_CODE => {
                let message = message.to_lowercase();
                if message.contains("does not exist") || message.contains("not found") {
                    FailureKind::NotFound
                } else {
                    FailureKind::Transient
                }
            }
            _ => FailureKind::Transient,
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Remote content source for one or more sites. Batch operations accept at
/// most [`crate::config::MAX_CHUNK_SIZE`] identifiers.
#[async_trait]
pub trait ContentApi: Send + Sync {
    async fn list_pages(&self, site: &str) -> ApiResult<Vec<String>>;

    async fn pages_meta(&self, site: &str, pages: &[String]) -> ApiResult<HashMap<String, PageMeta>>;

    async fn page(&self, site: &str, fullname: &str) -> ApiResult<PageRecord>;

    async fn categories(&self, site: &str) -> ApiResult<Vec<String>>;

    async fn list_files(&self, site: &str, page: &str) -> ApiResult<Vec<String>>;

    async fn files_meta(
        &self,
        site: &str,
        page: &str,
        files: &[String],
    ) -> ApiResult<HashMap<String, FileRecord>>;

    async fn list_posts(&self, site: &str, page: &str) -> ApiResult<Vec<String>>;

    async fn posts(&self, site: &str, ids: &[String]) -> ApiResult<HashMap<String, PostRecord>>;
}
