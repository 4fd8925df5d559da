use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::Repository;
use crate::error::Result;
use crate::models::StoredPage;

// Path parts come from remote identifiers; these characters never reach the file system.
const UNSAFE_CHARS: &str = r#"[<>:"/\\|?*\s]"#;

#[derive(Debug, Serialize)]
struct PageDocument<'a> {
    title: Option<&'a str>,
    content: Option<&'a str>,
    tags: Vec<String>,
    author: Option<&'a str>,
    created_at: Option<&'a str>,
    updated_at: Option<&'a str>,
    rating: i64,
    #[serde(rename = "_site")]
    site: &'a str,
    #[serde(rename = "_fullname")]
    fullname: &'a str,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportReport {
    pub exported: usize,
    pub failed: usize,
}

/// Maps page and site names to filesystem-safe path components.
pub struct FileNamer {
    unsafe_chars: Regex,
}

impl FileNamer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            unsafe_chars: Regex::new(UNSAFE_CHARS)?,
        })
    }

    pub fn sanitize(&self, name: &str) -> String {
        let replaced = self.unsafe_chars.replace_all(name, "_");
        let trimmed = replaced.trim_matches(|c: char| c == '.' || c == '_');
        if trimmed.is_empty() {
            "_".to_string()
        } else {
            trimmed.to_string()
        }
    }

    pub fn path_for(&self, dir: &Path, site: &str, fullname: &str) -> PathBuf {
        dir.join(self.sanitize(fullname))
            .join(format!("{}.json", self.sanitize(site)))
    }
}

pub async fn export_active_pages(repo: &Repository, dir: &Path) -> Result<ExportReport> {
    let namer = FileNamer::new()?;
    let pages = repo.active_pages().await?;
    info!("Exporting {} active pages to {}", pages.len(), dir.display());

    let mut report = ExportReport::default();
    for page in &pages {
        match export_page(repo, &namer, dir, page).await {
            Ok(path) => {
                debug!("Wrote {}", path.display());
                report.exported += 1;
            }
            Err(e) => {
                warn!("Failed to export '{}' of '{}': {}", page.fullname, page.site, e);
                report.failed += 1;
            }
        }
    }

    info!("Export finished: {} written, {} failed", report.exported, report.failed);
    Ok(report)
}

async fn export_page(
    repo: &Repository,
    namer: &FileNamer,
    dir: &Path,
    page: &StoredPage,
) -> Result<PathBuf> {
    let tags = repo.page_tags(&page.site, &page.fullname).await?;
    let document = PageDocument {
        title: page.title.as_deref(),
        content: page.content.as_deref(),
        tags,
        author: page.created_by.as_deref(),
        created_at: page.created_at.as_deref(),
        updated_at: page.updated_at.as_deref(),
        rating: page.rating,
        site: &page.site,
        fullname: &page.fullname,
    };

    let path = namer.path_for(dir, &page.site, &page.fullname);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(&document)?;
    tokio::fs::write(&path, json).await?;
    Ok(path)
}
