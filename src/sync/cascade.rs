use tracing::{debug, warn};

use super::engine::Synchronizer;
use crate::config::MAX_CHUNK_SIZE;
use crate::models::{FileRecord, PostRecord};

// Each collection is gathered over all its sub-chunks before it replaces the
// stored one. Any failure leaves the stored collection as it was.
impl Synchronizer<'_> {
    /// Refreshes files and posts independently. Returns whether both were
    /// replaced.
    pub(super) async fn cascade(&self, site: &str, page: &str) -> bool {
        let files = self.sync_files(site, page).await;
        let posts = self.sync_posts(site, page).await;
        files && posts
    }

    async fn sync_files(&self, site: &str, page: &str) -> bool {
        let names = match self
            .retry
            .run("files.select", || self.api.list_files(site, page))
            .await
            .into_result()
        {
            Ok(names) => names,
            Err(e) => {
                warn!("[{}] could not list files of '{}': {}", site, page, e);
                return false;
            }
        };

        let mut files: Vec<FileRecord> = Vec::with_capacity(names.len());
        for chunk in names.chunks(MAX_CHUNK_SIZE) {
            let mut batch = match self
                .retry
                .run("files.get_meta", || self.api.files_meta(site, page, chunk))
                .await
                .into_result()
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("[{}] file metadata failed for '{}', keeping stored files: {}", site, page, e);
                    return false;
                }
            };
            let missing = chunk.iter().filter(|name| !batch.contains_key(*name)).count();
            if missing > 0 {
                warn!(
                    "[{}] {} of {} files of '{}' came back without metadata, keeping stored files",
                    site,
                    missing,
                    chunk.len(),
                    page
                );
                return false;
            }
            files.extend(chunk.iter().filter_map(|name| batch.remove(name)));
            // Anything else the remote described is kept too.
            files.extend(batch.into_values());
        }

        match self.repo.replace_files(site, page, &files).await {
            Ok(()) => {
                debug!("[{}] '{}' has {} files", site, page, files.len());
                true
            }
            Err(e) => {
                warn!("[{}] failed to store files of '{}': {}", site, page, e);
                false
            }
        }
    }

    async fn sync_posts(&self, site: &str, page: &str) -> bool {
        let ids = match self
            .retry
            .run("posts.select", || self.api.list_posts(site, page))
            .await
            .into_result()
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!("[{}] could not list comments of '{}': {}", site, page, e);
                return false;
            }
        };

        let mut posts: Vec<PostRecord> = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_CHUNK_SIZE) {
            let mut batch = match self
                .retry
                .run("posts.get", || self.api.posts(site, chunk))
                .await
                .into_result()
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("[{}] comment fetch failed for '{}', keeping stored comments: {}", site, page, e);
                    return false;
                }
            };
            let missing = chunk.iter().filter(|id| !batch.contains_key(*id)).count();
            if missing > 0 {
                warn!(
                    "[{}] {} of {} comments of '{}' were not returned, keeping stored comments",
                    site,
                    missing,
                    chunk.len(),
                    page
                );
                return false;
            }
            posts.extend(chunk.iter().filter_map(|id| batch.remove(id)));
            posts.extend(batch.into_values());
        }

        match self.repo.replace_posts(site, page, &posts).await {
            Ok(()) => {
                debug!("[{}] '{}' has {} comments", site, page, posts.len());
                true
            }
            Err(e) => {
                warn!("[{}] failed to store comments of '{}': {}", site, page, e);
                false
            }
        }
    }
}
