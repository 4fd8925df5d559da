use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::retry::{Outcome, RetryPolicy};
use crate::api::ContentApi;
use crate::config::MAX_CHUNK_SIZE;
use crate::db::Repository;
use crate::models::{PageMeta, PageSnapshot, RunReport, SiteReport};

/// What to do with one listed page, given its stored snapshot and the
/// freshly fetched metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Fetch,
    /// Tombstoned locally but present remotely.
    Reactivate,
    Skip,
}

pub fn decide(snapshot: Option<&PageSnapshot>, meta: &PageMeta) -> Decision {
    match snapshot {
        None => Decision::Fetch,
        Some(s) if s.is_tombstoned() => Decision::Reactivate,
        Some(s) if s.matches(meta) => Decision::Skip,
        Some(_) => Decision::Fetch,
    }
}

/// Per-page result of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSync {
    Updated,
    Unchanged,
    Tombstoned,
    Forbidden,
    /// Missing metadata, exhausted retries, or a rolled-back store write.
    Failed,
}

fn tally(report: &mut SiteReport, result: PageSync) {
    report.checked += 1;
    match result {
        PageSync::Updated => report.updated += 1,
        PageSync::Unchanged => report.skipped += 1,
        PageSync::Tombstoned => {
            report.skipped += 1;
            report.tombstoned += 1;
        }
        PageSync::Forbidden => {
            report.skipped += 1;
            report.forbidden += 1;
        }
        PageSync::Failed => report.failed += 1,
    }
}

/// Reconciles remote sites into the local store, one call at a time.
pub struct Synchronizer<'a> {
    pub(super) api: &'a dyn ContentApi,
    pub(super) repo: &'a Repository,
    pub(super) retry: &'a RetryPolicy,
    chunk_size: usize,
}

impl<'a> Synchronizer<'a> {
    pub fn new(api: &'a dyn ContentApi, repo: &'a Repository, retry: &'a RetryPolicy) -> Self {
        Self {
            api,
            repo,
            retry,
            chunk_size: MAX_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub async fn sync_all(&self, sites: &[String]) -> RunReport {
        let started = Instant::now();
        let mut run = RunReport::default();

        for site in sites {
            run.sites.push(self.sync_site(site).await);
        }

        // Summary
        run.elapsed = started.elapsed();
        for r in &run.sites {
            info!(
                "  {}: {} checked, {} updated, {} skipped, {} failed",
                r.site, r.checked, r.updated, r.skipped, r.failed
            );
        }
        info!(
            "Run finished in {:.1}s: {} sites, {} checked, {} updated, {} skipped, {} failed",
            run.elapsed.as_secs_f64(),
            run.sites.len(),
            run.total(|r| r.checked),
            run.total(|r| r.updated),
            run.total(|r| r.skipped),
            run.total(|r| r.failed),
        );
        run
    }

    pub async fn sync_site(&self, site: &str) -> SiteReport {
        let started = Instant::now();
        let mut report = SiteReport::new(site);
        info!("Syncing site '{}'", site);

        // List pages
        let pages = match self.retry.run("pages.select", || self.api.list_pages(site)).await {
            Outcome::Success(pages) => pages,
            Outcome::Forbidden(e) => {
                warn!("Access to site '{}' denied, skipping: {}", site, e);
                return report;
            }
            Outcome::NotFound(e) | Outcome::TransientFailure(e) => {
                error!("Could not list pages of '{}': {}", site, e);
                return report;
            }
        };
        info!("Site '{}' lists {} pages", site, pages.len());

        // Categories are replaced before any page chunk
        self.sync_categories(site).await;

        // Process chunks
        let total_chunks = pages.len().div_ceil(self.chunk_size);
        for (index, chunk) in pages.chunks(self.chunk_size).enumerate() {
            self.sync_chunk(site, chunk, &mut report).await;

            report.elapsed = started.elapsed();
            info!(
                "[{}] chunk {}/{} done, {} pages in {:.1}s ({:.2} pages/s)",
                site,
                index + 1,
                total_chunks,
                report.checked,
                report.elapsed.as_secs_f64(),
                report.pages_per_second()
            );
        }

        // Summary
        report.elapsed = started.elapsed();
        info!(
            "Site '{}' done in {:.1}s: {} checked, {} updated, {} skipped ({} tombstoned, {} forbidden), {} failed",
            site,
            report.elapsed.as_secs_f64(),
            report.checked,
            report.updated,
            report.skipped,
            report.tombstoned,
            report.forbidden,
            report.failed,
        );
        match self.repo.page_counts(site).await {
            Ok((active, tombstoned)) => {
                info!("Site '{}' now holds {} active and {} tombstoned pages", site, active, tombstoned)
            }
            Err(e) => warn!("Could not count pages of '{}': {}", site, e),
        }
        report
    }

    async fn sync_categories(&self, site: &str) {
        match self.retry.run("categories.select", || self.api.categories(site)).await {
            Outcome::Success(categories) => {
                if let Err(e) = self.repo.replace_categories(site, &categories).await {
                    error!("Failed to store categories of '{}': {}", site, e);
                } else {
                    debug!("Stored {} categories for '{}'", categories.len(), site);
                }
            }
            Outcome::Forbidden(e) | Outcome::NotFound(e) | Outcome::TransientFailure(e) => {
                warn!("Could not list categories of '{}': {}", site, e);
            }
        }
    }

    async fn sync_chunk(&self, site: &str, chunk: &[String], report: &mut SiteReport) {
        let metas: HashMap<String, PageMeta> =
            match self.retry.run("pages.get_meta", || self.api.pages_meta(site, chunk)).await {
                Outcome::Success(metas) => metas,
                Outcome::Forbidden(e) | Outcome::NotFound(e) | Outcome::TransientFailure(e) => {
                    error!(
                        "Metadata fetch failed for {} pages of '{}' ({}..): {}",
                        chunk.len(),
                        site,
                        chunk.first().map(String::as_str).unwrap_or_default(),
                        e
                    );
                    for _ in chunk {
                        tally(report, PageSync::Failed);
                    }
                    return;
                }
            };

        for fullname in chunk {
            // Listings may repeat an identifier; each occurrence sees the same metadata.
            let result = self.sync_page(site, fullname, metas.get(fullname).cloned()).await;
            tally(report, result);
        }
    }

    /// Runs the decision table for one identifier and applies the result.
    pub async fn sync_page(&self, site: &str, fullname: &str, meta: Option<PageMeta>) -> PageSync {
        let Some(meta) = meta else {
            warn!("[{}] no metadata returned for '{}'", site, fullname);
            return PageSync::Failed;
        };

        let snapshot = match self.repo.snapshot(site, fullname).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("[{}] could not read stored state of '{}': {}", site, fullname, e);
                return PageSync::Failed;
            }
        };

        match decide(snapshot.as_ref(), &meta) {
            Decision::Skip => return PageSync::Unchanged,
            Decision::Reactivate => info!("[{}] '{}' reappeared, reactivating", site, fullname),
            Decision::Fetch => {}
        }

        let mut page = match self.retry.run("pages.get_one", || self.api.page(site, fullname)).await {
            Outcome::Success(page) => page,
            Outcome::NotFound(_) => return self.tombstone(site, fullname).await,
            Outcome::Forbidden(e) => {
                warn!("[{}] access to '{}' denied: {}", site, fullname, e);
                return PageSync::Forbidden;
            }
            Outcome::TransientFailure(e) => {
                error!("[{}] failed to fetch '{}': {}", site, fullname, e);
                return PageSync::Failed;
            }
        };

        if page.fullname != fullname {
            debug!("[{}] payload names '{}' as '{}'", site, fullname, page.fullname);
            page.fullname = fullname.to_string();
        }

        if let Err(e) = self.repo.upsert_page_with_tags(site, &page, &meta.tags).await {
            error!("[{}] failed to store '{}': {}", site, fullname, e);
            return PageSync::Failed;
        }
        debug!("[{}] stored '{}' (rev {})", site, fullname, page.revisions);

        // Attachment failures are logged inside and leave the page counted as synced.
        self.cascade(site, fullname).await;
        PageSync::Updated
    }

    async fn tombstone(&self, site: &str, fullname: &str) -> PageSync {
        match self.repo.tombstone_page(site, fullname, Utc::now()).await {
            Ok(true) => {
                info!("[{}] '{}' no longer exists, tombstoned", site, fullname);
                PageSync::Tombstoned
            }
            Ok(false) => {
                debug!("[{}] '{}' does not exist and has no active row", site, fullname);
                PageSync::Tombstoned
            }
            Err(e) => {
                error!("[{}] failed to tombstone '{}': {}", site, fullname, e);
                PageSync::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageRecord;
    use crate::sync::testing::FakeApi;

    const SITE: &str = "scp-wiki";

    async fn repo() -> Repository {
        Repository::new(":memory:").await.unwrap()
    }

    fn meta(updated_at: &str, revisions: i64) -> PageMeta {
        PageMeta {
            updated_at: Some(updated_at.to_string()),
            revisions: Some(revisions),
            tags: vec![],
        }
    }

    fn snapshot(updated_at: &str, revisions: i64, tombstoned: bool) -> PageSnapshot {
        PageSnapshot {
            updated_at: Some(updated_at.to_string()),
            revisions: Some(revisions),
            deleted_at: tombstoned.then(Utc::now),
        }
    }

    fn sites(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn decision_table() {
        let remote = meta("T1", 1);
        assert_eq!(decide(None, &remote), Decision::Fetch);
        assert_eq!(decide(Some(&snapshot("T1", 1, false)), &remote), Decision::Skip);
        assert_eq!(decide(Some(&snapshot("T1", 1, true)), &remote), Decision::Reactivate);
        assert_eq!(decide(Some(&snapshot("T0", 1, false)), &remote), Decision::Fetch);
        assert_eq!(decide(Some(&snapshot("T1", 2, false)), &remote), Decision::Fetch);
    }

    #[tokio::test]
    async fn three_sweeps_fetch_only_what_changed() {
        let api = FakeApi::new();
        api.put_page(SITE, "a", "T1", 1, &["scp", "safe"]);
        api.put_page(SITE, "b", "T2", 1, &["tale"]);
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);

        let report = sync.sync_site(SITE).await;
        assert_eq!(api.fetched(), vec!["a", "b"]);
        assert_eq!((report.checked, report.updated, report.skipped, report.failed), (2, 2, 0, 0));
        assert_eq!(repo.page_tags(SITE, "a").await.unwrap(), vec!["scp", "safe"]);
        assert_eq!(repo.page_tags(SITE, "b").await.unwrap(), vec!["tale"]);

        api.reset();
        let report = sync.sync_site(SITE).await;
        assert!(api.fetched().is_empty());
        assert_eq!((report.checked, report.updated, report.skipped), (2, 0, 2));

        api.reset();
        api.put_page(SITE, "a", "T3", 2, &["scp", "keter"]);
        let report = sync.sync_site(SITE).await;
        assert_eq!(api.fetched(), vec!["a"]);
        assert_eq!((report.updated, report.skipped), (1, 1));

        let a = repo.stored_page(SITE, "a").await.unwrap().unwrap();
        assert_eq!(a.updated_at.as_deref(), Some("T3"));
        assert_eq!(a.revisions, 2);
        assert_eq!(a.content.as_deref(), Some("a @ T3"));
        assert_eq!(repo.page_tags(SITE, "a").await.unwrap(), vec!["scp", "keter"]);

        let b = repo.stored_page(SITE, "b").await.unwrap().unwrap();
        assert_eq!(b.updated_at.as_deref(), Some("T2"));
        assert_eq!(repo.page_tags(SITE, "b").await.unwrap(), vec!["tale"]);
    }

    #[tokio::test]
    async fn unchanged_corpus_issues_no_writes() {
        let api = FakeApi::new();
        for i in 0..25 {
            api.put_page(SITE, &format!("page-{}", i), "T1", 1, &["x"]);
        }
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);
        sync.sync_site(SITE).await;
        assert_eq!(api.calls("pages.get_meta"), 3);

        // Any page write would now fail.
        repo.execute_raw(
            "CREATE TRIGGER frozen BEFORE UPDATE ON pages BEGIN SELECT RAISE(ABORT, 'frozen'); END;
             CREATE TRIGGER frozen_tags BEFORE DELETE ON page_tags BEGIN SELECT RAISE(ABORT, 'frozen'); END;",
        )
        .await
        .unwrap();

        api.reset();
        let report = sync.sync_site(SITE).await;
        assert_eq!(api.calls("pages.get_one"), 0);
        assert_eq!(api.calls("files.select"), 0);
        assert_eq!((report.checked, report.skipped, report.failed), (25, 25, 0));
    }

    #[tokio::test]
    async fn smaller_chunks_batch_metadata_calls() {
        let api = FakeApi::new();
        for name in ["a", "b", "c", "d", "e"] {
            api.put_page(SITE, name, "T1", 1, &[]);
        }
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry).with_chunk_size(2);

        let report = sync.sync_site(SITE).await;
        assert_eq!(api.calls("pages.get_meta"), 3);
        assert_eq!(report.updated, 5);
    }

    #[tokio::test]
    async fn tombstone_then_reactivate() {
        let api = FakeApi::new();
        api.put_page(SITE, "a", "T1", 1, &["scp"]);
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);
        sync.sync_site(SITE).await;

        // Remote edit is seen in metadata, but the page is gone by fetch time.
        api.put_page(SITE, "a", "T2", 2, &["scp"]);
        api.delete_page(SITE, "a");
        let report = sync.sync_site(SITE).await;
        assert_eq!((report.tombstoned, report.skipped, report.failed), (1, 1, 0));
        let snap = repo.snapshot(SITE, "a").await.unwrap().unwrap();
        assert!(snap.is_tombstoned());
        assert_eq!(snap.updated_at.as_deref(), Some("T1"));
        assert!(repo.active_pages().await.unwrap().is_empty());

        // Back with metadata identical to the tombstoned row: still refetched.
        api.put_page(SITE, "a", "T1", 1, &["scp", "restored"]);
        api.reset();
        let report = sync.sync_site(SITE).await;
        assert_eq!(api.fetched(), vec!["a"]);
        assert_eq!(report.updated, 1);
        let snap = repo.snapshot(SITE, "a").await.unwrap().unwrap();
        assert!(!snap.is_tombstoned());
        assert_eq!(snap.revisions, Some(1));
        assert_eq!(repo.active_pages().await.unwrap().len(), 1);
        assert_eq!(repo.page_tags(SITE, "a").await.unwrap(), vec!["scp", "restored"]);
    }

    #[tokio::test]
    async fn page_missing_on_first_sight_leaves_no_row() {
        let api = FakeApi::new();
        api.put_page(SITE, "ghost", "T1", 1, &[]);
        api.delete_page(SITE, "ghost");
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);

        let report = sync.sync_site(SITE).await;
        assert_eq!(report.tombstoned, 1);
        assert!(repo.snapshot(SITE, "ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_metadata_is_a_failure_without_fetch() {
        let api = FakeApi::new();
        api.put_page(SITE, "a", "T1", 1, &[]);
        api.put_page(SITE, "b", "T1", 1, &[]);
        api.drop_meta(SITE, "b");
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);

        let report = sync.sync_site(SITE).await;
        assert_eq!(api.fetched(), vec!["a"]);
        assert_eq!((report.checked, report.updated, report.failed), (2, 1, 1));
        assert!(repo.snapshot(SITE, "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_identifier_in_listing_reuses_metadata() {
        let api = FakeApi::new();
        api.put_page(SITE, "a", "T1", 1, &["scp"]);
        api.relist(SITE, "a");
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);

        let report = sync.sync_site(SITE).await;
        assert_eq!(api.calls("pages.get_meta"), 1);
        assert_eq!(api.fetched(), vec!["a"]);
        assert_eq!(
            (report.checked, report.updated, report.skipped, report.failed),
            (2, 1, 1, 0)
        );
    }

    #[tokio::test]
    async fn failed_metadata_chunk_does_not_stop_the_sweep() {
        let api = FakeApi::new();
        for name in ["a", "b", "c", "d"] {
            api.put_page(SITE, name, "T1", 1, &[]);
        }
        api.fail_meta_chunk_with(SITE, "c");
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry).with_chunk_size(2);

        let report = sync.sync_site(SITE).await;
        assert_eq!(api.fetched(), vec!["a", "b"]);
        assert_eq!((report.checked, report.updated, report.failed), (4, 2, 2));
        // One call for the good chunk, max_attempts for the failing one.
        assert_eq!(api.calls("pages.get_meta"), 1 + retry.max_attempts as usize);
    }

    #[tokio::test]
    async fn transient_fetch_failure_is_retried_then_counted() {
        let api = FakeApi::new();
        api.put_page(SITE, "a", "T1", 1, &[]);
        api.fail_page(SITE, "a", 500, "Service unavailable");
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);

        let report = sync.sync_site(SITE).await;
        assert_eq!(api.fetched().len(), retry.max_attempts as usize);
        assert_eq!(report.failed, 1);
        assert!(repo.snapshot(SITE, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn forbidden_page_is_skipped_untouched() {
        let api = FakeApi::new();
        api.put_page(SITE, "a", "T1", 1, &[]);
        api.put_page(SITE, "secret", "T1", 1, &[]);
        api.fail_page(SITE, "secret", 403, "Access denied");
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);

        let report = sync.sync_site(SITE).await;
        assert_eq!(api.fetched(), vec!["a", "secret"]);
        assert_eq!((report.updated, report.forbidden, report.skipped, report.failed), (1, 1, 1, 0));
        assert!(repo.snapshot(SITE, "secret").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stored_key_is_the_requested_identifier() {
        let api = FakeApi::new();
        api.put_page(SITE, "scp-173", "T1", 1, &["euclid"]);
        api.set_record(
            SITE,
            "scp-173",
            PageRecord {
                fullname: "SCP-173".to_string(),
                updated_at: Some("T1".to_string()),
                revisions: 1,
                ..Default::default()
            },
        );
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);
        sync.sync_site(SITE).await;

        assert!(repo.snapshot(SITE, "scp-173").await.unwrap().is_some());
        assert!(repo.snapshot(SITE, "SCP-173").await.unwrap().is_none());

        api.reset();
        sync.sync_site(SITE).await;
        assert!(api.fetched().is_empty());
    }

    #[tokio::test]
    async fn store_failure_fails_only_that_page() {
        let api = FakeApi::new();
        api.put_page(SITE, "a", "T1", 1, &["boom"]);
        api.put_page(SITE, "b", "T1", 1, &["fine"]);
        let repo = repo().await;
        repo.execute_raw(
            "CREATE TRIGGER reject_tag BEFORE INSERT ON page_tags WHEN NEW.tag = 'boom'
             BEGIN SELECT RAISE(ABORT, 'tag rejected'); END;",
        )
        .await
        .unwrap();
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);

        let report = sync.sync_site(SITE).await;
        assert_eq!((report.updated, report.failed), (1, 1));
        assert!(repo.snapshot(SITE, "a").await.unwrap().is_none());
        assert_eq!(repo.page_tags(SITE, "b").await.unwrap(), vec!["fine"]);
        assert_eq!(api.calls("files.select"), 1);
    }

    #[tokio::test]
    async fn denied_site_does_not_stop_the_run() {
        let api = FakeApi::new();
        api.put_page("scp-jp", "a", "T1", 1, &[]);
        api.put_page(SITE, "b", "T1", 1, &[]);
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);

        api.fail_op("pages.select", 403, "Site is private");
        let report = sync.sync_site("scp-jp").await;
        assert_eq!(report.checked, 0);
        assert_eq!(api.calls("pages.select"), 1);
        api.heal_op("pages.select");

        let run = sync.sync_all(&sites(&[SITE, "scp-jp"])).await;
        let names: Vec<&str> = run.sites.iter().map(|r| r.site.as_str()).collect();
        assert_eq!(names, vec![SITE, "scp-jp"]);
        assert_eq!(run.total(|r| r.updated), 2);
    }

    #[tokio::test]
    async fn categories_are_replaced_each_sweep() {
        let api = FakeApi::new();
        api.set_categories(SITE, &["_default", "fragment"]);
        let repo = repo().await;
        let retry = RetryPolicy::test();
        let sync = Synchronizer::new(&api, &repo, &retry);
        sync.sync_site(SITE).await;

        api.set_categories(SITE, &["_default", "component"]);
        sync.sync_site(SITE).await;
        let stored = repo
            .query_strings("SELECT category FROM categories ORDER BY category")
            .await
            .unwrap();
        assert_eq!(stored, vec!["_default", "component"]);

        // A failed listing keeps what is stored.
        api.fail_op("categories.select", 500, "Internal error");
        sync.sync_site(SITE).await;
        let stored = repo
            .query_strings("SELECT category FROM categories ORDER BY category")
            .await
            .unwrap();
        assert_eq!(stored, vec!["_default", "component"]);
    }
}
