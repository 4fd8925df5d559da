use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{ApiError, ApiResult, ContentApi};
use crate::config::MAX_CHUNK_SIZE;
use crate::models::{FileRecord, PageMeta, PageRecord, PostRecord};

type Key = (String, String);

fn key(site: &str, name: &str) -> Key {
    (site.to_string(), name.to_string())
}

fn fault(code: i32, message: &str) -> ApiError {
    ApiError::Fault {
        code,
        message: message.to_string(),
    }
}

#[derive(Default)]
struct State {
    listing: HashMap<String, Vec<String>>,
    meta: HashMap<Key, PageMeta>,
    pages: HashMap<Key, PageRecord>,
    categories: HashMap<String, Vec<String>>,
    files: HashMap<Key, Vec<FileRecord>>,
    posts: HashMap<Key, Vec<PostRecord>>,
    /// Per-page fault returned by `pages.get_one`.
    page_faults: HashMap<Key, (i32, String)>,
    /// Metadata chunks containing one of these fail transiently.
    meta_faults: HashSet<Key>,
    /// Every call of these operations fails with the given fault.
    op_faults: HashMap<&'static str, (i32, String)>,
    /// File names and post ids left out of metadata responses.
    withheld: HashSet<String>,
    calls: HashMap<&'static str, usize>,
    fetched: Vec<String>,
}

/// Scripted in-memory [`ContentApi`] for engine tests.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<State>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes (or edits) a page: listing, metadata and full record.
    pub fn put_page(&self, site: &str, fullname: &str, updated_at: &str, revisions: i64, tags: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let listing = state.listing.entry(site.to_string()).or_default();
        if !listing.iter().any(|p| p == fullname) {
            listing.push(fullname.to_string());
        }
        state.meta.insert(
            key(site, fullname),
            PageMeta {
                updated_at: Some(updated_at.to_string()),
                revisions: Some(revisions),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
        );
        state.pages.insert(
            key(site, fullname),
            PageRecord {
                fullname: fullname.to_string(),
                title: Some(format!("Title of {}", fullname)),
                created_by: Some("author".to_string()),
                updated_at: Some(updated_at.to_string()),
                revisions,
                rating: 3,
                content: Some(format!("{} @ {}", fullname, updated_at)),
                ..Default::default()
            },
        );
        state.page_faults.remove(&key(site, fullname));
    }

    /// Lists an already published page once more.
    pub fn relist(&self, site: &str, fullname: &str) {
        self.state
            .lock()
            .unwrap()
            .listing
            .entry(site.to_string())
            .or_default()
            .push(fullname.to_string());
    }

    /// Overrides the record returned by the full fetch.
    pub fn set_record(&self, site: &str, fullname: &str, record: PageRecord) {
        self.state.lock().unwrap().pages.insert(key(site, fullname), record);
    }

    /// The page still shows in listing and metadata but the full fetch
    /// reports it missing.
    pub fn delete_page(&self, site: &str, fullname: &str) {
        self.fail_page(site, fullname, 406, "Page does not exist");
    }

    pub fn fail_page(&self, site: &str, fullname: &str, code: i32, message: &str) {
        self.state
            .lock()
            .unwrap()
            .page_faults
            .insert(key(site, fullname), (code, message.to_string()));
    }

    pub fn drop_meta(&self, site: &str, fullname: &str) {
        self.state.lock().unwrap().meta.remove(&key(site, fullname));
    }

    pub fn fail_meta_chunk_with(&self, site: &str, fullname: &str) {
        self.state.lock().unwrap().meta_faults.insert(key(site, fullname));
    }

    pub fn fail_op(&self, op: &'static str, code: i32, message: &str) {
        self.state
            .lock()
            .unwrap()
            .op_faults
            .insert(op, (code, message.to_string()));
    }

    pub fn heal_op(&self, op: &'static str) {
        self.state.lock().unwrap().op_faults.remove(op);
    }

    pub fn set_categories(&self, site: &str, categories: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .categories
            .insert(site.to_string(), categories.iter().map(|c| c.to_string()).collect());
    }

    pub fn set_files(&self, site: &str, page: &str, files: Vec<FileRecord>) {
        self.state.lock().unwrap().files.insert(key(site, page), files);
    }

    pub fn set_posts(&self, site: &str, page: &str, posts: Vec<PostRecord>) {
        self.state.lock().unwrap().posts.insert(key(site, page), posts);
    }

    /// Keeps listing a file or post but drops it from its metadata batch.
    pub fn withhold(&self, name: &str) {
        self.state.lock().unwrap().withheld.insert(name.to_string());
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state.lock().unwrap().calls.get(op).copied().unwrap_or(0)
    }

    /// Full-content fetches since the last [`FakeApi::reset`], in order.
    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.calls.clear();
        state.fetched.clear();
    }

    fn enter(&self, op: &'static str) -> ApiResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(op).or_default() += 1;
        if let Some((code, message)) = state.op_faults.get(op) {
            return Err(fault(*code, message));
        }
        Ok(state)
    }
}

#[async_trait]
impl ContentApi for FakeApi {
    async fn list_pages(&self, site: &str) -> ApiResult<Vec<String>> {
        let state = self.enter("pages.select")?;
        Ok(state.listing.get(site).cloned().unwrap_or_default())
    }

    async fn pages_meta(&self, site: &str, pages: &[String]) -> ApiResult<HashMap<String, PageMeta>> {
        assert!(pages.len() <= MAX_CHUNK_SIZE, "metadata batch of {}", pages.len());
        let state = self.enter("pages.get_meta")?;
        if pages.iter().any(|p| state.meta_faults.contains(&key(site, p))) {
            return Err(fault(500, "Internal error"));
        }
        Ok(pages
            .iter()
            .filter_map(|p| state.meta.get(&key(site, p)).map(|m| (p.clone(), m.clone())))
            .collect())
    }

    async fn page(&self, site: &str, fullname: &str) -> ApiResult<PageRecord> {
        let mut state = self.enter("pages.get_one")?;
        state.fetched.push(fullname.to_string());
        if let Some((code, message)) = state.page_faults.get(&key(site, fullname)) {
            return Err(fault(*code, message));
        }
        state
            .pages
            .get(&key(site, fullname))
            .cloned()
            .ok_or_else(|| fault(406, "Page not found"))
    }

    async fn categories(&self, site: &str) -> ApiResult<Vec<String>> {
        let state = self.enter("categories.select")?;
        Ok(state.categories.get(site).cloned().unwrap_or_default())
    }

    async fn list_files(&self, site: &str, page: &str) -> ApiResult<Vec<String>> {
        let state = self.enter("files.select")?;
        Ok(state
            .files
            .get(&key(site, page))
            .map(|files| files.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default())
    }

    async fn files_meta(
        &self,
        site: &str,
        page: &str,
        files: &[String],
    ) -> ApiResult<HashMap<String, FileRecord>> {
        assert!(files.len() <= MAX_CHUNK_SIZE, "file batch of {}", files.len());
        let state = self.enter("files.get_meta")?;
        Ok(state
            .files
            .get(&key(site, page))
            .map(|all| {
                all.iter()
                    .filter(|f| files.contains(&f.name) && !state.withheld.contains(&f.name))
                    .map(|f| (f.name.clone(), f.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_posts(&self, site: &str, page: &str) -> ApiResult<Vec<String>> {
        let state = self.enter("posts.select")?;
        Ok(state
            .posts
            .get(&key(site, page))
            .map(|posts| posts.iter().map(|p| p.id.clone()).collect())
            .unwrap_or_default())
    }

    async fn posts(&self, site: &str, ids: &[String]) -> ApiResult<HashMap<String, PostRecord>> {
        assert!(ids.len() <= MAX_CHUNK_SIZE, "post batch of {}", ids.len());
        let state = self.enter("posts.get")?;
        Ok(state
            .posts
            .iter()
            .filter(|((s, _), _)| s == site)
            .flat_map(|(_, posts)| posts.iter())
            .filter(|p| ids.contains(&p.id) && !state.withheld.contains(&p.id))
            .map(|p| (p.id.clone(), p.clone()))
            .collect())
    }
}
