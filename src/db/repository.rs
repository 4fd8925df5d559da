use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{FileRecord, PageRecord, PageSnapshot, PostRecord, StoredPage};

use super::schema::{ADD_DELETED_AT, DELETED_AT_INDEX, SCHEMA};

/// The single store handle shared by the whole run. Every mutating method is
/// one transaction.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            let mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            tracing::debug!("SQLite journal mode: {}", mode);

            conn.execute_batch(SCHEMA)?;
            ensure_deleted_at_column(conn)?;
            conn.execute_batch(DELETED_AT_INDEX)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Sync state

    pub async fn snapshot(&self, site: &str, fullname: &str) -> Result<Option<PageSnapshot>> {
        let site = site.to_string();
        let fullname = fullname.to_string();
        let snapshot = self
            .conn
            .call(move |conn| {
                let snapshot = conn
                    .query_row(
                        "SELECT updated_at, revisions, deleted_at FROM pages WHERE site = ?1 AND fullname = ?2",
                        params![site, fullname],
                        snapshot_from_row,
                    )
                    .optional()?;
                Ok(snapshot)
            })
            .await?;
        Ok(snapshot)
    }

    // Page operations

    /// Overwrites the page row (reactivating it) and replaces its tag set,
    /// atomically.
    pub async fn upsert_page_with_tags(
        &self,
        site: &str,
        page: &PageRecord,
        tags: &[String],
    ) -> Result<()> {
        let site = site.to_string();
        let page = page.clone();
        let tags = tags.to_vec();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    r#"INSERT INTO pages (
                           site, fullname, title, created_at, created_by, updated_at, updated_by,
                           parent_fullname, parent_title, rating, revisions, children, comments,
                           commented_at, commented_by, content, html, deleted_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, NULL)
                       ON CONFLICT(site, fullname) DO UPDATE SET
                           title = excluded.title,
                           created_at = excluded.created_at,
                           created_by = excluded.created_by,
                           updated_at = excluded.updated_at,
                           updated_by = excluded.updated_by,
                           parent_fullname = excluded.parent_fullname,
                           parent_title = excluded.parent_title,
                           rating = excluded.rating,
                           revisions = excluded.revisions,
                           children = excluded.children,
                           comments = excluded.comments,
                           commented_at = excluded.commented_at,
                           commented_by = excluded.commented_by,
                           content = excluded.content,
                           html = excluded.html,
                           deleted_at = NULL"#,
                    params![
                        site,
                        page.fullname,
                        page.title,
                        page.created_at,
                        page.created_by,
                        page.updated_at,
                        page.updated_by,
                        page.parent_fullname,
                        page.parent_title,
                        page.rating,
                        page.revisions,
                        page.children,
                        page.comments,
                        page.commented_at,
                        page.commented_by,
                        page.content,
                        page.html,
                    ],
                )?;

                tx.execute(
                    "DELETE FROM page_tags WHERE site = ?1 AND fullname = ?2",
                    params![site, page.fullname],
                )?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO page_tags (site, fullname, tag) VALUES (?1, ?2, ?3)",
                    )?;
                    for tag in &tags {
                        stmt.execute(params![site, page.fullname, tag])?;
                    }
                }

                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Marks an active page as deleted. Returns false when nothing changed
    /// (no such row, or already tombstoned).
    pub async fn tombstone_page(
        &self,
        site: &str,
        fullname: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<bool> {
        let site = site.to_string();
        let fullname = fullname.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE pages SET deleted_at = ?1 WHERE site = ?2 AND fullname = ?3 AND deleted_at IS NULL",
                    params![deleted_at.to_rfc3339(), site, fullname],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    // Site-wide collections

    pub async fn replace_categories(&self, site: &str, categories: &[String]) -> Result<()> {
        let site = site.to_string();
        let categories = categories.to_vec();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM categories WHERE site = ?1", params![site])?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO categories (site, category) VALUES (?1, ?2)",
                    )?;
                    for category in &categories {
                        stmt.execute(params![site, category])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Page attachments

    pub async fn replace_files(&self, site: &str, page: &str, files: &[FileRecord]) -> Result<()> {
        let site = site.to_string();
        let page = page.to_string();
        let files = files.to_vec();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM files WHERE site = ?1 AND page_fullname = ?2",
                    params![site, page],
                )?;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT OR REPLACE INTO files (
                               site, page_fullname, file_name, size, comment, mime_type,
                               mime_description, uploaded_by, uploaded_at, download_url)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                    )?;
                    for file in &files {
                        stmt.execute(params![
                            site,
                            page,
                            file.name,
                            file.size,
                            file.comment,
                            file.mime_type,
                            file.mime_description,
                            file.uploaded_by,
                            file.uploaded_at,
                            file.download_url,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn replace_posts(&self, site: &str, page: &str, posts: &[PostRecord]) -> Result<()> {
        let site = site.to_string();
        let page = page.to_string();
        let posts = posts.to_vec();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM posts WHERE site = ?1 AND page_fullname = ?2",
                    params![site, page],
                )?;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT OR REPLACE INTO posts (
                               site, post_id, page_fullname, reply_to, title, content,
                               html, created_by, created_at, replies)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                    )?;
                    for post in &posts {
                        stmt.execute(params![
                            site,
                            post.id,
                            page,
                            post.reply_to,
                            post.title,
                            post.content,
                            post.html,
                            post.created_by,
                            post.created_at,
                            post.replies,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Read side

    /// `(active, tombstoned)` page counts for a site.
    pub async fn page_counts(&self, site: &str) -> Result<(usize, usize)> {
        let site = site.to_string();
        let counts = self
            .conn
            .call(move |conn| {
                let counts = conn.query_row(
                    r#"SELECT COALESCE(SUM(deleted_at IS NULL), 0), COALESCE(SUM(deleted_at IS NOT NULL), 0)
                       FROM pages WHERE site = ?1"#,
                    params![site],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )?;
                Ok(counts)
            })
            .await?;
        Ok((counts.0 as usize, counts.1 as usize))
    }

    pub async fn active_pages(&self) -> Result<Vec<StoredPage>> {
        let pages = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT site, fullname, title, content, created_by, created_at, updated_at, rating
                       FROM pages
                       WHERE deleted_at IS NULL
                       ORDER BY site, fullname"#,
                )?;
                let pages = stmt
                    .query_map([], stored_page_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(pages)
            })
            .await?;
        Ok(pages)
    }

    pub async fn page_tags(&self, site: &str, fullname: &str) -> Result<Vec<String>> {
        let site = site.to_string();
        let fullname = fullname.to_string();
        let tags = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT tag FROM page_tags WHERE site = ?1 AND fullname = ?2 ORDER BY rowid",
                )?;
                let tags = stmt
                    .query_map(params![site, fullname], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(tags)
            })
            .await?;
        Ok(tags)
    }
}

fn ensure_deleted_at_column(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info('pages')")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if !columns.iter().any(|c| c == "deleted_at") {
        tracing::info!("Adding 'deleted_at' column to 'pages' table");
        conn.execute(ADD_DELETED_AT, [])?;
    }
    Ok(())
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

// Any non-null deleted_at is a tombstone, even if the text is unparseable.
fn snapshot_from_row(row: &Row) -> rusqlite::Result<PageSnapshot> {
    Ok(PageSnapshot {
        updated_at: row.get(0)?,
        revisions: row.get(1)?,
        deleted_at: row
            .get::<_, Option<String>>(2)?
            .map(|s| parse_datetime(&s).unwrap_or_default()),
    })
}

fn stored_page_from_row(row: &Row) -> rusqlite::Result<StoredPage> {
    Ok(StoredPage {
        site: row.get(0)?,
        fullname: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        rating: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
    })
}

#[cfg(test)]
impl Repository {
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn query_strings(&self, sql: &str) -> Result<Vec<String>> {
        let sql = sql.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    pub async fn stored_page(&self, site: &str, fullname: &str) -> Result<Option<PageRecord>> {
        let site = site.to_string();
        let fullname = fullname.to_string();
        let page = self
            .conn
            .call(move |conn| {
                let page = conn
                    .query_row(
                        r#"SELECT fullname, title, created_at, created_by, updated_at, updated_by,
                                  parent_fullname, parent_title, rating, revisions, children, comments,
                                  commented_at, commented_by, content, html
                           FROM pages WHERE site = ?1 AND fullname = ?2"#,
                        params![site, fullname],
                        |row| {
                            Ok(PageRecord {
                                fullname: row.get(0)?,
                                title: row.get(1)?,
                                created_at: row.get(2)?,
                                created_by: row.get(3)?,
                                updated_at: row.get(4)?,
                                updated_by: row.get(5)?,
                                parent_fullname: row.get(6)?,
                                parent_title: row.get(7)?,
                                rating: row.get(8)?,
                                revisions: row.get(9)?,
                                children: row.get(10)?,
                                comments: row.get(11)?,
                                commented_at: row.get(12)?,
                                commented_by: row.get(13)?,
                                content: row.get(14)?,
                                html: row.get(15)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(page)
            })
            .await?;
        Ok(page)
    }
}
