pub const SCHEMA: &str = r#"
-- pages table (one row per site + fullname; deleted_at marks tombstones)
CREATE TABLE IF NOT EXISTS pages (
    site TEXT NOT NULL,
    fullname TEXT NOT NULL,
    title TEXT,
    created_at TEXT,
    created_by TEXT,
    updated_at TEXT,
    updated_by TEXT,
    parent_fullname TEXT,
    parent_title TEXT,
    rating INTEGER,
    revisions INTEGER,
    children INTEGER,
    comments INTEGER,
    commented_at TEXT,
    commented_by TEXT,
    content TEXT,
    html TEXT,
    deleted_at TEXT DEFAULT NULL,
    PRIMARY KEY (site, fullname)
);

-- page_tags table
CREATE TABLE IF NOT EXISTS page_tags (
    site TEXT NOT NULL,
    fullname TEXT NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (site, fullname, tag),
    FOREIGN KEY (site, fullname) REFERENCES pages (site, fullname)
        ON DELETE CASCADE ON UPDATE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_page_tags_tag ON page_tags(tag);

-- categories table (replaced per site on every sweep)
CREATE TABLE IF NOT EXISTS categories (
    site TEXT NOT NULL,
    category TEXT NOT NULL,
    PRIMARY KEY (site, category)
);

-- files table
CREATE TABLE IF NOT EXISTS files (
    site TEXT NOT NULL,
    page_fullname TEXT NOT NULL,
    file_name TEXT NOT NULL,
    size INTEGER,
    comment TEXT,
    mime_type TEXT,
    mime_description TEXT,
    uploaded_by TEXT,
    uploaded_at TEXT,
    download_url TEXT,
    PRIMARY KEY (site, page_fullname, file_name),
    FOREIGN KEY (site, page_fullname) REFERENCES pages (site, fullname)
        ON DELETE CASCADE ON UPDATE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_files_page ON files(site, page_fullname);

-- posts table (page comments)
CREATE TABLE IF NOT EXISTS posts (
    site TEXT NOT NULL,
    post_id TEXT NOT NULL,
    page_fullname TEXT NOT NULL,
    reply_to TEXT,
    title TEXT,
    content TEXT,
    html TEXT,
    created_by TEXT,
    created_at TEXT,
    replies INTEGER,
    PRIMARY KEY (site, post_id),
    FOREIGN KEY (site, page_fullname) REFERENCES pages (site, fullname)
        ON DELETE CASCADE ON UPDATE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_posts_page ON posts(site, page_fullname);

-- users table (reserved, not populated by the sync)
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    title TEXT,
    PRIMARY KEY (user_id)
);
"#;

/// Older databases predate tombstones.
pub const ADD_DELETED_AT: &str = "ALTER TABLE pages ADD COLUMN deleted_at TEXT DEFAULT NULL";

pub const DELETED_AT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_pages_deleted ON pages(deleted_at)";
