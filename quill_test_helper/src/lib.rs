//! Test helpers to set up database connections and legacy fixtures.
//! Depends on [`quill_core`], `env_logger` and [`log`].
#![deny(missing_docs)]

use std::path::{Path, PathBuf};

use quill_core::db::{self, ConnectionMethods, ConnectionSpec};
use quill_core::migrations::schema;
use tempfile::TempDir;

pub use quill_core::db::Connection;

/// Schema of a legacy installation keeping category and tags as text on
/// each post.
pub const LEGACY_SCHEMA: &str = "
CREATE TABLE blog_posts (
    id INTEGER NOT NULL PRIMARY KEY,
    title VARCHAR(200) NOT NULL,
    slug VARCHAR(200) NOT NULL UNIQUE,
    content TEXT NOT NULL,
    excerpt VARCHAR(500),
    author VARCHAR(100) NOT NULL DEFAULT 'Admin',
    published BOOLEAN NOT NULL DEFAULT 0,
    featured BOOLEAN NOT NULL DEFAULT 0,
    category VARCHAR(100),
    tags VARCHAR(500),
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL,
    published_at DATETIME
);
";

/// Schema of a legacy installation keeping categories and tags in their
/// own tables.
pub const TAXONOMY_SCHEMA: &str = "
CREATE TABLE categories (
    id INTEGER NOT NULL PRIMARY KEY,
    name VARCHAR(100) NOT NULL UNIQUE,
    slug VARCHAR(120) UNIQUE
);
CREATE TABLE tags (
    id INTEGER NOT NULL PRIMARY KEY,
    name VARCHAR(100) NOT NULL UNIQUE,
    slug VARCHAR(120) UNIQUE
);
CREATE TABLE blog_posts (
    id INTEGER NOT NULL PRIMARY KEY,
    title VARCHAR(200) NOT NULL,
    slug VARCHAR(200) NOT NULL UNIQUE,
    content TEXT NOT NULL,
    excerpt VARCHAR(500),
    author VARCHAR(100) NOT NULL DEFAULT 'Admin',
    published BOOLEAN NOT NULL DEFAULT 0,
    featured BOOLEAN NOT NULL DEFAULT 0,
    category_id INTEGER REFERENCES categories (id),
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL,
    published_at DATETIME
);
CREATE TABLE post_tags (
    post_id INTEGER NOT NULL REFERENCES blog_posts (id),
    tag_id INTEGER NOT NULL REFERENCES tags (id),
    PRIMARY KEY (post_id, tag_id)
);
";

const LEGACY_PAGES: &str = "
CREATE TABLE pages (
    id INTEGER NOT NULL PRIMARY KEY,
    title VARCHAR(200) NOT NULL,
    slug VARCHAR(200) NOT NULL UNIQUE,
    content TEXT NOT NULL,
    sidebar_content TEXT,
    layout VARCHAR(50) NOT NULL DEFAULT 'full-width',
    content_type VARCHAR(20) NOT NULL DEFAULT 'markdown',
    published BOOLEAN NOT NULL DEFAULT 0,
    show_in_nav BOOLEAN NOT NULL DEFAULT 0,
    nav_order INTEGER DEFAULT 0,
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL,
    published_at DATETIME
);
";

/// Timestamp written on every legacy fixture row.
pub const LEGACY_CREATED_AT: &str = "2024-06-01 08:30:00.000000";

/// Initialise logging for a test. Safe to call repeatedly.
pub fn common_setup() {
    env_logger::try_init().ok();
}

/// Create a sqlite in-memory [`Connection`].
pub fn sqlite_connection() -> Connection {
    common_setup();
    log::info!("connecting to sqlite memory database..");
    Connection::open_in_memory().expect("Could not open sqlite memory database")
}

/// Create a sqlite in-memory [`ConnectionSpec`].
pub fn sqlite_connspec() -> ConnectionSpec {
    ConnectionSpec::new(db::BACKEND_NAME, db::MEMORY)
}

/// Populate the database with the unified schema and the default post types.
pub fn setup_db(conn: &Connection) {
    schema::install(conn).expect("Could not install schema");
    log::info!("installed unified schema");
}

/// An in-memory connection with the unified schema installed.
pub fn migrated_connection() -> Connection {
    let conn = sqlite_connection();
    setup_db(&conn);
    conn
}

/// Run `test` on a fresh in-memory connection, with the unified schema
/// installed if `migrate` is set.
pub fn run_test(test: impl FnOnce(Connection), migrate: bool) {
    let conn = sqlite_connection();
    if migrate {
        setup_db(&conn);
    }
    log::info!("running sqlite test");
    test(conn);
}

/// Create the legacy `blog_posts` and `pages` tables.
pub fn create_legacy_schema(conn: &impl ConnectionMethods) {
    conn.execute(LEGACY_SCHEMA)
        .and_then(|_| conn.execute(LEGACY_PAGES))
        .expect("Could not create legacy schema");
}

/// Create the legacy tables with categories and tags in their own tables.
pub fn create_taxonomy_schema(conn: &impl ConnectionMethods) {
    conn.execute(TAXONOMY_SCHEMA)
        .and_then(|_| conn.execute(LEGACY_PAGES))
        .expect("Could not create legacy taxonomy schema");
}

/// Insert a post into a [`TAXONOMY_SCHEMA`] database, creating its
/// category and tags as needed, and return its id.
pub fn insert_tagged_post(
    conn: &impl ConnectionMethods,
    title: &str,
    slug: &str,
    category: Option<&str>,
    tags: &[&str],
) -> i64 {
    let sqlite = conn.sqlite();
    let category_id: Option<i64> = category.map(|name| {
        sqlite
            .execute("INSERT OR IGNORE INTO categories (name) VALUES (?1)", [name])
            .and_then(|_| {
                sqlite.query_row("SELECT id FROM categories WHERE name = ?1", [name], |row| {
                    row.get(0)
                })
            })
            .expect("Could not insert category")
    });
    sqlite
        .execute(
            "INSERT INTO blog_posts (title, slug, content, published, category_id, \
             created_at, updated_at) VALUES (?1, ?2, ?3, 1, ?4, ?5, ?5)",
            rusqlite::params![
                title,
                slug,
                format!("Body of {title}"),
                category_id,
                LEGACY_CREATED_AT,
            ],
        )
        .expect("Could not insert legacy post");
    let post_id = sqlite.last_insert_rowid();
    for tag in tags {
        sqlite
            .execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", [tag])
            .and_then(|_| {
                sqlite.execute(
                    "INSERT INTO post_tags (post_id, tag_id) \
                     SELECT ?1, id FROM tags WHERE name = ?2",
                    rusqlite::params![post_id, tag],
                )
            })
            .expect("Could not tag legacy post");
    }
    post_id
}

/// Insert a row into the legacy `blog_posts` table and return its id.
pub fn insert_legacy_post(
    conn: &impl ConnectionMethods,
    title: &str,
    slug: &str,
    published: bool,
) -> i64 {
    conn.sqlite()
        .execute(
            "INSERT INTO blog_posts (title, slug, content, excerpt, published, tags, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![
                title,
                slug,
                format!("Body of {title}"),
                format!("About {title}"),
                published,
                "legacy,imported",
                LEGACY_CREATED_AT,
            ],
        )
        .expect("Could not insert legacy post");
    conn.sqlite().last_insert_rowid()
}

/// Insert a row into the legacy `pages` table and return its id.
pub fn insert_legacy_page(
    conn: &impl ConnectionMethods,
    title: &str,
    slug: &str,
    layout: &str,
    show_in_nav: bool,
) -> i64 {
    conn.sqlite()
        .execute(
            "INSERT INTO pages (title, slug, content, layout, published, show_in_nav, nav_order, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, 1, ?5, 3, ?6, ?6)",
            rusqlite::params![
                title,
                slug,
                format!("Body of {title}"),
                layout,
                show_in_nav,
                LEGACY_CREATED_AT,
            ],
        )
        .expect("Could not insert legacy page");
    conn.sqlite().last_insert_rowid()
}

/// A sqlite database file in a temporary directory, removed on drop.
#[derive(Debug)]
pub struct TempDatabase {
    dir: TempDir,
    path: PathBuf,
}

impl TempDatabase {
    /// Create an empty temporary directory to hold `blog.db`.
    pub fn new() -> Self {
        common_setup();
        let dir = tempfile::tempdir().expect("Could not create temp dir");
        let path = dir.path().join("blog.db");
        TempDatabase { dir, path }
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A directory for backups, inside the temporary directory.
    pub fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    /// Open a connection to the database file.
    pub fn connect(&self) -> Connection {
        Connection::open(&self.path).expect("Could not open sqlite database file")
    }

    /// Connection spec naming the database file.
    pub fn connspec(&self) -> ConnectionSpec {
        ConnectionSpec::sqlite(&self.path)
    }

    /// Current bytes of the database file.
    pub fn bytes(&self) -> Vec<u8> {
        std::fs::read(&self.path).expect("Could not read database file")
    }
}

impl Default for TempDatabase {
    fn default() -> Self {
        Self::new()
    }
}
