//! DDL for the unified content model.

use log::info;

use crate::db::ConnectionMethods;
use crate::Result;

/// Bookkeeping table recording applied migrations.
pub const MIGRATIONS_TABLE: &str = "quill_migrations";

const POST_TYPES: &str = "CREATE TABLE IF NOT EXISTS post_types (
    id INTEGER NOT NULL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    label TEXT NOT NULL,
    label_singular TEXT NOT NULL,
    description TEXT,
    hierarchical INTEGER NOT NULL DEFAULT 0,
    has_archive INTEGER NOT NULL DEFAULT 0,
    supports_categories INTEGER NOT NULL DEFAULT 0,
    supports_tags INTEGER NOT NULL DEFAULT 0,
    supports_excerpt INTEGER NOT NULL DEFAULT 0,
    supports_featured_image INTEGER NOT NULL DEFAULT 0,
    menu_icon TEXT,
    menu_position INTEGER NOT NULL DEFAULT 5,
    show_in_menu INTEGER NOT NULL DEFAULT 1
);";

// The post_type reference is deferred: the unification inserts posts
// before it seeds the registry, inside one transaction.
const POSTS: &str = "CREATE TABLE IF NOT EXISTS posts (
    id INTEGER NOT NULL PRIMARY KEY,
    title TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL,
    excerpt TEXT,
    author TEXT NOT NULL DEFAULT 'Admin',
    post_type TEXT NOT NULL DEFAULT 'post'
        REFERENCES post_types (name) DEFERRABLE INITIALLY DEFERRED,
    post_status TEXT NOT NULL DEFAULT 'draft'
        CHECK (post_status IN ('draft', 'publish', 'private', 'pending')),
    post_parent INTEGER REFERENCES posts (id) ON DELETE SET NULL,
    featured INTEGER NOT NULL DEFAULT 0,
    category TEXT,
    tags TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    published_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_posts_type_status ON posts (post_type, post_status);
CREATE INDEX IF NOT EXISTS idx_posts_parent ON posts (post_parent);
CREATE INDEX IF NOT EXISTS idx_posts_published_at ON posts (published_at);";

const POST_META: &str = "CREATE TABLE IF NOT EXISTS post_meta (
    id INTEGER NOT NULL PRIMARY KEY,
    post_id INTEGER NOT NULL REFERENCES posts (id) ON DELETE CASCADE,
    meta_key TEXT NOT NULL,
    meta_value TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_post_meta_key ON post_meta (post_id, meta_key);";

const MIGRATIONS: &str = "CREATE TABLE IF NOT EXISTS quill_migrations (
    name TEXT NOT NULL PRIMARY KEY,
    applied_at TEXT NOT NULL
);";

/// Create any missing table or index of the unified model. Existing
/// tables are left as they are.
pub fn create_tables(conn: &impl ConnectionMethods) -> Result<()> {
    for ddl in [POST_TYPES, POSTS, POST_META, MIGRATIONS] {
        conn.execute(ddl)?;
    }
    Ok(())
}

/// Prepare an empty database for use without any legacy data: create the
/// tables and register the default post types.
pub fn install(conn: &impl ConnectionMethods) -> Result<usize> {
    create_tables(conn)?;
    let added = crate::PostType::seed_defaults(conn)?;
    info!("installed unified schema, {added} post types registered");
    Ok(added)
}

/// Whether the named migration has been recorded as applied.
pub fn is_applied(conn: &impl ConnectionMethods, name: &str) -> Result<bool> {
    if !conn.has_table(MIGRATIONS_TABLE)? {
        return Ok(false);
    }
    let count: i64 = conn.sqlite().query_row(
        "SELECT COUNT(*) FROM quill_migrations WHERE name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Record the named migration as applied now.
pub fn mark_applied(conn: &impl ConnectionMethods, name: &str) -> Result<()> {
    conn.sqlite().execute(
        "INSERT INTO quill_migrations (name, applied_at) VALUES (?1, ?2)",
        rusqlite::params![name, crate::sqlval::timestamp_to_sql(&crate::sqlval::now())],
    )?;
    Ok(())
}
