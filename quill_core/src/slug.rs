//! URL slugs.
//!
//! Slugs identify posts in URLs and are unique across every post type.

use std::sync::LazyLock;

use regex::Regex;
use rusqlite::OptionalExtension;

use crate::db::ConnectionMethods;
use crate::Result;

static NON_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));
static VALID_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid regex"));

/// Turn arbitrary text into a slug: lowercase ASCII letters and digits
/// separated by single hyphens. Text with nothing usable becomes `item`.
pub fn slugify(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let slug = NON_SLUG_CHARS.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "item".to_string()
    } else {
        slug.to_string()
    }
}

/// Whether `slug` is already in canonical slug form.
pub fn is_valid_slug(slug: &str) -> bool {
    VALID_SLUG.is_match(slug)
}

/// Whether any post other than `exclude_id` uses `slug`.
pub fn slug_in_use(
    conn: &impl ConnectionMethods,
    slug: &str,
    exclude_id: Option<i64>,
) -> Result<bool> {
    let found: Option<i64> = conn
        .sqlite()
        .query_row(
            "SELECT id FROM posts WHERE slug = ?1 AND (?2 IS NULL OR id <> ?2) LIMIT 1",
            rusqlite::params![slug, exclude_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Return `base` if no other post uses it, otherwise the first free
/// `base-2`, `base-3`, ... Pass the id of the post being edited as
/// `exclude_id` so it does not collide with itself.
pub fn ensure_unique_slug(
    conn: &impl ConnectionMethods,
    base: &str,
    exclude_id: Option<i64>,
) -> Result<String> {
    let mut slug = base.to_string();
    let mut i = 2;
    while slug_in_use(conn, &slug, exclude_id)? {
        slug = format!("{base}-{i}");
        i += 1;
    }
    Ok(slug)
}
