//! Custom fields attached to posts.
//!
//! Meta values are plain strings keyed by name, at most one per
//! `(post, key)` pair. Anything typed (numbers, flags, URLs) is converted
//! by the caller, e.g. through [`Post::get_meta_parsed`].

use std::collections::BTreeMap;
use std::str::FromStr;

use log::debug;
use rusqlite::OptionalExtension;

use crate::db::ConnectionMethods;
use crate::post::Post;
use crate::{Error, Result, ValidationError};

/// One stored meta row.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostMeta {
    pub id: i64,
    pub post_id: i64,
    pub meta_key: String,
    pub meta_value: String,
}

/// Set `key` on post `post_id`, overwriting any existing value. Repeated
/// calls leave exactly one row.
pub fn set_meta(conn: &impl ConnectionMethods, post_id: i64, key: &str, value: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(ValidationError::MissingField("meta_key").into());
    }
    if Post::try_get(conn, post_id)?.is_none() {
        return Err(Error::not_found("post", post_id));
    }
    let sql = "INSERT INTO post_meta (post_id, meta_key, meta_value) VALUES (?1, ?2, ?3) \
               ON CONFLICT (post_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value";
    debug!("upsert sql {}", sql);
    conn.sqlite()
        .execute(sql, rusqlite::params![post_id, key, value])?;
    Ok(())
}

/// The value of `key` on post `post_id`, if set.
pub fn get_meta(conn: &impl ConnectionMethods, post_id: i64, key: &str) -> Result<Option<String>> {
    Ok(conn
        .sqlite()
        .query_row(
            "SELECT meta_value FROM post_meta WHERE post_id = ?1 AND meta_key = ?2",
            rusqlite::params![post_id, key],
            |row| row.get(0),
        )
        .optional()?)
}

/// Every meta value on post `post_id`.
pub fn get_all_meta(conn: &impl ConnectionMethods, post_id: i64) -> Result<BTreeMap<String, String>> {
    let mut stmt = conn
        .sqlite()
        .prepare("SELECT meta_key, meta_value FROM post_meta WHERE post_id = ?1")?;
    let all = stmt
        .query_map([post_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;
    Ok(all)
}

/// Remove `key` from post `post_id`. Returns whether it was set.
pub fn delete_meta(conn: &impl ConnectionMethods, post_id: i64, key: &str) -> Result<bool> {
    let changed = conn.sqlite().execute(
        "DELETE FROM post_meta WHERE post_id = ?1 AND meta_key = ?2",
        rusqlite::params![post_id, key],
    )?;
    Ok(changed > 0)
}

/// The raw meta rows of post `post_id`, in insertion order.
pub fn meta_rows(conn: &impl ConnectionMethods, post_id: i64) -> Result<Vec<PostMeta>> {
    let mut stmt = conn.sqlite().prepare(
        "SELECT id, post_id, meta_key, meta_value FROM post_meta WHERE post_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([post_id], |row| {
            Ok(PostMeta {
                id: row.get(0)?,
                post_id: row.get(1)?,
                meta_key: row.get(2)?,
                meta_value: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<PostMeta>>>()?;
    Ok(rows)
}

impl Post {
    /// Set a custom field, overwriting any previous value.
    pub fn set_meta(&self, conn: &impl ConnectionMethods, key: &str, value: &str) -> Result<()> {
        set_meta(conn, self.id, key, value)
    }

    /// A custom field, or `None` if it is not set.
    pub fn get_meta(&self, conn: &impl ConnectionMethods, key: &str) -> Result<Option<String>> {
        get_meta(conn, self.id, key)
    }

    /// A custom field, or `default` if it is not set.
    pub fn get_meta_or(
        &self,
        conn: &impl ConnectionMethods,
        key: &str,
        default: &str,
    ) -> Result<String> {
        Ok(self
            .get_meta(conn, key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// A custom field parsed as `T`. `Ok(None)` if it is not set; the
    /// parse error if it does not parse.
    pub fn get_meta_parsed<T: FromStr>(
        &self,
        conn: &impl ConnectionMethods,
        key: &str,
    ) -> Result<Option<std::result::Result<T, T::Err>>> {
        Ok(self.get_meta(conn, key)?.map(|v| v.parse::<T>()))
    }

    /// Every custom field on this post.
    pub fn get_all_meta(&self, conn: &impl ConnectionMethods) -> Result<BTreeMap<String, String>> {
        get_all_meta(conn, self.id)
    }

    /// Remove a custom field. Returns whether it was set.
    pub fn delete_meta(&self, conn: &impl ConnectionMethods, key: &str) -> Result<bool> {
        delete_meta(conn, self.id, key)
    }
}
