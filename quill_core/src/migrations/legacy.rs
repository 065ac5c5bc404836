//! Reading the legacy `blog_posts` and `pages` tables.
//!
//! Older installations did not all have the same columns, so the layout is
//! discovered from the table itself. Missing optional columns read as NULL.
//! Installations that keep categories and tags in their own tables have
//! the names joined onto each post.

use chrono::naive::NaiveDateTime;

use crate::db::ConnectionMethods;
use crate::sqlval::{opt_timestamp_from_sql, timestamp_from_sql};
use crate::{Error, Result};

/// Legacy blog post table.
pub const POSTS_TABLE: &str = "blog_posts";
/// Legacy page table.
pub const PAGES_TABLE: &str = "pages";
/// Category names, referenced by `blog_posts.category_id`.
pub const CATEGORIES_TABLE: &str = "categories";
/// Tag names.
pub const TAGS_TABLE: &str = "tags";
/// Links between `blog_posts` and `tags`.
pub const POST_TAGS_TABLE: &str = "post_tags";

const REQUIRED: [&str; 6] = ["id", "title", "slug", "content", "published", "created_at"];

const POST_OPTIONAL: [&str; 7] = [
    "excerpt",
    "author",
    "featured",
    "category",
    "tags",
    "updated_at",
    "published_at",
];

const PAGE_OPTIONAL: [&str; 7] = [
    "sidebar_content",
    "layout",
    "content_type",
    "show_in_nav",
    "nav_order",
    "updated_at",
    "published_at",
];

/// The columns found on one legacy table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyTable {
    name: &'static str,
    columns: Vec<String>,
    category_names: bool,
    tag_names: bool,
}

impl LegacyTable {
    /// Inspect `name`, failing the pre-check if it is missing or lacks a
    /// required column.
    pub fn inspect(conn: &impl ConnectionMethods, name: &'static str) -> Result<Self> {
        if !conn.has_table(name)? {
            return Err(Error::MigrationPrecheck(format!(
                "legacy table {name} does not exist"
            )));
        }
        let columns = conn.table_columns(name)?;
        if let Some(missing) = REQUIRED
            .iter()
            .find(|c| !columns.iter().any(|have| have.as_str() == **c))
        {
            return Err(Error::MigrationPrecheck(format!(
                "legacy table {name} has no {missing} column"
            )));
        }
        let is_posts = name == POSTS_TABLE;
        let category_names = is_posts
            && !columns.iter().any(|c| c == "category")
            && columns.iter().any(|c| c == "category_id")
            && conn.has_table(CATEGORIES_TABLE)?;
        let tag_names = is_posts
            && !columns.iter().any(|c| c == "tags")
            && conn.has_table(POST_TAGS_TABLE)?
            && conn.has_table(TAGS_TABLE)?;

        // Dropping the table must not break a foreign key.
        for table in referencing_tables(conn, name)? {
            if !(tag_names && table == POST_TAGS_TABLE) {
                return Err(Error::MigrationPrecheck(format!(
                    "table {table} references legacy table {name}"
                )));
            }
        }
        Ok(LegacyTable {
            name,
            columns,
            category_names,
            tag_names,
        })
    }

    /// The table name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Link tables whose rows were folded into this table's posts. They
    /// are dropped along with it.
    pub fn link_tables(&self) -> Vec<&'static str> {
        if self.tag_names {
            vec![POST_TAGS_TABLE]
        } else {
            Vec::new()
        }
    }

    fn has(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    fn column(&self, column: &str) -> String {
        let table = self.name;
        match column {
            c if self.has(c) => c.to_string(),
            "category" if self.category_names => format!(
                "(SELECT name FROM {CATEGORIES_TABLE} \
                 WHERE {CATEGORIES_TABLE}.id = {table}.category_id)"
            ),
            "tags" if self.tag_names => format!(
                "(SELECT GROUP_CONCAT(name, ',') FROM {TAGS_TABLE} WHERE id IN \
                 (SELECT tag_id FROM {POST_TAGS_TABLE} WHERE post_id = {table}.id))"
            ),
            _ => "NULL".to_string(),
        }
    }

    /// Select list with every optional column either named, joined from
    /// its own table or replaced by NULL.
    fn select(&self, optional: &[&str]) -> String {
        let mut cols: Vec<String> = REQUIRED.iter().map(|c| c.to_string()).collect();
        cols.extend(optional.iter().map(|col| self.column(col)));
        format!("SELECT {} FROM {} ORDER BY id", cols.join(", "), self.name)
    }
}

fn referencing_tables(conn: &impl ConnectionMethods, name: &str) -> Result<Vec<String>> {
    let mut stmt = conn.sqlite().prepare(
        "SELECT DISTINCT m.name FROM sqlite_master AS m, pragma_foreign_key_list(m.name) AS f \
         WHERE m.type = 'table' AND m.name != ?1 AND f.\"table\" = ?1 COLLATE NOCASE \
         ORDER BY m.name",
    )?;
    let tables = stmt
        .query_map([name], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tables)
}

/// Fields shared by both legacy tables.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyCommon {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub published: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
    pub published_at: Option<NaiveDateTime>,
}

impl LegacyCommon {
    fn from_row(row: &rusqlite::Row, updated_idx: usize) -> Result<Self> {
        Ok(LegacyCommon {
            id: row.get(0)?,
            title: row.get(1)?,
            slug: row.get(2)?,
            content: row.get(3)?,
            published: row.get::<_, Option<bool>>(4)?.unwrap_or(false),
            created_at: timestamp_from_sql(&row.get::<_, String>(5)?)?,
            updated_at: opt_timestamp_from_sql(row.get(updated_idx)?)?,
            published_at: opt_timestamp_from_sql(row.get(updated_idx + 1)?)?,
        })
    }

    /// When the row was first published. Published rows written before
    /// `published_at` existed fall back to `created_at`.
    pub fn first_published(&self) -> Option<NaiveDateTime> {
        match (self.published, self.published_at) {
            (_, Some(at)) => Some(at),
            (true, None) => Some(self.created_at),
            (false, None) => None,
        }
    }
}

/// A row of `blog_posts`.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyPost {
    pub common: LegacyCommon,
    pub excerpt: Option<String>,
    pub author: Option<String>,
    pub featured: bool,
    pub category: Option<String>,
    pub tags: Option<String>,
}

/// A row of `pages`.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyPage {
    pub common: LegacyCommon,
    pub sidebar_content: Option<String>,
    pub layout: Option<String>,
    pub content_type: Option<String>,
    pub show_in_nav: Option<bool>,
    pub nav_order: Option<i64>,
}

impl LegacyPage {
    /// The page-only fields, as the meta entries they become. NULL fields
    /// are left out.
    pub fn meta_entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = Vec::new();
        if let Some(layout) = &self.layout {
            entries.push(("layout", layout.clone()));
        }
        if let Some(content_type) = &self.content_type {
            entries.push(("content_type", content_type.clone()));
        }
        if let Some(sidebar) = &self.sidebar_content {
            entries.push(("sidebar_content", sidebar.clone()));
        }
        if let Some(show) = self.show_in_nav {
            entries.push(("show_in_nav", show.to_string()));
        }
        if let Some(order) = self.nav_order {
            entries.push(("nav_order", order.to_string()));
        }
        entries
    }
}

/// Every row of the legacy blog post table, by id.
pub fn read_posts(conn: &impl ConnectionMethods, table: &LegacyTable) -> Result<Vec<LegacyPost>> {
    let sql = table.select(&POST_OPTIONAL);
    log::debug!("query sql {}", sql);
    let mut stmt = conn.sqlite().prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut posts = Vec::new();
    while let Some(row) = rows.next()? {
        posts.push(LegacyPost {
            common: LegacyCommon::from_row(row, 11)?,
            excerpt: row.get(6)?,
            author: row.get(7)?,
            featured: row.get::<_, Option<bool>>(8)?.unwrap_or(false),
            category: row.get(9)?,
            tags: row.get(10)?,
        });
    }
    Ok(posts)
}

/// Every row of the legacy page table, by id.
pub fn read_pages(conn: &impl ConnectionMethods, table: &LegacyTable) -> Result<Vec<LegacyPage>> {
    let sql = table.select(&PAGE_OPTIONAL);
    log::debug!("query sql {}", sql);
    let mut stmt = conn.sqlite().prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut pages = Vec::new();
    while let Some(row) = rows.next()? {
        pages.push(LegacyPage {
            common: LegacyCommon::from_row(row, 11)?,
            sidebar_content: row.get(6)?,
            layout: row.get(7)?,
            content_type: row.get(8)?,
            show_in_nav: row.get(9)?,
            nav_order: row.get(10)?,
        });
    }
    Ok(pages)
}
