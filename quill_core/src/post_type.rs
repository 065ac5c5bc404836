//! The post type registry.
//!
//! Each [`PostType`] names a class of content and declares which optional
//! features its posts use. Request handlers read the flags to decide what
//! to show (a category selector only if `supports_categories`, an archive
//! page only if `has_archive`, ...). The registry is written at setup and
//! read-only afterwards.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::db::ConnectionMethods;
use crate::{Error, Result};

const POST_TYPE_COLUMNS: &str = "id, name, label, label_singular, description, hierarchical, \
    has_archive, supports_categories, supports_tags, supports_excerpt, supports_featured_image, \
    menu_icon, menu_position, show_in_menu";

/// A registered content type.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostType {
    /// Assigned on registration; `None` until then.
    pub id: Option<i64>,
    /// Unique key stored in `posts.post_type`.
    pub name: String,
    /// Plural display name, e.g. "Projects".
    pub label: String,
    /// Singular display name, e.g. "Project".
    pub label_singular: String,
    pub description: Option<String>,
    /// Posts of this type may be nested under one another.
    pub hierarchical: bool,
    /// The type has a public listing page.
    pub has_archive: bool,
    pub supports_categories: bool,
    pub supports_tags: bool,
    pub supports_excerpt: bool,
    pub supports_featured_image: bool,
    pub menu_icon: Option<String>,
    pub menu_position: i32,
    pub show_in_menu: bool,
}

impl PostType {
    /// A type with every capability off, shown in the menu at position 5.
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        label_singular: impl Into<String>,
    ) -> Self {
        PostType {
            id: None,
            name: name.into(),
            label: label.into(),
            label_singular: label_singular.into(),
            description: None,
            hierarchical: false,
            has_archive: false,
            supports_categories: false,
            supports_tags: false,
            supports_excerpt: false,
            supports_featured_image: false,
            menu_icon: None,
            menu_position: 5,
            show_in_menu: true,
        }
    }

    /// The types every installation starts with: `post`, `page` and `project`.
    pub fn defaults() -> Vec<PostType> {
        let mut post = PostType::new("post", "Posts", "Post");
        post.description = Some("Blog posts".to_string());
        post.has_archive = true;
        post.supports_categories = true;
        post.supports_tags = true;
        post.supports_excerpt = true;
        post.menu_icon = Some("dashicons-admin-post".to_string());
        post.menu_position = 5;

        let mut page = PostType::new("page", "Pages", "Page");
        page.description = Some("Static pages".to_string());
        page.hierarchical = true;
        page.menu_icon = Some("dashicons-admin-page".to_string());
        page.menu_position = 20;

        let mut project = PostType::new("project", "Projects", "Project");
        project.description = Some("Portfolio projects".to_string());
        project.has_archive = true;
        project.supports_tags = true;
        project.menu_icon = Some("dashicons-portfolio".to_string());
        project.menu_position = 25;

        vec![post, page, project]
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(PostType {
            id: row.get(0)?,
            name: row.get(1)?,
            label: row.get(2)?,
            label_singular: row.get(3)?,
            description: row.get(4)?,
            hierarchical: row.get(5)?,
            has_archive: row.get(6)?,
            supports_categories: row.get(7)?,
            supports_tags: row.get(8)?,
            supports_excerpt: row.get(9)?,
            supports_featured_image: row.get(10)?,
            menu_icon: row.get(11)?,
            menu_position: row.get(12)?,
            show_in_menu: row.get(13)?,
        })
    }

    /// Insert this type into the registry and record its id. Fails with
    /// `Error::DuplicateType` if the name is taken.
    pub fn register(&mut self, conn: &impl ConnectionMethods) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::ValidationError::MissingField("name").into());
        }
        if Self::try_get_by_name(conn, &self.name)?.is_some() {
            return Err(Error::DuplicateType(self.name.clone()));
        }
        let sql = "INSERT INTO post_types (name, label, label_singular, description, \
                   hierarchical, has_archive, supports_categories, supports_tags, \
                   supports_excerpt, supports_featured_image, menu_icon, menu_position, \
                   show_in_menu) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";
        debug!("insert sql {}", sql);
        conn.sqlite().execute(
            sql,
            rusqlite::params![
                self.name,
                self.label,
                self.label_singular,
                self.description,
                self.hierarchical,
                self.has_archive,
                self.supports_categories,
                self.supports_tags,
                self.supports_excerpt,
                self.supports_featured_image,
                self.menu_icon,
                self.menu_position,
                self.show_in_menu,
            ],
        )?;
        self.id = Some(conn.sqlite().last_insert_rowid());
        info!("registered post type '{}'", self.name);
        Ok(())
    }

    /// Look a type up by name. Returns `Error::NotFound` if it is not registered.
    pub fn get_by_name(conn: &impl ConnectionMethods, name: &str) -> Result<PostType> {
        Self::try_get_by_name(conn, name)?.ok_or_else(|| Error::not_found("post type", name))
    }

    /// Look a type up by name. Returns `None` if it is not registered.
    pub fn try_get_by_name(conn: &impl ConnectionMethods, name: &str) -> Result<Option<PostType>> {
        let sql = format!("SELECT {POST_TYPE_COLUMNS} FROM post_types WHERE name = ?1");
        let mut stmt = conn.sqlite().prepare(&sql)?;
        let mut rows = stmt.query_map([name], Self::from_row)?;
        let found = rows.next().transpose()?;
        Ok(found)
    }

    /// Every registered type, in menu order.
    pub fn all(conn: &impl ConnectionMethods) -> Result<Vec<PostType>> {
        let sql =
            format!("SELECT {POST_TYPE_COLUMNS} FROM post_types ORDER BY menu_position, name");
        let mut stmt = conn.sqlite().prepare(&sql)?;
        let types = stmt
            .query_map([], Self::from_row)?
            .collect::<rusqlite::Result<Vec<PostType>>>()?;
        Ok(types)
    }

    /// Register whichever of the [default types](PostType::defaults) are
    /// missing. Returns how many were added.
    pub fn seed_defaults(conn: &impl ConnectionMethods) -> Result<usize> {
        let mut added = 0;
        for mut post_type in Self::defaults() {
            if Self::try_get_by_name(conn, &post_type.name)?.is_none() {
                post_type.register(conn)?;
                added += 1;
            }
        }
        Ok(added)
    }

    /// Remove a type from the registry. Refused with
    /// `Error::PostTypeInUse` while any post still has this type.
    pub fn delete(conn: &impl ConnectionMethods, name: &str) -> Result<()> {
        let posts: i64 = conn.sqlite().query_row(
            "SELECT COUNT(*) FROM posts WHERE post_type = ?1",
            [name],
            |row| row.get(0),
        )?;
        if posts > 0 {
            return Err(Error::PostTypeInUse {
                name: name.to_string(),
                posts,
            });
        }
        let changed = conn
            .sqlite()
            .execute("DELETE FROM post_types WHERE name = ?1", [name])?;
        if changed == 0 {
            return Err(Error::not_found("post type", name));
        }
        info!("deleted post type '{}'", name);
        Ok(())
    }
}
