//! The unified content model.
//!
//! Blog posts, pages, projects and any registered custom type share the
//! `posts` table. The [`ContentKind`] discriminator says which type a row
//! is; what that type may do is looked up in the [`PostType`] registry.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::naive::NaiveDateTime;
use log::debug;
use rusqlite::OptionalExtension;
use serde::{Serialize, Serializer};

use crate::db::ConnectionMethods;
use crate::post_type::PostType;
use crate::slug::{is_valid_slug, slug_in_use, slugify};
use crate::sqlval::{now, opt_timestamp_from_sql, timestamp_from_sql, timestamp_to_sql};
use crate::{Error, Result, ValidationError, DEFAULT_AUTHOR};

const POST_COLUMNS: &str = "id, title, slug, content, excerpt, author, post_type, post_status, \
    post_parent, featured, category, tags, created_at, updated_at, published_at";

/// The kind of content a post is, i.e. its `post_type`.
///
/// The three built-in kinds have their own variants; anything registered
/// later is carried as `Custom`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// A blog post.
    Post,
    /// A static page. Pages may be nested.
    Page,
    /// A portfolio project.
    Project,
    /// A type registered at runtime.
    Custom(String),
}
impl ContentKind {
    /// The `post_type` name stored for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            ContentKind::Post => "post",
            ContentKind::Page => "page",
            ContentKind::Project => "project",
            ContentKind::Custom(name) => name,
        }
    }
}
impl From<&str> for ContentKind {
    fn from(name: &str) -> Self {
        match name {
            "post" => ContentKind::Post,
            "page" => ContentKind::Page,
            "project" => ContentKind::Project,
            other => ContentKind::Custom(other.to_string()),
        }
    }
}
impl From<String> for ContentKind {
    fn from(name: String) -> Self {
        ContentKind::from(name.as_str())
    }
}
impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.as_str().fmt(f)
    }
}
impl Serialize for ContentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Publication lifecycle state of a post.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    /// Work in progress, not visible publicly.
    #[default]
    Draft,
    /// Publicly visible.
    Publish,
    /// Visible only to administrators.
    Private,
    /// Awaiting review.
    Pending,
}
impl PostStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [PostStatus; 4] = [
        PostStatus::Draft,
        PostStatus::Pending,
        PostStatus::Publish,
        PostStatus::Private,
    ];

    /// The stored name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Publish => "publish",
            PostStatus::Private => "private",
            PostStatus::Pending => "pending",
        }
    }
}
impl FromStr for PostStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "publish" => Ok(PostStatus::Publish),
            "private" => Ok(PostStatus::Private),
            "pending" => Ok(PostStatus::Pending),
            other => Err(Error::UnknownEnumVariant(other.to_string())),
        }
    }
}
impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// A unit of content of any type.
///
/// Serializes to the JSON shape served by the public API: tags become a
/// list and timestamps are ISO-8601 strings.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Post {
    /// Assigned by the database on creation.
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub author: String,
    pub post_type: ContentKind,
    pub post_status: PostStatus,
    pub post_parent: Option<i64>,
    pub featured: bool,
    pub category: Option<String>,
    /// Comma-separated labels, see [`Post::tag_list`].
    #[serde(serialize_with = "serialize_tags")]
    pub tags: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    /// Set the first time the post is published and kept afterwards, even
    /// if the post is unpublished again.
    pub published_at: Option<NaiveDateTime>,
}

fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn serialize_tags<S: Serializer>(
    tags: &Option<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let list = tags.as_deref().map(split_tags).unwrap_or_default();
    list.serialize(serializer)
}

/// Values for a post that has not been created yet.
///
/// ```
/// # use quill_core::{ContentKind, NewPost, PostStatus};
/// let mut post = NewPost::new(ContentKind::Post, "Hello World", "First!");
/// post.status = PostStatus::Publish;
/// post.tags = Some("intro,meta".to_string());
/// ```
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPost {
    pub kind: ContentKind,
    pub title: String,
    /// Defaults to the slugified title.
    pub slug: Option<String>,
    pub content: String,
    pub excerpt: Option<String>,
    /// Defaults to [`DEFAULT_AUTHOR`].
    pub author: Option<String>,
    pub status: PostStatus,
    pub parent: Option<i64>,
    pub featured: bool,
    pub category: Option<String>,
    pub tags: Option<String>,
}
impl NewPost {
    /// A draft with only the required fields set.
    pub fn new(
        kind: impl Into<ContentKind>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        NewPost {
            kind: kind.into(),
            title: title.into(),
            slug: None,
            content: content.into(),
            excerpt: None,
            author: None,
            status: PostStatus::Draft,
            parent: None,
            featured: false,
            category: None,
            tags: None,
        }
    }
}

fn require_text(value: &str, field: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field).into());
    }
    Ok(())
}

fn check_slug(conn: &impl ConnectionMethods, slug: &str, exclude_id: Option<i64>) -> Result<()> {
    if !is_valid_slug(slug) {
        return Err(ValidationError::InvalidSlug(slug.to_string()).into());
    }
    if slug_in_use(conn, slug, exclude_id)? {
        return Err(ValidationError::SlugTaken(slug.to_string()).into());
    }
    Ok(())
}

/// Turn a unique-constraint failure on `posts.slug` into the validation
/// error the caller would have received had the pre-check seen it.
fn map_slug_conflict(e: rusqlite::Error, slug: &str) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(err, Some(msg))
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.contains("posts.slug") =>
        {
            ValidationError::SlugTaken(slug.to_string()).into()
        }
        _ => e.into(),
    }
}

impl Post {
    pub(crate) fn from_row(row: &rusqlite::Row) -> Result<Self> {
        let status: String = row.get(7)?;
        let post_type: String = row.get(6)?;
        Ok(Post {
            id: row.get(0)?,
            title: row.get(1)?,
            slug: row.get(2)?,
            content: row.get(3)?,
            excerpt: row.get(4)?,
            author: row.get(5)?,
            post_type: ContentKind::from(post_type),
            post_status: status.parse()?,
            post_parent: row.get(8)?,
            featured: row.get(9)?,
            category: row.get(10)?,
            tags: row.get(11)?,
            created_at: timestamp_from_sql(&row.get::<_, String>(12)?)?,
            updated_at: timestamp_from_sql(&row.get::<_, String>(13)?)?,
            published_at: opt_timestamp_from_sql(row.get(14)?)?,
        })
    }

    fn load_where(
        conn: &impl ConnectionMethods,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts {clause}");
        debug!("query sql {}", sql);
        let mut stmt = conn.sqlite().prepare(&sql)?;
        let mut rows = stmt.query(params)?;
        let mut posts = Vec::new();
        while let Some(row) = rows.next()? {
            posts.push(Post::from_row(row)?);
        }
        Ok(posts)
    }

    /// Create a post. Fails with a validation error if a required field is
    /// blank, the slug is malformed or taken, the type is not registered,
    /// or the parent is not a valid hierarchical post.
    pub fn create(conn: &impl ConnectionMethods, new: NewPost) -> Result<Post> {
        require_text(&new.title, "title")?;
        require_text(&new.content, "content")?;
        let slug = new.slug.unwrap_or_else(|| slugify(&new.title));
        check_slug(conn, &slug, None)?;
        if PostType::try_get_by_name(conn, new.kind.as_str())?.is_none() {
            return Err(ValidationError::UnknownPostType(new.kind.to_string()).into());
        }
        if let Some(parent) = new.parent {
            validate_parent(conn, None, parent)?;
        }

        let created = now();
        let published_at = (new.status == PostStatus::Publish).then_some(created);
        let mut post = Post {
            id: 0,
            title: new.title,
            slug,
            content: new.content,
            excerpt: new.excerpt,
            author: new.author.unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            post_type: new.kind,
            post_status: new.status,
            post_parent: new.parent,
            featured: new.featured,
            category: new.category,
            tags: new.tags,
            created_at: created,
            updated_at: created,
            published_at,
        };

        let sql = "INSERT INTO posts (title, slug, content, excerpt, author, post_type, \
                   post_status, post_parent, featured, category, tags, created_at, updated_at, \
                   published_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";
        debug!("insert sql {}", sql);
        conn.sqlite()
            .execute(
                sql,
                rusqlite::params![
                    post.title,
                    post.slug,
                    post.content,
                    post.excerpt,
                    post.author,
                    post.post_type.as_str(),
                    post.post_status.as_str(),
                    post.post_parent,
                    post.featured,
                    post.category,
                    post.tags,
                    timestamp_to_sql(&post.created_at),
                    timestamp_to_sql(&post.updated_at),
                    post.published_at.as_ref().map(timestamp_to_sql),
                ],
            )
            .map_err(|e| map_slug_conflict(e, &post.slug))?;
        post.id = conn.sqlite().last_insert_rowid();
        debug!("created {} {} '{}'", post.post_type, post.id, post.slug);
        Ok(post)
    }

    /// Find a post by id. Returns `Error::NotFound` if it does not exist.
    pub fn get(conn: &impl ConnectionMethods, id: i64) -> Result<Post> {
        Self::try_get(conn, id)?.ok_or_else(|| Error::not_found("post", id))
    }

    /// Find a post by id. Returns `None` if it does not exist.
    pub fn try_get(conn: &impl ConnectionMethods, id: i64) -> Result<Option<Post>> {
        Ok(Self::load_where(conn, "WHERE id = ?1", [id])?.into_iter().next())
    }

    /// Find a post of any type by slug. Returns `Error::NotFound` if it does not exist.
    pub fn get_by_slug(conn: &impl ConnectionMethods, slug: &str) -> Result<Post> {
        Self::try_get_by_slug(conn, slug)?.ok_or_else(|| Error::not_found("post", slug))
    }

    /// Find a post of any type by slug. Returns `None` if it does not exist.
    pub fn try_get_by_slug(conn: &impl ConnectionMethods, slug: &str) -> Result<Option<Post>> {
        Ok(Self::load_where(conn, "WHERE slug = ?1", [slug])?
            .into_iter()
            .next())
    }

    /// Persist the editable fields (title, slug, content, excerpt, author,
    /// featured, category, tags) and bump `updated_at`. Status and parent
    /// have dedicated operations.
    pub fn update(&mut self, conn: &impl ConnectionMethods) -> Result<()> {
        require_text(&self.title, "title")?;
        require_text(&self.content, "content")?;
        check_slug(conn, &self.slug, Some(self.id))?;
        let updated = now();
        let sql = "UPDATE posts SET title = ?1, slug = ?2, content = ?3, excerpt = ?4, \
                   author = ?5, featured = ?6, category = ?7, tags = ?8, updated_at = ?9 \
                   WHERE id = ?10";
        debug!("update sql {}", sql);
        let changed = conn
            .sqlite()
            .execute(
                sql,
                rusqlite::params![
                    self.title,
                    self.slug,
                    self.content,
                    self.excerpt,
                    self.author,
                    self.featured,
                    self.category,
                    self.tags,
                    timestamp_to_sql(&updated),
                    self.id,
                ],
            )
            .map_err(|e| map_slug_conflict(e, &self.slug))?;
        if changed == 0 {
            return Err(Error::not_found("post", self.id));
        }
        self.updated_at = updated;
        Ok(())
    }

    /// Move the post to `new_status`. The first transition into
    /// `publish` stamps `published_at`; `updated_at` is always bumped.
    /// Whether the post was published before is read from the stored row,
    /// so a stale copy never replaces the first stamp.
    pub fn transition_status(
        &mut self,
        conn: &impl ConnectionMethods,
        new_status: PostStatus,
    ) -> Result<()> {
        let updated = now();
        let sql = "UPDATE posts SET post_status = ?1, updated_at = ?2, \
                   published_at = COALESCE(published_at, CASE WHEN ?1 = 'publish' THEN ?2 END) \
                   WHERE id = ?3 RETURNING published_at";
        debug!("update sql {}", sql);
        let published_at: Option<String> = conn
            .sqlite()
            .query_row(
                sql,
                rusqlite::params![new_status.as_str(), timestamp_to_sql(&updated), self.id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::not_found("post", self.id))?;
        debug!(
            "post {} moved from {} to {}",
            self.id, self.post_status, new_status
        );
        self.post_status = new_status;
        self.updated_at = updated;
        self.published_at = opt_timestamp_from_sql(published_at)?;
        Ok(())
    }

    /// Attach this post under `parent`, or detach it with `None`.
    pub fn set_parent(&mut self, conn: &impl ConnectionMethods, parent: Option<i64>) -> Result<()> {
        if let Some(parent) = parent {
            validate_parent(conn, Some(self.id), parent)?;
        }
        let updated = now();
        let changed = conn.sqlite().execute(
            "UPDATE posts SET post_parent = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![parent, timestamp_to_sql(&updated), self.id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("post", self.id));
        }
        self.post_parent = parent;
        self.updated_at = updated;
        Ok(())
    }

    /// Delete the post. Its meta rows go with it and its children become
    /// top-level posts.
    pub fn delete(self, conn: &impl ConnectionMethods) -> Result<()> {
        let changed = conn
            .sqlite()
            .execute("DELETE FROM posts WHERE id = ?1", [self.id])?;
        if changed == 0 {
            return Err(Error::not_found("post", self.id));
        }
        debug!("deleted post {} '{}'", self.id, self.slug);
        Ok(())
    }

    /// Direct children, oldest first. Only one level is returned; callers
    /// recurse as deep as they need.
    pub fn children(&self, conn: &impl ConnectionMethods) -> Result<Vec<Post>> {
        Self::load_where(
            conn,
            "WHERE post_parent = ?1 ORDER BY created_at ASC, id ASC",
            [self.id],
        )
    }

    /// Ancestors, nearest first, at most `max_depth` of them.
    pub fn ancestors(&self, conn: &impl ConnectionMethods, max_depth: usize) -> Result<Vec<Post>> {
        let mut ancestors = Vec::new();
        let mut seen = HashSet::from([self.id]);
        let mut next = self.post_parent;
        while let Some(id) = next {
            if ancestors.len() >= max_depth || !seen.insert(id) {
                break;
            }
            let parent = Post::get(conn, id)?;
            next = parent.post_parent;
            ancestors.push(parent);
        }
        Ok(ancestors)
    }

    /// Published, featured posts, most recently published first.
    pub fn featured(conn: &impl ConnectionMethods, limit: u32) -> Result<Vec<Post>> {
        PostQuery::new()
            .status(PostStatus::Publish)
            .featured(true)
            .order(Order::PublishedDesc)
            .limit(limit)
            .load(conn)
    }

    /// The comma-separated `tags` as a list, blanks dropped.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags.as_deref().map(split_tags).unwrap_or_default()
    }

    /// Whether the post is publicly visible.
    pub fn is_published(&self) -> bool {
        self.post_status == PostStatus::Publish
    }
}

fn parent_of(conn: &impl ConnectionMethods, id: i64) -> Result<Option<i64>> {
    let parent: Option<Option<i64>> = conn
        .sqlite()
        .query_row(
            "SELECT post_parent FROM posts WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(parent.flatten())
}

/// Check that `parent_id` may become the parent of `child_id` (`None` for
/// a post not yet created).
fn validate_parent(
    conn: &impl ConnectionMethods,
    child_id: Option<i64>,
    parent_id: i64,
) -> Result<()> {
    let parent = Post::try_get(conn, parent_id)?.ok_or(ValidationError::ParentNotFound(parent_id))?;
    let hierarchical = PostType::try_get_by_name(conn, parent.post_type.as_str())?
        .map(|t| t.hierarchical)
        .unwrap_or(false);
    if !hierarchical {
        return Err(ValidationError::ParentNotHierarchical(parent.post_type.to_string()).into());
    }
    let Some(child_id) = child_id else {
        return Ok(());
    };
    // Walk up from the proposed parent. Meeting the child means the new
    // link would close a loop. `seen` stops the walk on rows that already
    // form one.
    let mut seen = HashSet::new();
    let mut cursor = Some(parent_id);
    while let Some(id) = cursor {
        if id == child_id {
            return Err(ValidationError::ParentCycle(child_id).into());
        }
        if !seen.insert(id) {
            break;
        }
        cursor = parent_of(conn, id)?;
    }
    Ok(())
}

/// Sort order for post listings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    /// Most recently published first; never-published posts last.
    PublishedDesc,
    /// Newest first. The usual order for drafts.
    #[default]
    CreatedDesc,
    /// Oldest first.
    CreatedAsc,
    /// Alphabetical by title.
    TitleAsc,
}
impl Order {
    fn sql(&self) -> &'static str {
        match self {
            Order::PublishedDesc => "ORDER BY published_at DESC, id DESC",
            Order::CreatedDesc => "ORDER BY created_at DESC, id DESC",
            Order::CreatedAsc => "ORDER BY created_at ASC, id ASC",
            Order::TitleAsc => "ORDER BY title ASC, id ASC",
        }
    }
}

/// Filtered, ordered listing of posts. Filters combine with AND; an unset
/// filter matches everything.
///
/// ```no_run
/// # use quill_core::{ContentKind, Order, PostQuery, PostStatus};
/// # fn f(conn: &quill_core::db::Connection) -> quill_core::Result<()> {
/// let projects = PostQuery::new()
///     .post_type(ContentKind::Project)
///     .status(PostStatus::Publish)
///     .order(Order::PublishedDesc)
///     .load(conn)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostQuery {
    post_type: Option<ContentKind>,
    status: Option<PostStatus>,
    featured: Option<bool>,
    parent: Option<Option<i64>>,
    order: Order,
    limit: Option<u32>,
}
impl PostQuery {
    /// A query matching every post, newest first.
    pub fn new() -> Self {
        Self::default()
    }
    /// Only posts of this type.
    pub fn post_type(mut self, kind: impl Into<ContentKind>) -> Self {
        self.post_type = Some(kind.into());
        self
    }
    /// Only posts in this status.
    pub fn status(mut self, status: PostStatus) -> Self {
        self.status = Some(status);
        self
    }
    /// Only posts whose `featured` flag matches.
    pub fn featured(mut self, featured: bool) -> Self {
        self.featured = Some(featured);
        self
    }
    /// Only children of `parent`, or top-level posts for `None`.
    pub fn parent(mut self, parent: Option<i64>) -> Self {
        self.parent = Some(parent);
        self
    }
    /// Sort order.
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }
    /// Return at most `limit` posts.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn where_clause(&self) -> (String, Vec<rusqlite::types::Value>) {
        use rusqlite::types::Value;
        let mut conditions = Vec::new();
        let mut values = Vec::new();
        if let Some(kind) = &self.post_type {
            values.push(Value::Text(kind.as_str().to_string()));
            conditions.push(format!("post_type = ?{}", values.len()));
        }
        if let Some(status) = self.status {
            values.push(Value::Text(status.as_str().to_string()));
            conditions.push(format!("post_status = ?{}", values.len()));
        }
        if let Some(featured) = self.featured {
            values.push(Value::Integer(featured as i64));
            conditions.push(format!("featured = ?{}", values.len()));
        }
        match self.parent {
            Some(Some(parent)) => {
                values.push(Value::Integer(parent));
                conditions.push(format!("post_parent = ?{}", values.len()));
            }
            Some(None) => conditions.push("post_parent IS NULL".to_string()),
            None => {}
        }
        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), values)
        }
    }

    /// Run the query.
    pub fn load(&self, conn: &impl ConnectionMethods) -> Result<Vec<Post>> {
        let (mut clause, values) = self.where_clause();
        clause.push(' ');
        clause.push_str(self.order.sql());
        if let Some(limit) = self.limit {
            clause.push_str(&format!(" LIMIT {limit}"));
        }
        Post::load_where(conn, &clause, rusqlite::params_from_iter(values))
    }

    /// Count the matching posts, ignoring order and limit.
    pub fn count(&self, conn: &impl ConnectionMethods) -> Result<i64> {
        let (clause, values) = self.where_clause();
        let sql = format!("SELECT COUNT(*) FROM posts {clause}");
        debug!("count sql {}", sql);
        Ok(conn
            .sqlite()
            .query_row(&sql, rusqlite::params_from_iter(values), |row| row.get(0))?)
    }
}

/// Posts of `post_type` in `status` (either may be `None` to match all),
/// in the given order.
pub fn list_posts(
    conn: &impl ConnectionMethods,
    post_type: Option<ContentKind>,
    status: Option<PostStatus>,
    order: Order,
) -> Result<Vec<Post>> {
    let mut query = PostQuery::new().order(order);
    if let Some(kind) = post_type {
        query = query.post_type(kind);
    }
    if let Some(status) = status {
        query = query.status(status);
    }
    query.load(conn)
}

/// The post with `slug`, of any type. Shorthand for [`Post::get_by_slug`].
pub fn get_post(conn: &impl ConnectionMethods, slug: &str) -> Result<Post> {
    Post::get_by_slug(conn, slug)
}
