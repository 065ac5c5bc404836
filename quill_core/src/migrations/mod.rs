//! Moving a legacy installation onto the unified content model.
//!
//! Legacy installations keep blog posts in `blog_posts` and static pages
//! in `pages`. [`Migrator::run`] folds both into `posts`, moves page-only
//! fields into `post_meta`, seeds the post type registry and finally drops
//! the legacy tables. Everything after the pre-check runs in one
//! transaction, so a failure at any step leaves the legacy tables as they
//! were. Once committed the change can only be undone by restoring the
//! [`Backup`] taken beforehand.

use std::fmt;

use log::{info, warn};
use serde::Serialize;

use crate::db::{quote_ident, Connection, ConnectionMethods};
use crate::meta::set_meta;
use crate::slug::ensure_unique_slug;
use crate::sqlval::timestamp_to_sql;
use crate::{Error, PostStatus, PostType, Result, DEFAULT_AUTHOR};

pub mod backup;
pub mod legacy;
pub mod schema;

pub use backup::Backup;
use legacy::{LegacyCommon, LegacyPage, LegacyPost, LegacyTable};

/// Name under which the unification is recorded in `quill_migrations`.
pub const UNIFY_CONTENT: &str = "unify_content";

/// The steps of the unification, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    /// Check the legacy tables exist and the new ones are empty.
    Precheck = 1,
    /// Create the unified tables.
    Schema = 2,
    /// Copy legacy rows into `posts` and `post_meta`.
    Transform = 3,
    /// Register the default post types.
    Seed = 4,
    /// Verify counts and drop the legacy tables.
    Cleanup = 5,
}

impl Step {
    /// Every step, in execution order.
    pub const ALL: [Step; 5] = [
        Step::Precheck,
        Step::Schema,
        Step::Transform,
        Step::Seed,
        Step::Cleanup,
    ];

    /// 1-based position of the step.
    pub fn index(self) -> u8 {
        self as u8
    }

    fn name(self) -> &'static str {
        match self {
            Step::Precheck => "pre-check",
            Step::Schema => "schema creation",
            Step::Transform => "data transformation",
            Step::Seed => "registry seeding",
            Step::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "step {} ({})", self.index(), self.name())
    }
}

/// Where a [`Migrator`] is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationState {
    /// Not started.
    Ready,
    /// Running the given step.
    Migrating(Step),
    /// Committed.
    Migrated,
    /// Stopped at the given step; nothing was committed.
    Failed(Step),
    /// The database was restored from the backup.
    RolledBack,
}

/// What a successful unification did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Legacy blog posts copied.
    pub posts: i64,
    /// Of those, how many are published.
    pub published_posts: i64,
    /// Legacy pages copied.
    pub pages: i64,
    /// Meta rows written for page fields.
    pub meta_rows: i64,
    /// Post types registered by the seeding step.
    pub post_types_added: usize,
    /// Pages whose slug was taken by a post, as `(old, new)`.
    pub renamed_slugs: Vec<(String, String)>,
}

struct Layout {
    posts: LegacyTable,
    pages: LegacyTable,
}

/// Runs the unification once and can undo it from a backup.
///
/// ```no_run
/// # use quill_core::db::Connection;
/// # use quill_core::migrations::{Backup, Migrator};
/// # fn f() -> quill_core::Result<()> {
/// let mut conn = Connection::open("blog.db")?;
/// let mut migrator = Migrator::new(Backup::create(&conn, ".quill/backups")?);
/// let report = migrator.run(&mut conn)?;
/// println!("{} posts, {} pages", report.posts, report.pages);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Migrator {
    backup: Option<Backup>,
    default_author: String,
    state: MigrationState,
}

impl Migrator {
    /// A migrator that can roll back to `backup`.
    pub fn new(backup: Backup) -> Self {
        Migrator {
            backup: Some(backup),
            default_author: DEFAULT_AUTHOR.to_string(),
            state: MigrationState::Ready,
        }
    }

    /// A migrator without a backup. [`rollback`](Migrator::rollback) is
    /// unavailable.
    pub fn without_backup() -> Self {
        Migrator {
            backup: None,
            default_author: DEFAULT_AUTHOR.to_string(),
            state: MigrationState::Ready,
        }
    }

    /// Author given to legacy posts that have none. Defaults to
    /// [`DEFAULT_AUTHOR`].
    pub fn default_author(mut self, author: impl Into<String>) -> Self {
        self.default_author = author.into();
        self
    }

    /// Current state.
    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// The backup rollback restores, if any.
    pub fn backup(&self) -> Option<&Backup> {
        self.backup.as_ref()
    }

    /// Run every step. Fails with `Error::MigrationPrecheck` if the
    /// database is not a legacy installation ready to migrate, and with
    /// `Error::MigrationStep` naming the failed step otherwise. In both
    /// cases nothing has been written.
    pub fn run(&mut self, conn: &mut Connection) -> Result<MigrationReport> {
        if self.state != MigrationState::Ready {
            return Err(Error::Migration(format!(
                "migrator already used, state is {:?}",
                self.state
            )));
        }
        let layout = self.step(Step::Precheck, || precheck(&*conn))?;

        let tx = conn.transaction()?;
        self.step(Step::Schema, || schema::create_tables(&tx))?;
        let author = self.default_author.clone();
        let mut report = self.step(Step::Transform, || transform(&tx, &layout, &author))?;
        report.post_types_added = self.step(Step::Seed, || PostType::seed_defaults(&tx))?;
        self.step(Step::Cleanup, move || {
            verify(&tx, &layout)?;
            for table in [&layout.posts, &layout.pages] {
                for link in table.link_tables() {
                    tx.execute(&format!("DROP TABLE {};", quote_ident(link)))?;
                }
                tx.execute(&format!("DROP TABLE {};", quote_ident(table.name())))?;
            }
            schema::mark_applied(&tx, UNIFY_CONTENT)?;
            tx.commit()
        })?;

        self.state = MigrationState::Migrated;
        info!(
            "unified {} posts ({} published) and {} pages, {} meta rows",
            report.posts, report.published_posts, report.pages, report.meta_rows
        );
        Ok(report)
    }

    fn step<T>(&mut self, step: Step, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.state = MigrationState::Migrating(step);
        info!("migration {}", step);
        f().map_err(|e| {
            self.state = MigrationState::Failed(step);
            warn!("migration failed at {}: {}", step, e);
            match e {
                e @ Error::MigrationPrecheck(_) => e,
                e if step == Step::Precheck => Error::MigrationPrecheck(e.to_string()),
                e => Error::MigrationStep {
                    step,
                    source: Box::new(e),
                },
            }
        })
    }

    /// Restore the database from the backup, consuming the connection.
    /// Allowed after the migration committed or failed.
    pub fn rollback(&mut self, conn: Connection) -> Result<()> {
        match self.state {
            MigrationState::Migrated | MigrationState::Failed(_) => {}
            state => {
                return Err(Error::Migration(format!(
                    "cannot roll back in state {state:?}"
                )))
            }
        }
        let backup = self
            .backup
            .as_ref()
            .ok_or_else(|| Error::Migration("no backup to roll back to".to_string()))?;
        backup.restore(conn)?;
        self.state = MigrationState::RolledBack;
        Ok(())
    }
}

fn precheck(conn: &impl ConnectionMethods) -> Result<Layout> {
    if schema::is_applied(conn, UNIFY_CONTENT)? {
        return Err(Error::MigrationPrecheck(format!(
            "{UNIFY_CONTENT} has already been applied"
        )));
    }
    let posts = LegacyTable::inspect(conn, legacy::POSTS_TABLE)?;
    let pages = LegacyTable::inspect(conn, legacy::PAGES_TABLE)?;
    for table in ["posts", "post_meta"] {
        if conn.has_table(table)? {
            let rows = conn.count_rows(table)?;
            if rows > 0 {
                return Err(Error::MigrationPrecheck(format!(
                    "table {table} already holds {rows} rows"
                )));
            }
        }
    }
    Ok(Layout { posts, pages })
}

fn insert_row(
    conn: &impl ConnectionMethods,
    id: Option<i64>,
    common: &LegacyCommon,
    slug: &str,
    post_type: &str,
    extra: &PostExtra,
    default_author: &str,
) -> Result<i64> {
    let status = if common.published {
        PostStatus::Publish
    } else {
        PostStatus::Draft
    };
    let updated = common.updated_at.unwrap_or(common.created_at);
    conn.sqlite().execute(
        "INSERT INTO posts (id, title, slug, content, excerpt, author, post_type, post_status, \
         featured, category, tags, created_at, updated_at, published_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rusqlite::params![
            id,
            common.title,
            slug,
            common.content,
            extra.excerpt,
            extra.author.unwrap_or(default_author),
            post_type,
            status.as_str(),
            extra.featured,
            extra.category,
            extra.tags,
            timestamp_to_sql(&common.created_at),
            timestamp_to_sql(&updated),
            common.first_published().as_ref().map(timestamp_to_sql),
        ],
    )?;
    Ok(conn.sqlite().last_insert_rowid())
}

#[derive(Default)]
struct PostExtra<'a> {
    excerpt: Option<&'a str>,
    author: Option<&'a str>,
    featured: bool,
    category: Option<&'a str>,
    tags: Option<&'a str>,
}

impl<'a> From<&'a LegacyPost> for PostExtra<'a> {
    fn from(post: &'a LegacyPost) -> Self {
        PostExtra {
            excerpt: post.excerpt.as_deref(),
            author: post.author.as_deref(),
            featured: post.featured,
            category: post.category.as_deref(),
            tags: post.tags.as_deref(),
        }
    }
}

fn transform(
    conn: &impl ConnectionMethods,
    layout: &Layout,
    default_author: &str,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    let posts: Vec<LegacyPost> = legacy::read_posts(conn, &layout.posts)?;
    for post in &posts {
        let common = &post.common;
        insert_row(
            conn,
            Some(common.id),
            common,
            &common.slug,
            "post",
            &PostExtra::from(post),
            default_author,
        )?;
        report.posts += 1;
        if common.published {
            report.published_posts += 1;
        }
    }

    let pages: Vec<LegacyPage> = legacy::read_pages(conn, &layout.pages)?;
    for page in &pages {
        let common = &page.common;
        let slug = ensure_unique_slug(conn, &common.slug, None)?;
        let id = insert_row(
            conn,
            None,
            common,
            &slug,
            "page",
            &PostExtra::default(),
            default_author,
        )?;
        let mut entries = page.meta_entries();
        if slug != common.slug {
            warn!(
                "page {} slug '{}' is taken by a post, renamed to '{}'",
                common.id, common.slug, slug
            );
            entries.push(("legacy_slug", common.slug.clone()));
            report.renamed_slugs.push((common.slug.clone(), slug));
        }
        for (key, value) in entries {
            set_meta(conn, id, key, &value)?;
            report.meta_rows += 1;
        }
        report.pages += 1;
    }
    Ok(report)
}

fn count_type(conn: &impl ConnectionMethods, post_type: &str) -> Result<i64> {
    Ok(conn.sqlite().query_row(
        "SELECT COUNT(*) FROM posts WHERE post_type = ?1",
        [post_type],
        |row| row.get(0),
    )?)
}

fn verify(conn: &impl ConnectionMethods, layout: &Layout) -> Result<()> {
    for (table, post_type) in [(&layout.posts, "post"), (&layout.pages, "page")] {
        let legacy = conn.count_rows(table.name())?;
        let unified = count_type(conn, post_type)?;
        if legacy != unified {
            return Err(Error::Migration(format!(
                "{} holds {legacy} rows but {unified} posts have type '{post_type}'",
                table.name()
            )));
        }
    }
    Ok(())
}
