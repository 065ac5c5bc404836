#![doc(hidden)]
//! This library is not stable, and usage is strongly discouraged.
//!
//! It is intended only to assist developing the CLI. Every command takes
//! the `.quill` directory it works in, so it can be driven from tests.
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use quill_core::db::{self, Connection, ConnectionMethods, ConnectionSpec};
use quill_core::migrations::legacy::{PAGES_TABLE, POSTS_TABLE};
use quill_core::migrations::{schema, Backup, Migrator};
use quill_core::post::list_posts;
use quill_core::{ContentKind, NewPost, Order, Post, PostStatus, PostType, DEFAULT_AUTHOR};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Environment variable overriding the configured database file.
pub const DATABASE_ENV: &str = "QUILL_DATABASE";

const CONFIG_FILE: &str = "config.json";

fn default_author() -> String {
    DEFAULT_AUTHOR.to_string()
}

/// Contents of `.quill/config.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionSpec,
    #[serde(default = "default_author")]
    pub default_author: String,
    /// Relative paths are taken from the `.quill` directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
}
impl Config {
    pub fn new(connection: ConnectionSpec) -> Self {
        Config {
            connection,
            default_author: default_author(),
            backup_dir: None,
        }
    }

    /// Load the configuration saved in `base`, without environment overrides.
    pub fn load_file(base: &Path) -> Result<Self> {
        let path = base.join(CONFIG_FILE);
        let file = File::open(&path).with_context(|| {
            format!(
                "No Quill configuration found at {}. Did you run quill init?",
                path.display()
            )
        })?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Load the configuration saved in `base`, letting `QUILL_DATABASE`
    /// replace the database.
    pub fn load(base: &Path) -> Result<Self> {
        let config = Self::load_file(base)?;
        Ok(config.with_database_override(std::env::var(DATABASE_ENV).ok()))
    }

    pub fn with_database_override(mut self, database: Option<String>) -> Self {
        if let Some(database) = database.filter(|d| !d.is_empty()) {
            log::debug!("database overridden by {DATABASE_ENV}: {database}");
            self.connection = ConnectionSpec::sqlite(database);
        }
        self
    }

    pub fn save(&self, base: &Path) -> Result<()> {
        std::fs::create_dir_all(base)?;
        let file = File::create(base.join(CONFIG_FILE))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn backup_dir(&self, base: &Path) -> PathBuf {
        match &self.backup_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base.join("backups"),
        }
    }

    pub fn connect(&self) -> Result<Connection> {
        Ok(db::connect(&self.connection)?)
    }
}

fn is_legacy(conn: &impl ConnectionMethods) -> Result<bool> {
    Ok(conn.has_table(POSTS_TABLE)? || conn.has_table(PAGES_TABLE)?)
}

/// Point Quill at `database` and prepare it. A new database gets the
/// unified schema; a legacy one is left for `quill migrate`.
pub fn init(base: &Path, database: &str) -> Result<()> {
    let spec = if database == db::MEMORY {
        ConnectionSpec::new(db::BACKEND_NAME, db::MEMORY)
    } else {
        ConnectionSpec::sqlite(database)
    };
    let conn = db::connect(&spec)?; // ensure we can
    if is_legacy(&conn)? {
        println!("Found legacy tables. Run `quill migrate` to move them to the unified model.");
    } else {
        let added = schema::install(&conn)?;
        println!("Installed the content schema ({added} post types registered)");
    }
    Config::new(spec).save(base)?;
    Ok(())
}

/// Back up the database and run the unification.
pub fn migrate(base: &Path, backup: bool) -> Result<()> {
    let config = Config::load(base)?;
    let mut conn = config.connect()?;
    if !is_legacy(&conn)? {
        bail!("No legacy tables found, nothing to migrate");
    }
    let mut migrator = if backup {
        let backup = Backup::create(&conn, config.backup_dir(base))?;
        println!("Backed up database to {}", backup.snapshot().display());
        Migrator::new(backup)
    } else {
        Migrator::without_backup()
    }
    .default_author(config.default_author.clone());
    match migrator.run(&mut conn) {
        Ok(report) => {
            println!(
                "Migrated {} posts ({} published) and {} pages, {} meta rows written",
                report.posts, report.published_posts, report.pages, report.meta_rows
            );
            for (old, new) in &report.renamed_slugs {
                println!("Page slug '{old}' was taken, renamed to '{new}'");
            }
            Ok(())
        }
        Err(e) => {
            if let Some(backup) = migrator.backup() {
                eprintln!(
                    "Nothing was changed. A backup is at {}",
                    backup.snapshot().display()
                );
            }
            Err(e.into())
        }
    }
}

/// Replace the database with the snapshot at `snapshot`.
pub fn rollback(base: &Path, snapshot: &Path) -> Result<()> {
    let config = Config::load(base)?;
    let conn = config.connect()?;
    let source = conn
        .path()
        .ok_or_else(|| anyhow!("An in-memory database cannot be rolled back"))?
        .to_path_buf();
    let backup = Backup::existing(source, snapshot)?;
    backup.restore(conn)?;
    println!(
        "Restored {} from {}",
        backup.source().display(),
        backup.snapshot().display()
    );
    Ok(())
}

const SAMPLE_PROJECT_META: [(&str, &str); 5] = [
    ("github_url", "https://github.com/quill-cms/quill"),
    ("demo_url", "https://quill-cms.github.io"),
    ("tech_stack", "Rust, SQLite"),
    ("status", "active"),
    ("year", "2025"),
];

/// Register the default post types and add the starter content that is
/// missing.
pub fn seed(base: &Path) -> Result<()> {
    let config = Config::load(base)?;
    let mut conn = config.connect()?;
    if is_legacy(&conn)? {
        bail!("Legacy tables found. Run `quill migrate` before seeding");
    }
    let tx = conn.transaction()?;
    schema::create_tables(&tx)?;
    let added = PostType::seed_defaults(&tx)?;
    println!("Registered {added} post types");

    if Post::try_get_by_slug(&tx, "hello-world")?.is_none() {
        let mut hello = NewPost::new(
            ContentKind::Post,
            "Hello World",
            "Welcome to your new blog. This is your first post.",
        );
        hello.excerpt = Some("Welcome to your new blog.".to_string());
        hello.author = Some(config.default_author.clone());
        hello.status = PostStatus::Publish;
        hello.tags = Some("welcome".to_string());
        Post::create(&tx, hello)?;
        println!("Created post 'hello-world'");
    }

    if Post::try_get_by_slug(&tx, "quill")?.is_none() {
        let mut project = NewPost::new(
            ContentKind::Project,
            "Quill",
            "A small blog engine with a unified content model.",
        );
        project.excerpt = Some("Posts, pages and projects in one table.".to_string());
        project.author = Some(config.default_author.clone());
        project.status = PostStatus::Publish;
        project.featured = true;
        project.tags = Some("rust,sqlite,cms".to_string());
        let project = Post::create(&tx, project)?;
        for (key, value) in SAMPLE_PROJECT_META {
            project.set_meta(&tx, key, value)?;
        }
        println!("Created project 'quill'");
    }
    tx.commit()?;
    Ok(())
}

pub fn list_types(base: &Path) -> Result<()> {
    let conn = Config::load(base)?.connect()?;
    for t in PostType::all(&conn)? {
        let mut flags = Vec::new();
        for (set, name) in [
            (t.hierarchical, "hierarchical"),
            (t.has_archive, "archive"),
            (t.supports_categories, "categories"),
            (t.supports_tags, "tags"),
            (t.supports_excerpt, "excerpt"),
            (t.supports_featured_image, "featured-image"),
        ] {
            if set {
                flags.push(name);
            }
        }
        println!("{:<12} {:<16} {}", t.name, t.label, flags.join(","));
    }
    Ok(())
}

pub fn register_type(base: &Path, mut post_type: PostType) -> Result<()> {
    let conn = Config::load(base)?.connect()?;
    post_type.register(&conn)?;
    println!("Registered post type '{}'", post_type.name);
    Ok(())
}

pub fn list(base: &Path, post_type: Option<&str>, status: Option<PostStatus>) -> Result<()> {
    let conn = Config::load(base)?.connect()?;
    let order = match status {
        Some(PostStatus::Publish) => Order::PublishedDesc,
        _ => Order::CreatedDesc,
    };
    let posts = list_posts(&conn, post_type.map(ContentKind::from), status, order)?;
    for post in posts {
        println!(
            "{:>5} {:<10} {:<8} {:<30} {}",
            post.id, post.post_type, post.post_status, post.slug, post.title
        );
    }
    Ok(())
}

/// A post with its custom fields, as printed by `quill show`.
#[derive(Serialize)]
pub struct PostWithMeta {
    #[serde(flatten)]
    pub post: Post,
    pub meta: BTreeMap<String, String>,
}

pub fn post_with_meta(conn: &impl ConnectionMethods, slug: &str) -> Result<PostWithMeta> {
    let post = Post::get_by_slug(conn, slug)?;
    let meta = post.get_all_meta(conn)?;
    Ok(PostWithMeta { post, meta })
}

pub fn show(base: &Path, slug: &str) -> Result<()> {
    let conn = Config::load(base)?.connect()?;
    let shown = post_with_meta(&conn, slug)?;
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

pub fn set_status(base: &Path, slug: &str, status: PostStatus) -> Result<()> {
    let mut conn = Config::load(base)?.connect()?;
    let tx = conn.transaction()?;
    let mut post = Post::get_by_slug(&tx, slug)?;
    let from = post.post_status;
    post.transition_status(&tx, status)?;
    tx.commit()?;
    println!("'{slug}' moved from {from} to {status}");
    Ok(())
}

pub fn meta_set(base: &Path, slug: &str, key: &str, value: &str) -> Result<()> {
    let conn = Config::load(base)?.connect()?;
    Post::get_by_slug(&conn, slug)?.set_meta(&conn, key, value)?;
    Ok(())
}

pub fn meta_get(base: &Path, slug: &str, key: &str) -> Result<()> {
    let conn = Config::load(base)?.connect()?;
    match Post::get_by_slug(&conn, slug)?.get_meta(&conn, key)? {
        Some(value) => println!("{value}"),
        None => bail!("'{slug}' has no {key}"),
    }
    Ok(())
}

pub fn meta_list(base: &Path, slug: &str) -> Result<()> {
    let conn = Config::load(base)?.connect()?;
    for (key, value) in Post::get_by_slug(&conn, slug)?.get_all_meta(&conn)? {
        println!("{key} = {value}");
    }
    Ok(())
}

pub fn base_dir() -> Result<PathBuf> {
    std::env::current_dir()
        .map(|d| d.join(".quill"))
        .map_err(|e| e.into())
}

pub fn handle_error(r: Result<()>) {
    if let Err(e) = r {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
