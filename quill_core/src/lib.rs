//! Library providing the Quill content model and its storage.
//!
//! All content lives in one polymorphic `posts` table, discriminated by
//! `post_type`. Which capabilities a type offers is described by the
//! [`PostType`] registry, and open-ended attributes are attached to posts
//! through the `post_meta` key/value table (see [`meta`]).
//!
//! Every operation takes an explicit connection implementing
//! [`db::ConnectionMethods`]. Wrap calls in a [`db::Transaction`] when
//! several of them must succeed or fail together.
#![deny(missing_docs)]

use thiserror::Error as ThisError;

pub mod db;
pub mod meta;
pub mod migrations;
pub mod post;
pub mod post_type;
pub mod slug;
pub mod sqlval;

pub use migrations::Step;
pub use post::{ContentKind, NewPost, Order, Post, PostQuery, PostStatus};
pub use post_type::PostType;

/// Author recorded on posts created without an explicit author.
pub const DEFAULT_AUTHOR: &str = "Admin";

/// Result type that uses [`crate::Error`].
pub type Result<T> = std::result::Result<T, crate::Error>;

/// Reasons a post or meta write is rejected before anything is committed.
#[allow(missing_docs)]
#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Field {0} is required")]
    MissingField(&'static str),
    #[error("Slug '{0}' is not url-safe")]
    InvalidSlug(String),
    #[error("Slug '{0}' is already in use")]
    SlugTaken(String),
    #[error("Post type '{0}' is not registered")]
    UnknownPostType(String),
    #[error("Parent post {0} does not exist")]
    ParentNotFound(i64),
    #[error("Post type '{0}' is not hierarchical")]
    ParentNotHierarchical(String),
    #[error("Post {0} cannot be its own ancestor")]
    ParentCycle(i64),
}

/// Quill errors.
#[allow(missing_docs)]
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("No such {kind}: {key}")]
    NotFound { kind: &'static str, key: String },
    #[error("Post type '{0}' is already registered")]
    DuplicateType(String),
    #[error("Post type '{name}' is still used by {posts} posts")]
    PostTypeInUse { name: String, posts: i64 },
    #[error("Migration pre-check failed: {0}")]
    MigrationPrecheck(String),
    #[error("Migration failed at {step}: {source}")]
    MigrationStep {
        step: Step,
        #[source]
        source: Box<Error>,
    },
    #[error("Migration error {0}")]
    Migration(String),
    #[error("Unknown backend {0}")]
    UnknownBackend(String),
    #[error("No enum variant named '{0}'")]
    UnknownEnumVariant(String),
    #[error("(De)serialization error {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("IO error {0}")]
    IO(#[from] std::io::Error),
    #[error("Sqlite error {0}")]
    SQLite(#[from] rusqlite::Error),
    #[error("Chrono error {0}")]
    Chrono(#[from] chrono::ParseError),
    #[cfg(feature = "r2d2")]
    #[error("Connection pool error {0}")]
    Pool(#[from] r2d2::Error),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Error::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// True for the "lookup failed" family of errors, which request
    /// handlers turn into a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
