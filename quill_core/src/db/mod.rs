//! Types, traits, and methods for interacting with the database.
//!
//! The different ways of referring to a database handle:
//! * `ConnectionMethods` is a trait containing the methods available on a connection or a transaction.
//!   Every model operation takes an implementation of `ConnectionMethods`, so the caller
//!   decides whether it runs on its own or as part of a larger transaction.
//! * `Connection` is a direct connection to a SQLite database. It can begin a transaction.
//! * `Transaction` is a database transaction. It implements `ConnectionMethods` and rolls
//!   back when dropped without being committed.

use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Once;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[cfg(feature = "r2d2")]
pub mod r2;
#[cfg(feature = "r2d2")]
pub use r2::ConnectionManager;

/// The name of the sqlite backend.
pub const BACKEND_NAME: &str = "sqlite";

/// Connection string for a private in-memory database.
pub const MEMORY: &str = ":memory:";

fn log_callback(error_code: std::ffi::c_int, message: &str) {
    match error_code {
        rusqlite::ffi::SQLITE_NOTICE => log::trace!("{}", message),
        rusqlite::ffi::SQLITE_OK
        | rusqlite::ffi::SQLITE_DONE
        | rusqlite::ffi::SQLITE_NOTICE_RECOVER_WAL
        | rusqlite::ffi::SQLITE_NOTICE_RECOVER_ROLLBACK => log::info!("{}", message),
        rusqlite::ffi::SQLITE_WARNING | rusqlite::ffi::SQLITE_WARNING_AUTOINDEX => {
            log::warn!("{}", message)
        }
        _ => log::error!("{error_code} {}", message),
    }
}

/// Methods available on a database connection or transaction.
pub trait ConnectionMethods {
    /// The underlying sqlite handle.
    fn sqlite(&self) -> &rusqlite::Connection;

    /// Execute one or more sql statements that take no parameters.
    fn execute(&self, sql: &str) -> Result<()> {
        debug!("execute sql {}", sql);
        self.sqlite().execute_batch(sql)?;
        Ok(())
    }

    /// Tests whether `table` exists.
    fn has_table(&self, table: &str) -> Result<bool> {
        let mut stmt = self
            .sqlite()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?;")?;
        let mut rows = stmt.query([table])?;
        Ok(rows.next()?.is_some())
    }

    /// Names of the columns of `table`, in declaration order. Empty if the
    /// table does not exist.
    fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .sqlite()
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Number of rows in `table`.
    fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        debug!("count sql {}", sql);
        Ok(self.sqlite().query_row(&sql, [], |row| row.get(0))?)
    }
}

/// Quote an identifier for use in generated sql.
pub fn quote_ident(word: &str) -> String {
    format!("\"{}\"", word.replace('"', "\"\""))
}

/// Database connection.
#[derive(Debug)]
pub struct Connection {
    conn: rusqlite::Connection,
    path: Option<PathBuf>,
}
impl Connection {
    /// Open (creating if necessary) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Self::wrap(rusqlite::Connection::open(path)?, Some(path.to_path_buf()))?;
        debug!("opened sqlite database {}", path.display());
        Ok(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::wrap(rusqlite::Connection::open_in_memory()?, None)
    }

    fn wrap(conn: rusqlite::Connection, path: Option<PathBuf>) -> Result<Self> {
        static INIT_SQLITE_LOGGING: Once = Once::new();
        INIT_SQLITE_LOGGING.call_once(|| {
            // Fails if sqlite was already initialised by someone else; we
            // simply go without engine logging then.
            _ = unsafe { rusqlite::trace::config_log(Some(log_callback)) };
        });
        let connection = Connection { conn, path };
        connection.execute("PRAGMA foreign_keys = ON")?;
        Ok(connection)
    }

    /// The file backing this connection, or `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Begin a database transaction. The transaction object must be
    /// used in place of this connection until it is committed or rolled back.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        let trans = self.conn.transaction()?;
        Ok(Transaction { trans })
    }

    /// Close the connection, reporting any error the close raises.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }
}
impl ConnectionMethods for Connection {
    fn sqlite(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

/// Database transaction.
///
/// Begin a transaction using [`Connection::transaction`]. Dropping it
/// without calling [`commit`](Transaction::commit) rolls it back.
#[derive(Debug)]
pub struct Transaction<'c> {
    trans: rusqlite::Transaction<'c>,
}
impl Transaction<'_> {
    /// Commit the transaction
    pub fn commit(self) -> Result<()> {
        Ok(self.trans.commit()?)
    }
    /// Roll back the transaction. Equivalent to dropping it.
    pub fn rollback(self) -> Result<()> {
        Ok(self.trans.rollback()?)
    }
}
impl ConnectionMethods for Transaction<'_> {
    fn sqlite(&self) -> &rusqlite::Connection {
        self.trans.deref()
    }
}

/// Connection specification. Contains the name of a database backend
/// and the backend-specific connection string. See [connect][crate::db::connect]
/// to make a [Connection][crate::db::Connection] from a `ConnectionSpec`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConnectionSpec {
    /// Backend name. Only `sqlite` is supported.
    pub backend_name: String,
    /// Path of the database file, or `:memory:`.
    pub conn_str: String,
}
impl ConnectionSpec {
    /// Create a spec for the named backend.
    pub fn new(backend_name: impl Into<String>, conn_str: impl Into<String>) -> Self {
        ConnectionSpec {
            backend_name: backend_name.into(),
            conn_str: conn_str.into(),
        }
    }
    /// A spec for the sqlite database at `path`.
    pub fn sqlite(path: impl AsRef<Path>) -> Self {
        Self::new(BACKEND_NAME, path.as_ref().to_string_lossy())
    }
    /// Save the connection spec to the filesystem for later use.
    pub fn save(&self, path: &Path) -> Result<()> {
        let path = conn_complete_if_dir(path);
        let mut f = fs::File::create(path)?;
        f.write_all(serde_json::to_string(self)?.as_bytes())
            .map_err(|e| e.into())
    }
    /// Load a previously saved connection spec
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = conn_complete_if_dir(path.as_ref());
        serde_json::from_reader(fs::File::open(path)?).map_err(|e| e.into())
    }
}

fn conn_complete_if_dir(path: &Path) -> Cow<'_, Path> {
    if path.is_dir() {
        Cow::from(path.join("connection.json"))
    } else {
        Cow::from(path)
    }
}

/// Connect to a database.
pub fn connect(spec: &ConnectionSpec) -> Result<Connection> {
    if spec.backend_name != BACKEND_NAME {
        return Err(Error::UnknownBackend(spec.backend_name.clone()));
    }
    match spec.conn_str.as_str() {
        MEMORY => Connection::open_in_memory(),
        path => Connection::open(path),
    }
}
