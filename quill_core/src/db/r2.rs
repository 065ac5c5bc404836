//! R2D2 support for Quill.

use std::ops::Deref;

pub use r2d2::ManageConnection;

use crate::db::{Connection, ConnectionMethods, ConnectionSpec};
use crate::Result;

/// R2D2 support for Quill. Implements [`r2d2::ManageConnection`].
///
/// Each pooled connection is a separate sqlite handle, so the spec must
/// name a database file; `:memory:` would give every connection its own
/// empty database.
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    spec: ConnectionSpec,
}
impl ConnectionManager {
    /// Create a manager opening connections described by `spec`.
    pub fn new(spec: ConnectionSpec) -> Self {
        ConnectionManager { spec }
    }
}

impl ManageConnection for ConnectionManager {
    type Connection = Connection;
    type Error = crate::Error;

    fn connect(&self) -> Result<Self::Connection> {
        crate::db::connect(&self.spec)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<()> {
        conn.sqlite().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

impl ConnectionMethods for r2d2::PooledConnection<ConnectionManager> {
    fn sqlite(&self) -> &rusqlite::Connection {
        self.deref().sqlite()
    }
}
