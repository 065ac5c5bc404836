//! Conversions between Rust values and their SQLite storage form.
//!
//! Timestamps are stored as text. The format sorts lexicographically in
//! chronological order, which the listing queries rely on, and it is the
//! format SQLAlchemy used for the legacy tables.

use chrono::naive::NaiveDateTime;
use chrono::Utc;

use crate::Result;

/// Text format of every stored timestamp.
pub const SQLITE_DT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// The current UTC time, as recorded in `created_at`/`updated_at`.
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Render a timestamp for storage.
pub fn timestamp_to_sql(dt: &NaiveDateTime) -> String {
    dt.format(SQLITE_DT_FORMAT).to_string()
}

/// Parse a stored timestamp. A `T` separator is accepted as well, since
/// some writers store ISO-8601 text.
pub fn timestamp_from_sql(s: &str) -> Result<NaiveDateTime> {
    match NaiveDateTime::parse_from_str(s, SQLITE_DT_FORMAT) {
        Ok(dt) => Ok(dt),
        Err(_) => Ok(NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")?),
    }
}

/// Parse an optional stored timestamp.
pub fn opt_timestamp_from_sql(s: Option<String>) -> Result<Option<NaiveDateTime>> {
    s.as_deref().map(timestamp_from_sql).transpose()
}
