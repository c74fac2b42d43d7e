use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Parse an RFC 3339 timestamp column, returning CorruptRow on failure.
pub fn parse_time(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw:?}: {e}"),
        })
}

pub fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}
