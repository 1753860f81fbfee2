//! Query builder for history records.
//!
//! # Example
//!
//! ```
//! use fireserver_store::{HistoryQuery, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let query = HistoryQuery::new()
//!     .device("kitchen")
//!     .since(yesterday)
//!     .limit(50)
//!     .offset(0);
//!
//! let records = store.recent(&query)?;
//! assert!(records.is_empty());
//! # Ok::<(), fireserver_store::Error>(())
//! ```

use time::OffsetDateTime;

/// Fluent query builder for history records.
///
/// Use this with [`Store::recent`](crate::Store::recent). All filters are
/// optional and can be chained in any order.
///
/// Results are ordered by insertion, newest first, unless
/// [`oldest_first`](Self::oldest_first) is set. Insertion order is the row id,
/// so two records stamped within the same second still come back in the
/// order they were appended.
#[derive(Debug, Default, Clone)]
pub struct HistoryQuery {
    /// Filter by device ID.
    pub device_id: Option<String>,
    /// Include only records created at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Include only records created at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Number of results to skip.
    pub offset: Option<u32>,
    /// Newest first. Default: true.
    pub newest_first: bool,
}

impl HistoryQuery {
    /// Create a new query: all devices, no time range, no limit, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    pub fn device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results. With `.limit(50).offset(50)` you get page 2.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref device_id) = self.device_id {
            conditions.push("device_id = ?");
            params.push(Box::new(device_id.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("created_at >= ?");
            params.push(Box::new(since.unix_timestamp()));
        }

        if let Some(until) = self.until {
            conditions.push("created_at <= ?");
            params.push(Box::new(until.unix_timestamp()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, device_id, sensor_1, sensor_2, sensor_3, raw_1, raw_2, raw_3, \
             status, alarm, created_at \
             FROM history {} ORDER BY id {}",
            where_clause, order
        );

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        sql
    }
}
