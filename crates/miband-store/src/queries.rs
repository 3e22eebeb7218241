//! Query builder for stored samples.
//!
//! # Example
//!
//! ```
//! use miband_store::{Store, SampleQuery};
//! use time::{OffsetDateTime, Duration};
//!
//! let store = Store::open_in_memory()?;
//! let last_hour = OffsetDateTime::now_utc() - Duration::hours(1);
//!
//! let query = SampleQuery::new()
//!     .device("AA:BB:CC:DD:EE:FF")
//!     .since(last_hour)
//!     .limit(100);
//!
//! let samples = store.query_samples(&query)?;
//! # Ok::<(), miband_store::Error>(())
//! ```

use time::OffsetDateTime;

use crate::models::to_micros;

/// Fluent query builder for heart-rate samples.
///
/// By default results are ordered newest first.
#[derive(Debug, Default, Clone)]
pub struct SampleQuery {
    /// Filter by band address.
    pub device_id: Option<String>,
    /// Only samples captured at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Only samples captured at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by capture time descending.
    pub newest_first: bool,
}

impl SampleQuery {
    /// Query over every band and time, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    #[must_use]
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    #[must_use]
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results. Use with `limit()` for pagination.
    #[must_use]
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Chronological order, for export.
    #[must_use]
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref device_id) = self.device_id {
            conditions.push("device_id = ?");
            params.push(Box::new(device_id.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("captured_at_us >= ?");
            params.push(Box::new(to_micros(since)));
        }

        if let Some(until) = self.until {
            conditions.push("captured_at_us <= ?");
            params.push(Box::new(to_micros(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, device_id, captured_at_us, bpm FROM heart_rate {} \
             ORDER BY captured_at_us {}, id {}",
            where_clause, order, order
        );

        // SQLite only accepts OFFSET after a LIMIT.
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query() {
        let query = SampleQuery::new();
        assert!(query.newest_first);
        let (where_clause, params) = query.build_where();
        assert!(where_clause.is_empty());
        assert!(params.is_empty());
        assert!(query.build_sql().ends_with("ORDER BY captured_at_us DESC, id DESC"));
    }

    #[test]
    fn test_filters_build_where() {
        let now = OffsetDateTime::now_utc();
        let query = SampleQuery::new()
            .device("AA:BB:CC:DD:EE:FF")
            .since(now)
            .until(now);
        let (where_clause, params) = query.build_where();
        assert_eq!(
            where_clause,
            "WHERE device_id = ? AND captured_at_us >= ? AND captured_at_us <= ?"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_pagination_and_order() {
        let sql = SampleQuery::new().oldest_first().limit(10).offset(20).build_sql();
        assert!(sql.contains("ASC"));
        assert!(sql.ends_with("LIMIT 10 OFFSET 20"));

        let sql = SampleQuery::new().offset(5).build_sql();
        assert!(sql.ends_with("LIMIT -1 OFFSET 5"));
    }
}
