use std::sync::Arc;

use anyhow::Result;
use aura_core::attribution::AttributionSnapshot;
use aura_core::record::QuizAnswers;
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::schema::init_sql;

/// A DuckDB-backed funnel store.
///
/// DuckDB is single-writer, so the connection sits behind `Arc<Mutex<_>>`.
/// Holding the lock across a read and its follow-up write is what makes the
/// quiz-answer merge atomic.
///
/// Memory and thread limits are enforced by [`init_sql`] at open time.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

/// A stored value that does not decode into its domain type.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unparseable timestamp {0:?}")]
    Timestamp(String),
    #[error("unknown event type {0:?}")]
    EventType(String),
    #[error("invalid session token {0:?}")]
    SessionToken(String),
    #[error("invalid quiz answers: {0}")]
    Answers(#[from] serde_json::Error),
}

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Format a timestamp for a DuckDB `TIMESTAMP` parameter (microsecond
/// precision, as DuckDB stores it).
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Parse `CAST(ts AS VARCHAR)` output back into UTC.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|_| DecodeError::Timestamp(raw.to_string()))
}

pub(crate) fn parse_answers(raw: &str) -> Result<QuizAnswers, DecodeError> {
    Ok(serde_json::from_str(raw)?)
}

pub(crate) fn parse_token(raw: &str) -> Result<aura_core::SessionToken, DecodeError> {
    aura_core::SessionToken::parse(raw).ok_or_else(|| DecodeError::SessionToken(raw.to_string()))
}

/// Read the eight attribution columns starting at `start`, in
/// `utm_source, utm_medium, utm_campaign, utm_content, utm_term, fbclid, fbc, fbp`
/// order.
pub(crate) fn attribution_at(
    row: &duckdb::Row<'_>,
    start: usize,
) -> Result<AttributionSnapshot, duckdb::Error> {
    Ok(AttributionSnapshot {
        utm_source: row.get(start)?,
        utm_medium: row.get(start + 1)?,
        utm_campaign: row.get(start + 2)?,
        utm_content: row.get(start + 3)?,
        utm_term: row.get(start + 4)?,
        fbclid: row.get(start + 5)?,
        fbc: row.get(start + 6)?,
        fbp: row.get(start + 7)?,
    })
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Data is discarded on drop.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the connection lock for direct queries.
    ///
    /// Intended for integration tests that need to verify stored rows.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_round_trip_through_varchar_format() {
        let now = Utc::now();
        let parsed = parse_ts(&fmt_ts(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
        assert!(parse_ts("2026-10-18 09:30:00").is_ok());
        assert!(matches!(parse_ts("yesterday"), Err(DecodeError::Timestamp(_))));
    }
}
