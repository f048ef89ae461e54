//! Key/value funnel settings (currently the `webhook_urls` JSON blob).

use anyhow::Result;
use duckdb::OptionalExt;

use crate::DuckDbBackend;

impl DuckDbBackend {
    /// `None` when the key was never written; query failures propagate.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                duckdb::params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            duckdb::params![key, value],
        )?;
        tracing::debug!(key, "Setting updated");
        Ok(())
    }
}
