//! Key/value settings stored next to the photos.

use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::error::StoreError;

pub const WORKER_COUNT_KEY: &str = "embedding.worker_count";
pub const SIMILARITY_THRESHOLD_KEY: &str = "analysis.similarity_threshold";
pub const SESSION_GAP_HOURS_KEY: &str = "analysis.session_gap_hours";

impl Database {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        assert_eq!(db.get_setting(WORKER_COUNT_KEY).unwrap(), None);
        db.set_setting(WORKER_COUNT_KEY, "2").unwrap();
        db.set_setting(WORKER_COUNT_KEY, "6").unwrap();
        assert_eq!(db.get_setting(WORKER_COUNT_KEY).unwrap().as_deref(), Some("6"));
    }
}
