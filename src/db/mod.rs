mod schema;
pub mod embeddings;
pub mod photos;
pub mod settings;
pub mod store;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub use photos::{EmbeddingStatus, PhotoRecord, StatusCounts, UpsertOutcome};
pub use schema::{MIGRATIONS, SCHEMA};
pub use store::{setting_or, PhotoStore};

use crate::error::StoreError;

/// SQLite-backed photo store.
///
/// The connection sits behind a mutex so one `Database` can be shared between
/// the embedding completion path and the rest of the application.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        run_migrations(&conn)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('photos')")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    for (column, sql) in MIGRATIONS {
        if !columns.iter().any(|c| c == column) {
            tracing::info!(column, "Migrating photos table");
            conn.execute(sql, [])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(db: &Database) -> Vec<String> {
        let conn = db.conn().unwrap();
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('photos')").unwrap();
        let names = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        names
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();
        assert!(columns(&db).contains(&"quality_metrics".to_string()));
    }

    #[test]
    fn test_migrates_older_table() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .unwrap()
            .execute_batch(
                r#"
                CREATE TABLE photos (
                    file_id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    path TEXT NOT NULL,
                    photo_taken_ts INTEGER NOT NULL,
                    modified_ts INTEGER,
                    size_bytes INTEGER,
                    scanned_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                    embedding BLOB,
                    embedding_dim INTEGER,
                    embedding_status TEXT NOT NULL DEFAULT 'new'
                );
                "#,
            )
            .unwrap();

        db.initialize().unwrap();
        let cols = columns(&db);
        for (column, _) in MIGRATIONS {
            assert!(cols.iter().any(|c| c == column), "missing {column}");
        }
    }
}
