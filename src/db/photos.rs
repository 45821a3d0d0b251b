//! Photo records and their queries.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::embeddings::{bytes_to_embedding, embedding_to_bytes};
use super::Database;
use crate::analysis::quality::QualityMetrics;
use crate::error::StoreError;

/// Whether a photo still needs an embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    New,
    Done,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::New => "new",
            EmbeddingStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(EmbeddingStatus::New),
            "done" => Some(EmbeddingStatus::Done),
            _ => None,
        }
    }
}

/// A photo in the library, keyed by its opaque `file_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub file_id: String,
    pub name: String,
    pub path: String,
    /// Capture time in epoch millis, or last-modified when capture time is unknown.
    pub photo_taken_ts: i64,
    #[serde(default)]
    pub modified_ts: Option<i64>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub embedding_status: EmbeddingStatus,
    #[serde(default)]
    pub quality_score: Option<f32>,
    #[serde(default)]
    pub quality_metrics: Option<QualityMetrics>,
}

impl PhotoRecord {
    pub fn new(
        file_id: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
        photo_taken_ts: i64,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            name: name.into(),
            path: path.into(),
            photo_taken_ts,
            modified_ts: None,
            size_bytes: None,
            embedding: None,
            embedding_status: EmbeddingStatus::New,
            quality_score: None,
            quality_metrics: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self.embedding_status = EmbeddingStatus::Done;
        self
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

/// What an ingest upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Metadata refreshed, embedding kept.
    Updated,
    /// File changed on disk, embedding discarded and status back to `new`.
    Reset,
}

/// Per-status photo counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub new: usize,
    pub done: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.new + self.done
    }
}

const PHOTO_COLUMNS: &str = "file_id, name, path, photo_taken_ts, modified_ts, size_bytes, \
     embedding, embedding_status, quality_score, quality_metrics";

fn row_to_photo(row: &Row<'_>) -> rusqlite::Result<PhotoRecord> {
    let embedding: Option<Vec<u8>> = row.get(6)?;
    let status: String = row.get(7)?;
    let metrics_json: Option<String> = row.get(9)?;

    let quality_metrics = metrics_json.and_then(|json| match serde_json::from_str(&json) {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed quality metrics");
            None
        }
    });

    Ok(PhotoRecord {
        file_id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        photo_taken_ts: row.get(3)?,
        modified_ts: row.get(4)?,
        size_bytes: row.get::<_, Option<i64>>(5)?.map(|s| s.max(0) as u64),
        embedding: embedding.map(|bytes| bytes_to_embedding(&bytes)),
        embedding_status: EmbeddingStatus::parse(&status).unwrap_or(EmbeddingStatus::New),
        quality_score: row.get(8)?,
        quality_metrics,
    })
}

impl Database {
    fn query_photos(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<PhotoRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let photos = stmt
            .query_map(params, row_to_photo)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    /// Status-indexed scan of photos still waiting for an embedding.
    pub fn get_photos_without_embedding(&self) -> Result<Vec<PhotoRecord>, StoreError> {
        self.query_photos(
            &format!(
                "SELECT {PHOTO_COLUMNS} FROM photos WHERE embedding_status = 'new' \
                 ORDER BY photo_taken_ts ASC, file_id ASC"
            ),
            [],
        )
    }

    pub fn get_all_photos_with_embedding(&self) -> Result<Vec<PhotoRecord>, StoreError> {
        self.query_photos(
            &format!(
                "SELECT {PHOTO_COLUMNS} FROM photos WHERE embedding_status = 'done' \
                 ORDER BY photo_taken_ts ASC, file_id ASC"
            ),
            [],
        )
    }

    pub fn get_all_photos(&self) -> Result<Vec<PhotoRecord>, StoreError> {
        self.query_photos(
            &format!("SELECT {PHOTO_COLUMNS} FROM photos ORDER BY photo_taken_ts ASC, file_id ASC"),
            [],
        )
    }

    pub fn get_photo(&self, file_id: &str) -> Result<Option<PhotoRecord>, StoreError> {
        let conn = self.conn()?;
        let photo = conn
            .query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE file_id = ?"),
                [file_id],
                row_to_photo,
            )
            .optional()?;
        Ok(photo)
    }

    /// Insert or refresh a photo from ingestion.
    ///
    /// An existing embedding survives as long as the file's modification time
    /// is unchanged; otherwise the row is replaced and goes back to `new`.
    pub fn upsert_photo(&self, photo: &PhotoRecord) -> Result<UpsertOutcome, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: Option<Option<i64>> = tx
            .query_row(
                "SELECT modified_ts FROM photos WHERE file_id = ?",
                [&photo.file_id],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            Some(modified_ts) if modified_ts == photo.modified_ts => {
                tx.execute(
                    r#"
                    UPDATE photos
                    SET name = ?, path = ?, photo_taken_ts = ?, size_bytes = ?
                    WHERE file_id = ?
                    "#,
                    params![
                        photo.name,
                        photo.path,
                        photo.photo_taken_ts,
                        photo.size_bytes.map(|s| s as i64),
                        photo.file_id
                    ],
                )?;
                UpsertOutcome::Updated
            }
            previous => {
                let metrics = photo
                    .quality_metrics
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                let embedding = photo.embedding.as_deref().map(embedding_to_bytes);
                let status = if photo.embedding.is_some() {
                    EmbeddingStatus::Done
                } else {
                    EmbeddingStatus::New
                };

                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO photos
                        (file_id, name, path, photo_taken_ts, modified_ts, size_bytes,
                         embedding, embedding_dim, embedding_status, quality_score, quality_metrics)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    params![
                        photo.file_id,
                        photo.name,
                        photo.path,
                        photo.photo_taken_ts,
                        photo.modified_ts,
                        photo.size_bytes.map(|s| s as i64),
                        embedding,
                        photo.embedding.as_ref().map(|e| e.len() as i64),
                        status.as_str(),
                        photo.quality_score,
                        metrics
                    ],
                )?;

                if previous.is_some() {
                    UpsertOutcome::Reset
                } else {
                    UpsertOutcome::Inserted
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Attach a finished embedding and its quality metrics, flipping status to `done`.
    pub fn update_photo_embedding(
        &self,
        file_id: &str,
        embedding: &[f32],
        quality_metrics: Option<&QualityMetrics>,
    ) -> Result<(), StoreError> {
        let metrics = quality_metrics.map(serde_json::to_string).transpose()?;
        let quality_score = quality_metrics.and_then(|m| m.overall_score());

        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE photos
            SET embedding = ?, embedding_dim = ?, embedding_status = 'done',
                quality_score = ?, quality_metrics = ?, embedded_at = CURRENT_TIMESTAMP
            WHERE file_id = ?
            "#,
            params![
                embedding_to_bytes(embedding),
                embedding.len() as i64,
                quality_score,
                metrics,
                file_id
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::PhotoNotFound(file_id.to_string()));
        }
        Ok(())
    }

    pub fn delete_photos(&self, file_ids: &[String]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM photos WHERE file_id = ?")?;
            for file_id in file_ids {
                deleted += stmt.execute([file_id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    pub fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT embedding_status, COUNT(*) FROM photos GROUP BY embedding_status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match EmbeddingStatus::parse(&status) {
                Some(EmbeddingStatus::New) => counts.new += count as usize,
                Some(EmbeddingStatus::Done) => counts.done += count as usize,
                None => {}
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::quality::ExposureStats;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn photo(id: &str, ts: i64) -> PhotoRecord {
        let mut photo = PhotoRecord::new(id, format!("{id}.jpg"), format!("/photos/{id}.jpg"), ts);
        photo.modified_ts = Some(ts);
        photo
    }

    #[test]
    fn test_new_photos_are_pending() {
        let db = db();
        db.upsert_photo(&photo("b", 200)).unwrap();
        db.upsert_photo(&photo("a", 100)).unwrap();

        let pending = db.get_photos_without_embedding().unwrap();
        let ids: Vec<&str> = pending.iter().map(|p| p.file_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(db.get_all_photos_with_embedding().unwrap().is_empty());
    }

    #[test]
    fn test_update_embedding_flips_status() {
        let db = db();
        db.upsert_photo(&photo("a", 100)).unwrap();

        let metrics = QualityMetrics {
            sharpness: Some(0.8),
            exposure: Some(ExposureStats {
                mean_luminance: 0.5,
                shadow_clipping: 0.0,
                highlight_clipping: 0.0,
            }),
            faces: None,
        };
        db.update_photo_embedding("a", &[0.25, -0.5], Some(&metrics)).unwrap();

        let stored = db.get_photo("a").unwrap().unwrap();
        assert_eq!(stored.embedding_status, EmbeddingStatus::Done);
        assert_eq!(stored.embedding, Some(vec![0.25, -0.5]));
        assert_eq!(stored.quality_metrics, Some(metrics));
        assert!(stored.quality_score.is_some());
        assert!(db.get_photos_without_embedding().unwrap().is_empty());
    }

    #[test]
    fn test_update_missing_photo_fails() {
        let db = db();
        let err = db.update_photo_embedding("missing", &[1.0], None).unwrap_err();
        assert!(matches!(err, StoreError::PhotoNotFound(id) if id == "missing"));
    }

    #[test]
    fn test_upsert_keeps_embedding_when_unchanged() {
        let db = db();
        db.upsert_photo(&photo("a", 100)).unwrap();
        db.update_photo_embedding("a", &[1.0, 0.0], None).unwrap();

        let mut renamed = photo("a", 100);
        renamed.name = "renamed.jpg".to_string();
        assert_eq!(db.upsert_photo(&renamed).unwrap(), UpsertOutcome::Updated);

        let stored = db.get_photo("a").unwrap().unwrap();
        assert_eq!(stored.name, "renamed.jpg");
        assert_eq!(stored.embedding_status, EmbeddingStatus::Done);
    }

    #[test]
    fn test_upsert_resets_changed_file() {
        let db = db();
        db.upsert_photo(&photo("a", 100)).unwrap();
        db.update_photo_embedding("a", &[1.0, 0.0], None).unwrap();

        let mut touched = photo("a", 100);
        touched.modified_ts = Some(500);
        assert_eq!(db.upsert_photo(&touched).unwrap(), UpsertOutcome::Reset);

        let stored = db.get_photo("a").unwrap().unwrap();
        assert_eq!(stored.embedding_status, EmbeddingStatus::New);
        assert!(stored.embedding.is_none());
    }

    #[test]
    fn test_status_and_embedding_stay_consistent() {
        let db = db();
        let conn = db.conn().unwrap();
        let result = conn.execute(
            "INSERT INTO photos (file_id, name, path, photo_taken_ts, embedding_status) \
             VALUES ('x', 'x.jpg', '/x.jpg', 0, 'done')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_delete_and_count() {
        let db = db();
        db.upsert_photo(&photo("a", 1)).unwrap();
        db.upsert_photo(&photo("b", 2)).unwrap();
        db.upsert_photo(&photo("c", 3)).unwrap();
        db.update_photo_embedding("c", &[1.0], None).unwrap();

        let counts = db.count_by_status().unwrap();
        assert_eq!(counts, StatusCounts { new: 2, done: 1 });

        let deleted = db
            .delete_photos(&["a".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.count_by_status().unwrap().total(), 2);
    }
}
