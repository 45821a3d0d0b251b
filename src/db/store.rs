//! Store abstraction consumed by the embedding processor, the scanner and the
//! review bridge.
//!
//! Every write is a single-key operation on `file_id`, so callers never need a
//! cross-record transaction.

use std::str::FromStr;

use super::photos::{PhotoRecord, StatusCounts, UpsertOutcome};
use super::Database;
use crate::analysis::quality::QualityMetrics;
use crate::error::StoreError;

pub trait PhotoStore: Send + Sync {
    /// Photos with `embedding_status = new`, oldest first.
    fn get_photos_without_embedding(&self) -> Result<Vec<PhotoRecord>, StoreError>;

    /// Photos with `embedding_status = done`, oldest first.
    fn get_all_photos_with_embedding(&self) -> Result<Vec<PhotoRecord>, StoreError>;

    fn get_all_photos(&self) -> Result<Vec<PhotoRecord>, StoreError>;

    fn get_photo(&self, file_id: &str) -> Result<Option<PhotoRecord>, StoreError>;

    fn upsert_photo(&self, photo: &PhotoRecord) -> Result<UpsertOutcome, StoreError>;

    /// Fails with [`StoreError::PhotoNotFound`] when `file_id` is absent.
    fn update_photo_embedding(
        &self,
        file_id: &str,
        embedding: &[f32],
        quality_metrics: Option<&QualityMetrics>,
    ) -> Result<(), StoreError>;

    fn delete_photos(&self, file_ids: &[String]) -> Result<usize, StoreError>;

    fn count_by_status(&self) -> Result<StatusCounts, StoreError>;

    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

impl PhotoStore for Database {
    fn get_photos_without_embedding(&self) -> Result<Vec<PhotoRecord>, StoreError> {
        Database::get_photos_without_embedding(self)
    }

    fn get_all_photos_with_embedding(&self) -> Result<Vec<PhotoRecord>, StoreError> {
        Database::get_all_photos_with_embedding(self)
    }

    fn get_all_photos(&self) -> Result<Vec<PhotoRecord>, StoreError> {
        Database::get_all_photos(self)
    }

    fn get_photo(&self, file_id: &str) -> Result<Option<PhotoRecord>, StoreError> {
        Database::get_photo(self, file_id)
    }

    fn upsert_photo(&self, photo: &PhotoRecord) -> Result<UpsertOutcome, StoreError> {
        Database::upsert_photo(self, photo)
    }

    fn update_photo_embedding(
        &self,
        file_id: &str,
        embedding: &[f32],
        quality_metrics: Option<&QualityMetrics>,
    ) -> Result<(), StoreError> {
        Database::update_photo_embedding(self, file_id, embedding, quality_metrics)
    }

    fn delete_photos(&self, file_ids: &[String]) -> Result<usize, StoreError> {
        Database::delete_photos(self, file_ids)
    }

    fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        Database::count_by_status(self)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        Database::get_setting(self, key)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        Database::set_setting(self, key, value)
    }
}

/// Read a typed setting, falling back to `default` when it is missing or
/// does not parse.
pub fn setting_or<T: FromStr>(store: &dyn PhotoStore, key: &str, default: T) -> T {
    match store.get_setting(key) {
        Ok(Some(raw)) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable setting");
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            tracing::warn!(key, error = %e, "Failed to read setting");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_or() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let store: &dyn PhotoStore = &db;

        assert_eq!(setting_or(store, "workers", 4usize), 4);
        store.set_setting("workers", " 2 ").unwrap();
        assert_eq!(setting_or(store, "workers", 4usize), 2);
        store.set_setting("workers", "lots").unwrap();
        assert_eq!(setting_or(store, "workers", 4usize), 4);
    }
}
