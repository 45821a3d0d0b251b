//! Local directory scanner. Turns image files into `new` photo records.

pub mod discovery;
pub mod metadata;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::config::ScannerConfig;
use crate::db::{PhotoRecord, PhotoStore, UpsertOutcome};
use crate::progress::TaskProgress;

pub use discovery::discover_images;
pub use metadata::{extract_taken_ts, parse_exif_datetime};

/// Stable id for a file: hex SHA-256 of its path.
pub fn file_id_for_path(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub total_found: usize,
    pub new: usize,
    pub updated: usize,
    /// Files that changed on disk and lost their embedding.
    pub reset: usize,
    pub failed: usize,
}

pub struct Scanner {
    extensions: Vec<String>,
    follow_symlinks: bool,
}

impl Scanner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            extensions: config.image_extensions.clone(),
            follow_symlinks: config.follow_symlinks,
        }
    }

    fn build_record(path: &Path) -> Result<PhotoRecord> {
        let facts = metadata::file_facts(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut photo = PhotoRecord::new(
            file_id_for_path(path),
            name,
            path.to_string_lossy(),
            facts.taken_ts,
        );
        photo.modified_ts = Some(facts.modified_ts);
        photo.size_bytes = Some(facts.size_bytes);
        Ok(photo)
    }

    /// Scan `directory` recursively and upsert a record per image. Metadata
    /// is read in parallel; `progress` is called once per stored file.
    pub fn scan_directory<F>(
        &self,
        directory: &Path,
        store: &dyn PhotoStore,
        mut progress: F,
    ) -> Result<ScanResult>
    where
        F: FnMut(TaskProgress),
    {
        if !directory.is_dir() {
            anyhow::bail!("Not a directory: {}", directory.display());
        }

        let paths = discover_images(directory, &self.extensions, self.follow_symlinks);
        let total = paths.len();
        tracing::info!(dir = %directory.display(), files = total, "Scanning directory");

        let records: Vec<(PathBuf, Result<PhotoRecord>)> = paths
            .into_par_iter()
            .map(|path| {
                let record = Self::build_record(&path);
                (path, record)
            })
            .collect();

        let mut result = ScanResult {
            total_found: total,
            ..Default::default()
        };

        for (index, (path, record)) in records.into_iter().enumerate() {
            match record {
                Ok(photo) => {
                    let outcome = store
                        .upsert_photo(&photo)
                        .with_context(|| format!("Failed to store {}", path.display()))?;
                    match outcome {
                        UpsertOutcome::Inserted => result.new += 1,
                        UpsertOutcome::Updated => result.updated += 1,
                        UpsertOutcome::Reset => result.reset += 1,
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to scan file");
                    result.failed += 1;
                }
            }
            progress(
                TaskProgress::new(index + 1, total).with_item(path.to_string_lossy().into_owned()),
            );
        }

        tracing::info!(
            new = result.new,
            updated = result.updated,
            reset = result.reset,
            failed = result.failed,
            "Scan complete"
        );
        Ok(result)
    }

    /// Delete records under `root` whose files no longer exist.
    pub fn prune_missing(&self, root: &Path, store: &dyn PhotoStore) -> Result<usize> {
        let missing: Vec<String> = store
            .get_all_photos()?
            .into_iter()
            .filter(|photo| {
                let path = Path::new(&photo.path);
                path.starts_with(root) && !path.exists()
            })
            .map(|photo| photo.file_id)
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }
        let removed = store.delete_photos(&missing)?;
        tracing::info!(root = %root.display(), removed, "Pruned missing photos");
        Ok(removed)
    }
}
