use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::similarity::DEFAULT_SIMILARITY_THRESHOLD;
use crate::analysis::{gap_from_secs, SeriesOptions, SimilarityOptions, SortMethod};
use crate::clip::{default_models_dir, ClipOptions};
use crate::db::settings::{SESSION_GAP_HOURS_KEY, SIMILARITY_THRESHOLD_KEY, WORKER_COUNT_KEY};
use crate::db::{setting_or, PhotoStore};

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "SNAPCULL_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub series: SeriesConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long to wait for every worker to load its model.
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,

    #[serde(default = "default_models_dir")]
    pub model_dir: PathBuf,

    /// ONNX Runtime threads per worker.
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    #[serde(default = "default_true")]
    pub compute_quality: bool,
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_init_timeout_secs() -> u64 {
    120
}

fn default_intra_threads() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            init_timeout_secs: default_init_timeout_secs(),
            model_dir: default_models_dir(),
            intra_threads: default_intra_threads(),
            compute_quality: default_true(),
        }
    }
}

impl EmbeddingConfig {
    pub fn clip_options(&self) -> ClipOptions {
        ClipOptions {
            model_dir: self.model_dir.clone(),
            intra_threads: self.intra_threads,
            compute_quality: self.compute_quality,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_session_gap_hours")]
    pub session_gap_hours: f64,

    #[serde(default)]
    pub sort: SortMethod,
}

fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

fn default_session_gap_hours() -> f64 {
    1.0
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            session_gap_hours: default_session_gap_hours(),
            sort: SortMethod::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn similarity_options(&self) -> SimilarityOptions {
        SimilarityOptions::new(self.similarity_threshold, self.session_gap_hours, self.sort)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesConfig {
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,

    #[serde(default = "default_max_gap_minutes")]
    pub max_gap_minutes: f64,

    /// Photos per minute.
    #[serde(default = "default_min_density")]
    pub min_density: f64,

    #[serde(default)]
    pub sort: SortMethod,
}

fn default_min_group_size() -> usize {
    20
}

fn default_max_gap_minutes() -> f64 {
    5.0
}

fn default_min_density() -> f64 {
    3.0
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            min_group_size: default_min_group_size(),
            max_gap_minutes: default_max_gap_minutes(),
            min_density: default_min_density(),
            sort: SortMethod::default(),
        }
    }
}

impl SeriesConfig {
    pub fn series_options(&self) -> SeriesOptions {
        SeriesOptions {
            min_group_size: self.min_group_size,
            max_gap: gap_from_secs(self.max_gap_minutes * 60.0),
            min_density: self.min_density,
            sort_method: self.sort,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScannerConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "tif", "tiff", "bmp"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            follow_symlinks: false,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snapcull")
        .join("snapcull.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            embedding: EmbeddingConfig::default(),
            analysis: AnalysisConfig::default(),
            series: SeriesConfig::default(),
            scanner: ScannerConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing a default file if none exists.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "Wrote default config");
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("snapcull")
    }

    pub fn config_path() -> PathBuf {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => Self::config_dir().join("config.toml"),
        }
    }

    /// Apply values stored in the database settings table, which take
    /// precedence over the file.
    pub fn apply_store_overrides(&mut self, store: &dyn PhotoStore) {
        self.embedding.worker_count =
            setting_or(store, WORKER_COUNT_KEY, self.embedding.worker_count);
        self.analysis.similarity_threshold =
            setting_or(store, SIMILARITY_THRESHOLD_KEY, self.analysis.similarity_threshold);
        self.analysis.session_gap_hours =
            setting_or(store, SESSION_GAP_HOURS_KEY, self.analysis.session_gap_hours);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/photos.db"

            [analysis]
            similarity_threshold = 0.9
            sort = "date-desc"
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/photos.db"));
        assert_eq!(config.analysis.similarity_threshold, 0.9);
        assert_eq!(config.analysis.session_gap_hours, 1.0);
        assert_eq!(config.analysis.sort, SortMethod::DateDesc);
        assert_eq!(config.embedding.worker_count, 4);
        assert_eq!(config.series.min_group_size, 20);
        assert!(config.scanner.image_extensions.contains(&"jpg".to_string()));
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, Config::default());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "embedding = 3").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_store_overrides() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.set_setting(WORKER_COUNT_KEY, "2").unwrap();
        db.set_setting(SIMILARITY_THRESHOLD_KEY, "0.85").unwrap();

        let mut config = Config::default();
        config.apply_store_overrides(&db);

        assert_eq!(config.embedding.worker_count, 2);
        assert_eq!(config.analysis.similarity_threshold, 0.85);
        assert_eq!(config.analysis.session_gap_hours, 1.0);
    }

    #[test]
    fn test_option_conversions() {
        let series = SeriesConfig {
            max_gap_minutes: 0.5,
            ..Default::default()
        };
        assert_eq!(series.series_options().max_gap, Duration::from_secs(30));

        let analysis = AnalysisConfig {
            session_gap_hours: 2.0,
            ..Default::default()
        };
        assert_eq!(
            analysis.similarity_options().session_gap,
            Duration::from_secs(7200)
        );
    }

    #[test]
    fn test_huge_gaps_saturate() {
        for minutes in [f64::INFINITY, 1e300] {
            let series = SeriesConfig {
                max_gap_minutes: minutes,
                ..Default::default()
            };
            assert_eq!(series.series_options().max_gap, Duration::MAX);
        }

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.set_setting(SESSION_GAP_HOURS_KEY, "1e300").unwrap();
        let mut config = Config::default();
        config.apply_store_overrides(&db);
        assert_eq!(config.analysis.similarity_options().session_gap, Duration::MAX);

        db.set_setting(SESSION_GAP_HOURS_KEY, "inf").unwrap();
        config.apply_store_overrides(&db);
        assert_eq!(config.analysis.similarity_options().session_gap, Duration::MAX);
    }
}
