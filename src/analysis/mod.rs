//! Similarity engine: vector distance, temporal sessions, similarity groups
//! and burst series.
//!
//! Everything here is a pure function over photo records. Malformed input
//! (missing or mismatched embeddings) never aborts a pass; it just never
//! matches.

pub mod quality;
pub mod series;
pub mod similarity;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use quality::{pick_best_photo_by_quality, QualityMetrics};
pub use series::{find_photo_series, SeriesGroup, SeriesOptions};
pub use similarity::{find_similar_groups, split_sessions, SimilarityGroup, SimilarityOptions};

/// Calculate cosine similarity between two vectors.
///
/// Returns 0 for empty, length-mismatched or zero-magnitude input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot_product / (norm_a * norm_b);
    if similarity.is_finite() {
        similarity.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Cosine similarity over optional embeddings; a missing side scores 0.
pub fn embedding_similarity(a: Option<&[f32]>, b: Option<&[f32]>) -> f32 {
    match (a, b) {
        (Some(a), Some(b)) => cosine_similarity(a, b),
        _ => 0.0,
    }
}

/// Convert a user-supplied gap in seconds to a `Duration`.
///
/// Negative and NaN input give zero; infinite or out-of-range input saturates
/// at `Duration::MAX`.
pub fn gap_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Ordering applied to similarity and series groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortMethod {
    /// Largest groups first.
    #[default]
    Size,
    DateAsc,
    DateDesc,
    /// Densest first. Only meaningful for series; similarity groups fall back to size.
    Density,
}

impl SortMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMethod::Size => "size",
            SortMethod::DateAsc => "date-asc",
            SortMethod::DateDesc => "date-desc",
            SortMethod::Density => "density",
        }
    }
}

impl fmt::Display for SortMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "size" => Ok(SortMethod::Size),
            "date-asc" | "date_asc" | "oldest" => Ok(SortMethod::DateAsc),
            "date-desc" | "date_desc" | "newest" => Ok(SortMethod::DateDesc),
            "density" => Ok(SortMethod::Density),
            other => Err(format!("unknown sort method: {other}")),
        }
    }
}
