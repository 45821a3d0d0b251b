//! Photo quality metrics and best-of-group selection.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::db::PhotoRecord;

/// Longest edge used when measuring quality; full-resolution decoding is not
/// needed for sharpness or exposure estimates.
const ANALYSIS_EDGE: u32 = 512;

/// Laplacian variance at which sharpness scores 0.5.
const SHARPNESS_MIDPOINT: f32 = 100.0;

const SHADOW_LEVEL: u8 = 5;
const HIGHLIGHT_LEVEL: u8 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureStats {
    /// Mean luminance, 0 (black) to 1 (white).
    pub mean_luminance: f32,
    /// Fraction of pixels crushed to black.
    pub shadow_clipping: f32,
    /// Fraction of pixels blown to white.
    pub highlight_clipping: f32,
}

impl ExposureStats {
    /// 1.0 for a mid-grey, unclipped frame; falls off towards either extreme.
    pub fn score(&self) -> f32 {
        let balance = 1.0 - (self.mean_luminance - 0.5).abs() * 2.0;
        let clipping = (self.shadow_clipping + self.highlight_clipping).min(1.0);
        (balance * (1.0 - clipping)).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceSummary {
    pub face_count: u32,
    pub mean_confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Normalised Laplacian variance in 0..1.
    #[serde(default)]
    pub sharpness: Option<f32>,
    #[serde(default)]
    pub exposure: Option<ExposureStats>,
    #[serde(default)]
    pub faces: Option<FaceSummary>,
}

impl QualityMetrics {
    /// Measure sharpness and exposure from decoded pixels.
    pub fn from_image(img: &DynamicImage) -> Self {
        let luma = if img.width() > ANALYSIS_EDGE || img.height() > ANALYSIS_EDGE {
            img.thumbnail(ANALYSIS_EDGE, ANALYSIS_EDGE).to_luma8()
        } else {
            img.to_luma8()
        };
        let (width, height) = luma.dimensions();
        let pixel_count = (width as usize) * (height as usize);
        if pixel_count == 0 {
            return Self::default();
        }

        let mut sum = 0u64;
        let mut shadows = 0usize;
        let mut highlights = 0usize;
        for pixel in luma.pixels() {
            let v = pixel[0];
            sum += v as u64;
            if v <= SHADOW_LEVEL {
                shadows += 1;
            }
            if v >= HIGHLIGHT_LEVEL {
                highlights += 1;
            }
        }

        let exposure = ExposureStats {
            mean_luminance: sum as f32 / pixel_count as f32 / 255.0,
            shadow_clipping: shadows as f32 / pixel_count as f32,
            highlight_clipping: highlights as f32 / pixel_count as f32,
        };

        let sharpness = if width >= 3 && height >= 3 {
            let mut values = Vec::with_capacity((width as usize - 2) * (height as usize - 2));
            for y in 1..height - 1 {
                for x in 1..width - 1 {
                    let at = |dx: i64, dy: i64| {
                        luma.get_pixel((x as i64 + dx) as u32, (y as i64 + dy) as u32)[0] as f32
                    };
                    values.push(4.0 * at(0, 0) - at(-1, 0) - at(1, 0) - at(0, -1) - at(0, 1));
                }
            }
            let n = values.len() as f32;
            let mean = values.iter().sum::<f32>() / n;
            let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
            Some(variance / (variance + SHARPNESS_MIDPOINT))
        } else {
            None
        };

        Self {
            sharpness,
            exposure: Some(exposure),
            faces: None,
        }
    }

    /// Fold the available metrics into a single 0..1 score, or `None` when
    /// nothing was measured.
    pub fn overall_score(&self) -> Option<f32> {
        let mut weighted = 0.0f32;
        let mut weights = 0.0f32;

        if let Some(sharpness) = self.sharpness {
            weighted += 0.6 * sharpness.clamp(0.0, 1.0);
            weights += 0.6;
        }
        if let Some(exposure) = &self.exposure {
            weighted += 0.4 * exposure.score();
            weights += 0.4;
        }
        if weights == 0.0 {
            return None;
        }

        let mut score = weighted / weights;
        if let Some(faces) = &self.faces {
            if faces.face_count > 0 {
                score = 0.9 * score + 0.1 * faces.mean_confidence.clamp(0.0, 1.0);
            }
        }
        Some(score)
    }
}

/// Score used to rank a photo: the stored `quality_score`, else one derived
/// from its metrics, else 0.
pub fn photo_quality(photo: &PhotoRecord) -> f32 {
    let score = photo
        .quality_score
        .or_else(|| photo.quality_metrics.as_ref().and_then(|m| m.overall_score()))
        .unwrap_or(0.0);
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// Pick the best photo of a group. Ties go to the earliest photo in input
/// order; `None` only for an empty slice.
pub fn pick_best_photo_by_quality(photos: &[PhotoRecord]) -> Option<&PhotoRecord> {
    let mut best: Option<(&PhotoRecord, f32)> = None;
    for photo in photos {
        let score = photo_quality(photo);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((photo, score)),
        }
    }
    best.map(|(photo, _)| photo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn scored(id: &str, score: Option<f32>) -> PhotoRecord {
        let mut photo = PhotoRecord::new(id, id, id, 0);
        photo.quality_score = score;
        photo
    }

    #[test]
    fn test_pick_best() {
        let photos = vec![
            scored("a", Some(0.2)),
            scored("b", Some(0.9)),
            scored("c", Some(0.5)),
        ];
        assert_eq!(pick_best_photo_by_quality(&photos).unwrap().file_id, "b");
    }

    #[test]
    fn test_pick_best_tie_goes_to_first() {
        let photos = vec![scored("a", None), scored("b", Some(0.0)), scored("c", None)];
        assert_eq!(pick_best_photo_by_quality(&photos).unwrap().file_id, "a");
        assert!(pick_best_photo_by_quality(&[]).is_none());
    }

    #[test]
    fn test_metrics_used_when_score_missing() {
        let mut sharp = scored("sharp", None);
        sharp.quality_metrics = Some(QualityMetrics {
            sharpness: Some(0.9),
            ..Default::default()
        });
        let photos = vec![scored("plain", Some(f32::NAN)), sharp];
        assert_eq!(pick_best_photo_by_quality(&photos).unwrap().file_id, "sharp");
    }

    #[test]
    fn test_flat_image_is_not_sharp() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(32, 32, Luma([128])));
        let metrics = QualityMetrics::from_image(&img);
        assert_eq!(metrics.sharpness, Some(0.0));
        let exposure = metrics.exposure.unwrap();
        assert!((exposure.mean_luminance - 128.0 / 255.0).abs() < 1e-4);
        assert_eq!(exposure.shadow_clipping, 0.0);
    }

    #[test]
    fn test_checkerboard_is_sharper_than_flat() {
        let board = GrayImage::from_fn(32, 32, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([40])
            } else {
                Luma([210])
            }
        });
        let metrics = QualityMetrics::from_image(&DynamicImage::ImageLuma8(board));
        assert!(metrics.sharpness.unwrap() > 0.9);
        assert!(metrics.overall_score().unwrap() > 0.5);
    }

    #[test]
    fn test_clipped_exposure_scores_low() {
        let black = ExposureStats {
            mean_luminance: 0.0,
            shadow_clipping: 1.0,
            highlight_clipping: 0.0,
        };
        assert_eq!(black.score(), 0.0);
        assert!(QualityMetrics::default().overall_score().is_none());
    }
}
