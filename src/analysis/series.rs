//! Burst detection from capture times alone.
//!
//! Photos are first cut into runs wherever two shots are more than `max_gap`
//! apart. Inside a run, a series is a window that is both long enough and
//! dense enough to look like rapid-fire shooting, so a burst followed by a
//! slow trickle still counts. No embeddings are needed, so this pass also
//! covers photos the embedding queue has not reached yet.

use serde::Serialize;
use std::ops::Range;
use std::time::Duration;

use super::SortMethod;
use crate::db::PhotoRecord;
use crate::progress::TaskProgress;

const MILLIS_PER_MINUTE: f64 = 60_000.0;

/// Shortest span used when computing density, so a burst sharing one
/// timestamp does not divide by zero.
const MIN_SPAN_MILLIS: i64 = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesOptions {
    pub min_group_size: usize,
    pub max_gap: Duration,
    /// Photos per minute.
    pub min_density: f64,
    pub sort_method: SortMethod,
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self {
            min_group_size: 20,
            max_gap: Duration::from_secs(5 * 60),
            min_density: 3.0,
            sort_method: SortMethod::Size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesGroup {
    pub photos: Vec<PhotoRecord>,
    pub photo_count: usize,
    /// Photos per minute over the series span.
    pub density: f64,
    /// Mean gap between consecutive photos, in millis.
    pub avg_time_between_photos: f64,
    pub start_time: i64,
    pub end_time: i64,
}

impl SeriesGroup {
    fn from_run(run: &[&PhotoRecord]) -> Option<Self> {
        let start_time = run.first()?.photo_taken_ts;
        let end_time = run.last()?.photo_taken_ts;
        let photo_count = run.len();
        let span = end_time.saturating_sub(start_time);

        let density = density(run);
        let avg_time_between_photos = if photo_count > 1 {
            span as f64 / (photo_count - 1) as f64
        } else {
            0.0
        };

        Some(Self {
            photos: run.iter().map(|p| (*p).clone()).collect(),
            photo_count,
            density,
            avg_time_between_photos,
            start_time,
            end_time,
        })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.end_time.saturating_sub(self.start_time).max(0) as u64)
    }
}

/// Photos per minute over a time-sorted slice.
fn density(photos: &[&PhotoRecord]) -> f64 {
    match (photos.first(), photos.last()) {
        (Some(first), Some(last)) => {
            let span = last.photo_taken_ts.saturating_sub(first.photo_taken_ts);
            photos.len() as f64 / (span.max(MIN_SPAN_MILLIS) as f64 / MILLIS_PER_MINUTE)
        }
        _ => 0.0,
    }
}

/// Windows of a time-sorted run that qualify as series.
///
/// A window starts at the earliest unclaimed photo and grows while its density
/// stays at or above `min_density`. Edge photos spaced wider than that rate
/// allows are then trimmed off, never below `min_size`. Windows never overlap.
fn dense_windows(run: &[&PhotoRecord], min_size: usize, min_density: f64) -> Vec<Range<usize>> {
    let sparse_gap = if min_density > 0.0 {
        MILLIS_PER_MINUTE / min_density
    } else {
        f64::INFINITY
    };
    let is_sparse = |a: &PhotoRecord, b: &PhotoRecord| {
        b.photo_taken_ts.saturating_sub(a.photo_taken_ts) as f64 > sparse_gap
    };

    let mut windows = Vec::new();
    let mut start = 0;
    while start < run.len() {
        let mut end = start + 1;
        while end < run.len() && density(&run[start..=end]) >= min_density {
            end += 1;
        }

        let mut first = start;
        while end - first > min_size && is_sparse(run[end - 2], run[end - 1]) {
            end -= 1;
        }
        while end - first > min_size && is_sparse(run[first], run[first + 1]) {
            first += 1;
        }

        if end - first >= min_size && density(&run[first..end]) >= min_density {
            windows.push(first..end);
            start = end;
        } else {
            start += 1;
        }
    }
    windows
}

fn sort_series(series: &mut [SeriesGroup], sort_method: SortMethod) {
    match sort_method {
        SortMethod::Size => series.sort_by(|a, b| b.photo_count.cmp(&a.photo_count)),
        SortMethod::DateAsc => series.sort_by_key(|s| s.start_time),
        SortMethod::DateDesc => series.sort_by(|a, b| b.start_time.cmp(&a.start_time)),
        SortMethod::Density => series.sort_by(|a, b| b.density.total_cmp(&a.density)),
    }
}

/// Find burst series across all photos. `progress` is called once per run of
/// photos examined.
pub fn find_photo_series<F>(
    photos: &[PhotoRecord],
    options: &SeriesOptions,
    mut progress: F,
) -> Vec<SeriesGroup>
where
    F: FnMut(TaskProgress),
{
    let mut sorted: Vec<&PhotoRecord> = photos.iter().collect();
    sorted.sort_by_key(|p| p.photo_taken_ts);

    let max_gap = i64::try_from(options.max_gap.as_millis()).unwrap_or(i64::MAX);
    let total = sorted.len();
    let mut series = Vec::new();
    let mut run: Vec<&PhotoRecord> = Vec::new();
    let mut examined = 0;

    let min_size = options.min_group_size.max(2);

    let mut close_run = |run: Vec<&PhotoRecord>, series: &mut Vec<SeriesGroup>| {
        examined += run.len();
        if run.len() >= min_size {
            for window in dense_windows(&run, min_size, options.min_density) {
                series.extend(SeriesGroup::from_run(&run[window]));
            }
        }
        progress(
            TaskProgress::new(examined, total).with_message(format!("{} series", series.len())),
        );
    };

    for photo in sorted {
        if let Some(prev) = run.last() {
            if photo.photo_taken_ts.saturating_sub(prev.photo_taken_ts) > max_gap {
                close_run(std::mem::take(&mut run), &mut series);
            }
        }
        run.push(photo);
    }
    if !run.is_empty() {
        close_run(run, &mut series);
    }

    sort_series(&mut series, options.sort_method);

    tracing::debug!(photos = total, series = series.len(), "Series detection finished");

    series
}
