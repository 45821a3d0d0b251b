//! Near-duplicate grouping by embedding similarity within temporal sessions.

use serde::Serialize;
use std::time::Duration;

use super::{embedding_similarity, gap_from_secs, SortMethod};
use crate::db::PhotoRecord;
use crate::progress::TaskProgress;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.93;
pub const DEFAULT_SESSION_GAP: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityOptions {
    /// Seed similarity must exceed this to join a group.
    pub threshold: f32,
    /// A gap larger than this between consecutive photos starts a new session.
    pub session_gap: Duration,
    pub sort_method: SortMethod,
}

impl SimilarityOptions {
    pub fn new(threshold: f32, session_gap_hours: f64, sort_method: SortMethod) -> Self {
        Self {
            threshold,
            session_gap: gap_from_secs(session_gap_hours * 3600.0),
            sort_method,
        }
    }
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            session_gap: DEFAULT_SESSION_GAP,
            sort_method: SortMethod::Size,
        }
    }
}

/// Photos from one session that all resemble the group's seed photo.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityGroup {
    /// Start of the session the group was found in (epoch millis).
    pub timestamp: i64,
    /// Threshold the group was formed with.
    pub similarity: f32,
    pub photos: Vec<PhotoRecord>,
}

impl SimilarityGroup {
    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }
}

fn gap_millis(gap: Duration) -> i64 {
    i64::try_from(gap.as_millis()).unwrap_or(i64::MAX)
}

/// Sort photos by capture time and cut the sequence wherever two consecutive
/// photos are more than `gap` apart. The sort is stable, so photos sharing a
/// timestamp keep their input order.
pub fn split_sessions(photos: &[PhotoRecord], gap: Duration) -> Vec<Vec<&PhotoRecord>> {
    let mut sorted: Vec<&PhotoRecord> = photos.iter().collect();
    sorted.sort_by_key(|p| p.photo_taken_ts);

    let gap_ms = gap_millis(gap);
    let mut sessions: Vec<Vec<&PhotoRecord>> = Vec::new();
    let mut current: Vec<&PhotoRecord> = Vec::new();

    for photo in sorted {
        if let Some(prev) = current.last() {
            if photo.photo_taken_ts.saturating_sub(prev.photo_taken_ts) > gap_ms {
                sessions.push(std::mem::take(&mut current));
            }
        }
        current.push(photo);
    }
    if !current.is_empty() {
        sessions.push(current);
    }

    sessions
}

/// Group one session greedily. Each unvisited photo, in time order, seeds a
/// group and pulls in every later unvisited photo whose similarity to the
/// seed exceeds the threshold. Membership is decided against the seed only,
/// so two members of a group may be less similar to each other than the
/// threshold.
fn cluster_session(session: &[&PhotoRecord], threshold: f32) -> Vec<Vec<PhotoRecord>> {
    let mut visited = vec![false; session.len()];
    let mut groups = Vec::new();

    for i in 0..session.len() {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let seed = session[i];
        let mut members = vec![seed.clone()];

        for j in (i + 1)..session.len() {
            if visited[j] {
                continue;
            }
            let other = session[j];
            let similarity =
                embedding_similarity(seed.embedding.as_deref(), other.embedding.as_deref());
            if similarity > threshold {
                visited[j] = true;
                members.push(other.clone());
            }
        }

        if members.len() > 1 {
            groups.push(members);
        }
    }

    groups
}

fn sort_groups(groups: &mut [SimilarityGroup], sort_method: SortMethod) {
    match sort_method {
        SortMethod::Size | SortMethod::Density => {
            groups.sort_by(|a, b| b.photos.len().cmp(&a.photos.len()))
        }
        SortMethod::DateAsc => groups.sort_by_key(|g| g.timestamp),
        SortMethod::DateDesc => groups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
    }
}

/// Find groups of visually similar photos.
///
/// Comparison is bounded to photos within the same temporal session, which
/// keeps the pairwise pass quadratic per session instead of per library.
/// `progress` is called once per session processed.
pub fn find_similar_groups<F>(
    photos: &[PhotoRecord],
    mut progress: F,
    options: &SimilarityOptions,
) -> Vec<SimilarityGroup>
where
    F: FnMut(TaskProgress),
{
    let sessions = split_sessions(photos, options.session_gap);
    let total = sessions.len();
    let mut groups = Vec::new();

    for (index, session) in sessions.iter().enumerate() {
        let timestamp = session.first().map(|p| p.photo_taken_ts).unwrap_or_default();
        for members in cluster_session(session, options.threshold) {
            groups.push(SimilarityGroup {
                timestamp,
                similarity: options.threshold,
                photos: members,
            });
        }
        progress(
            TaskProgress::new(index + 1, total)
                .with_message(format!("{} similar groups", groups.len())),
        );
    }

    sort_groups(&mut groups, options.sort_method);

    tracing::debug!(
        photos = photos.len(),
        sessions = total,
        groups = groups.len(),
        threshold = options.threshold,
        "Similarity analysis finished"
    );

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(id: &str, ts: i64, embedding: Option<Vec<f32>>) -> PhotoRecord {
        let photo = PhotoRecord::new(id, id, format!("/{id}"), ts);
        match embedding {
            Some(e) => photo.with_embedding(e),
            None => photo,
        }
    }

    fn ids(group: &SimilarityGroup) -> Vec<&str> {
        group.photos.iter().map(|p| p.file_id.as_str()).collect()
    }

    #[test]
    fn test_sessions_one_hour_gap() {
        let photos = vec![photo("a", 0, None), photo("b", 100, None), photo("c", 5000, None)];
        let sessions = split_sessions(&photos, Duration::from_secs(3600));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].len(), 3);
    }

    #[test]
    fn test_sessions_short_gaps() {
        let photos = vec![photo("c", 5000, None), photo("a", 0, None), photo("b", 100, None)];

        let sessions = split_sessions(&photos, Duration::from_millis(1000));
        let sizes: Vec<usize> = sessions.iter().map(|s| s.len()).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert_eq!(sessions[0][0].file_id, "a");

        let sessions = split_sessions(&photos, Duration::from_millis(50));
        assert_eq!(sessions.len(), 3);
    }

    #[test]
    fn test_gap_equal_to_boundary_stays_in_session() {
        let photos = vec![photo("a", 0, None), photo("b", 1000, None)];
        assert_eq!(split_sessions(&photos, Duration::from_millis(1000)).len(), 1);
    }

    #[test]
    fn test_identical_embeddings_group() {
        let photos = vec![
            photo("a", 0, Some(vec![1.0, 0.0])),
            photo("b", 10, Some(vec![1.0, 0.0])),
        ];
        let options = SimilarityOptions {
            threshold: 0.90,
            ..Default::default()
        };
        let groups = find_similar_groups(&photos, |_| {}, &options);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0].similarity, 0.90);
        assert_eq!(groups[0].timestamp, 0);
    }

    #[test]
    fn test_orthogonal_embeddings_do_not_group() {
        let photos = vec![
            photo("a", 0, Some(vec![1.0, 0.0])),
            photo("b", 10, Some(vec![0.0, 1.0])),
        ];
        let options = SimilarityOptions {
            threshold: 0.90,
            ..Default::default()
        };
        assert!(find_similar_groups(&photos, |_| {}, &options).is_empty());
    }

    #[test]
    fn test_photos_in_different_sessions_never_group() {
        let hour = 3_600_000;
        let photos = vec![
            photo("a", 0, Some(vec![1.0, 0.0])),
            photo("b", 2 * hour, Some(vec![1.0, 0.0])),
        ];
        assert!(find_similar_groups(&photos, |_| {}, &SimilarityOptions::default()).is_empty());
    }

    #[test]
    fn test_membership_is_decided_by_seed() {
        // b is close to both a and c, but a and c are far apart. Seeded by a,
        // the group takes b; c is left alone and forms no group.
        let angle = |deg: f32| {
            let rad = deg.to_radians();
            vec![rad.cos(), rad.sin()]
        };
        let photos = vec![
            photo("a", 0, Some(angle(0.0))),
            photo("b", 1, Some(angle(15.0))),
            photo("c", 2, Some(angle(30.0))),
        ];
        let options = SimilarityOptions {
            threshold: 0.95,
            ..Default::default()
        };
        let groups = find_similar_groups(&photos, |_| {}, &options);
        assert_eq!(groups.len(), 1);
        assert_eq!(ids(&groups[0]), vec!["a", "b"]);
    }

    #[test]
    fn test_malformed_embeddings_never_match() {
        let photos = vec![
            photo("a", 0, Some(vec![1.0, 0.0])),
            photo("b", 1, None),
            photo("c", 2, Some(vec![1.0, 0.0, 0.0])),
            photo("d", 3, Some(vec![1.0, 0.0])),
        ];
        let groups = find_similar_groups(&photos, |_| {}, &SimilarityOptions::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(ids(&groups[0]), vec!["a", "d"]);
    }

    #[test]
    fn test_sorting_and_progress() {
        let hour = 3_600_000;
        let same = || Some(vec![0.0, 1.0]);
        let photos = vec![
            photo("a1", 0, same()),
            photo("a2", 1, same()),
            photo("b1", 3 * hour, same()),
            photo("b2", 3 * hour + 1, same()),
            photo("b3", 3 * hour + 2, same()),
        ];

        let mut seen = Vec::new();
        let groups = find_similar_groups(
            &photos,
            |p| seen.push(p.fraction()),
            &SimilarityOptions::default(),
        );
        assert_eq!(seen, vec![0.5, 1.0]);
        assert_eq!(groups[0].len(), 3);

        let options = SimilarityOptions {
            sort_method: SortMethod::DateAsc,
            ..Default::default()
        };
        let groups = find_similar_groups(&photos, |_| {}, &options);
        assert_eq!(ids(&groups[0]), vec!["a1", "a2"]);

        let options = SimilarityOptions {
            sort_method: SortMethod::DateDesc,
            ..Default::default()
        };
        let groups = find_similar_groups(&photos, |_| {}, &options);
        assert_eq!(groups[0].timestamp, 3 * hour);
    }

    #[test]
    fn test_options_from_hours() {
        let options = SimilarityOptions::new(0.9, 0.5, SortMethod::Size);
        assert_eq!(options.session_gap, Duration::from_secs(1800));
    }

    #[test]
    fn test_unbounded_gap_is_one_session() {
        for hours in [f64::INFINITY, 1e300] {
            let options = SimilarityOptions::new(0.9, hours, SortMethod::Size);
            assert_eq!(options.session_gap, Duration::MAX);
        }

        let year = 365 * 24 * 3_600_000;
        let photos = vec![photo("a", 0, None), photo("b", year, None), photo("c", 40 * year, None)];
        let sessions = split_sessions(&photos, Duration::MAX);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].len(), 3);
    }
}
