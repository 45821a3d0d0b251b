//! Review state for similarity and series groups.
//!
//! Each group keeps its best photo, picked by quality, and a set of photos
//! selected for removal. By default everything except the best is selected.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::analysis::{pick_best_photo_by_quality, SeriesGroup, SimilarityGroup};
use crate::db::{PhotoRecord, PhotoStore};
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Similar,
    Series,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewGroup {
    pub kind: GroupKind,
    /// Session start for similar groups, first shot for series (epoch millis).
    pub timestamp: i64,
    pub photos: Vec<PhotoRecord>,
    /// `file_id` of the photo to keep.
    pub best: Option<String>,
    pub selected: BTreeSet<String>,
}

impl ReviewGroup {
    fn new(kind: GroupKind, timestamp: i64, photos: Vec<PhotoRecord>) -> Self {
        let mut group = Self {
            kind,
            timestamp,
            photos,
            best: None,
            selected: BTreeSet::new(),
        };
        group.refresh_best();
        group.select_all_but_best();
        group
    }

    pub fn from_similarity(group: SimilarityGroup) -> Self {
        Self::new(GroupKind::Similar, group.timestamp, group.photos)
    }

    pub fn from_series(series: SeriesGroup) -> Self {
        Self::new(GroupKind::Series, series.start_time, series.photos)
    }

    fn refresh_best(&mut self) {
        self.best = pick_best_photo_by_quality(&self.photos).map(|p| p.file_id.clone());
    }

    pub fn best_photo(&self) -> Option<&PhotoRecord> {
        let best = self.best.as_deref()?;
        self.photos.iter().find(|p| p.file_id == best)
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    pub fn is_selected(&self, file_id: &str) -> bool {
        self.selected.contains(file_id)
    }

    /// Flip selection of a photo in this group. Returns the new state, or
    /// `None` if the photo is not a member.
    pub fn toggle(&mut self, file_id: &str) -> Option<bool> {
        if !self.photos.iter().any(|p| p.file_id == file_id) {
            return None;
        }
        if self.selected.remove(file_id) {
            Some(false)
        } else {
            self.selected.insert(file_id.to_string());
            Some(true)
        }
    }

    pub fn select_all_but_best(&mut self) {
        self.selected = self
            .photos
            .iter()
            .filter(|p| Some(&p.file_id) != self.best.as_ref())
            .map(|p| p.file_id.clone())
            .collect();
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// Selected photos in group order.
    pub fn selected_photos(&self) -> Vec<&PhotoRecord> {
        self.photos
            .iter()
            .filter(|p| self.selected.contains(&p.file_id))
            .collect()
    }

    /// Drop the selected photos from the group and hand them back.
    fn take_selected(&mut self) -> Vec<PhotoRecord> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.photos)
            .into_iter()
            .partition(|p| self.selected.contains(&p.file_id));
        self.photos = kept;
        self.selected.clear();
        self.refresh_best();
        taken
    }
}

/// All groups under review plus a cursor for browsing them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewSession {
    pub groups: Vec<ReviewGroup>,
    #[serde(skip)]
    current_group: usize,
}

impl ReviewSession {
    pub fn new(groups: Vec<ReviewGroup>) -> Self {
        Self {
            groups,
            current_group: 0,
        }
    }

    pub fn from_similarity(groups: Vec<SimilarityGroup>) -> Self {
        Self::new(groups.into_iter().map(ReviewGroup::from_similarity).collect())
    }

    pub fn from_series(series: Vec<SeriesGroup>) -> Self {
        Self::new(series.into_iter().map(ReviewGroup::from_series).collect())
    }

    pub fn current_group(&self) -> Option<&ReviewGroup> {
        self.groups.get(self.current_group)
    }

    pub fn current_group_mut(&mut self) -> Option<&mut ReviewGroup> {
        self.groups.get_mut(self.current_group)
    }

    pub fn current_index(&self) -> usize {
        self.current_group
    }

    pub fn next_group(&mut self) {
        if self.current_group < self.groups.len().saturating_sub(1) {
            self.current_group += 1;
        }
    }

    pub fn prev_group(&mut self) {
        self.current_group = self.current_group.saturating_sub(1);
    }

    pub fn selected_count(&self) -> usize {
        self.groups.iter().map(|g| g.selected.len()).sum()
    }

    /// Remove every selected photo from the store and from the session.
    /// Groups left with fewer than two photos are dropped. Returns the
    /// removed records.
    pub fn delete_selected(&mut self, store: &dyn PhotoStore) -> Result<Vec<PhotoRecord>, StoreError> {
        let ids: Vec<String> = self
            .groups
            .iter()
            .flat_map(|g| g.selected.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let deleted = store.delete_photos(&ids)?;
        tracing::info!(selected = ids.len(), deleted, "Deleted selected photos");

        let mut removed = Vec::new();
        for group in &mut self.groups {
            for photo in group.take_selected() {
                if !removed.iter().any(|r: &PhotoRecord| r.file_id == photo.file_id) {
                    removed.push(photo);
                }
            }
        }
        // A photo can sit in a similar group and a series at once.
        for group in &mut self.groups {
            group.photos.retain(|p| !ids.contains(&p.file_id));
            group.selected.retain(|id| !ids.contains(id));
            group.refresh_best();
        }
        self.groups.retain(|g| g.len() >= 2);
        self.current_group = self.current_group.min(self.groups.len().saturating_sub(1));

        Ok(removed)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn photo(id: &str, ts: i64, score: f32) -> PhotoRecord {
        let mut p = PhotoRecord::new(id, format!("{id}.jpg"), format!("/{id}.jpg"), ts);
        p.quality_score = Some(score);
        p
    }

    fn similar(photos: Vec<PhotoRecord>) -> SimilarityGroup {
        SimilarityGroup {
            timestamp: photos.first().map(|p| p.photo_taken_ts).unwrap_or_default(),
            similarity: 0.93,
            photos,
        }
    }

    fn stored(photos: &[PhotoRecord]) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        for p in photos {
            db.upsert_photo(p).unwrap();
        }
        db
    }

    #[test]
    fn test_default_selection_excludes_best() {
        let group = ReviewGroup::from_similarity(similar(vec![
            photo("a", 0, 0.2),
            photo("b", 1, 0.9),
            photo("c", 2, 0.5),
        ]));

        assert_eq!(group.best.as_deref(), Some("b"));
        assert_eq!(group.best_photo().unwrap().file_id, "b");
        let selected: Vec<_> = group.selected_photos().iter().map(|p| p.file_id.as_str()).collect();
        assert_eq!(selected, vec!["a", "c"]);
    }

    #[test]
    fn test_toggle_and_clear() {
        let mut group = ReviewGroup::from_similarity(similar(vec![photo("a", 0, 0.2), photo("b", 1, 0.9)]));

        assert_eq!(group.toggle("b"), Some(true));
        assert_eq!(group.toggle("a"), Some(false));
        assert_eq!(group.toggle("zzz"), None);
        assert!(group.is_selected("b"));
        assert!(!group.is_selected("a"));

        group.clear_selection();
        assert!(group.selected_photos().is_empty());

        group.select_all_but_best();
        assert_eq!(group.selected.len(), 1);
        assert!(group.is_selected("a"));
    }

    #[test]
    fn test_delete_selected() {
        let photos = vec![
            photo("a", 0, 0.2),
            photo("b", 1, 0.9),
            photo("c", 100, 0.4),
            photo("d", 101, 0.3),
            photo("e", 102, 0.8),
        ];
        let db = stored(&photos);
        let mut session = ReviewSession::from_similarity(vec![
            similar(photos[..2].to_vec()),
            similar(photos[2..].to_vec()),
        ]);

        let removed = session.delete_selected(&db).unwrap();
        let mut removed_ids: Vec<_> = removed.iter().map(|p| p.file_id.as_str()).collect();
        removed_ids.sort();
        assert_eq!(removed_ids, vec!["a", "c", "d"]);

        // Both groups now hold only their best photo and are dropped.
        assert!(session.groups.is_empty());
        assert!(session.current_group().is_none());

        let left: Vec<_> = db.get_all_photos().unwrap().into_iter().map(|p| p.file_id).collect();
        assert_eq!(left.len(), 2);
        assert!(left.contains(&"b".to_string()));
        assert!(left.contains(&"e".to_string()));
    }

    #[test]
    fn test_delete_keeps_groups_with_two_left() {
        let photos = vec![photo("a", 0, 0.2), photo("b", 1, 0.9), photo("c", 2, 0.5)];
        let db = stored(&photos);
        let mut session = ReviewSession::from_similarity(vec![similar(photos.clone())]);

        let group = session.current_group_mut().unwrap();
        group.clear_selection();
        group.toggle("a");

        let removed = session.delete_selected(&db).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(session.groups.len(), 1);
        assert_eq!(session.groups[0].len(), 2);
        assert_eq!(session.groups[0].best.as_deref(), Some("b"));
        assert_eq!(session.selected_count(), 0);
    }

    #[test]
    fn test_nothing_selected_is_a_no_op() {
        let photos = vec![photo("a", 0, 0.2), photo("b", 1, 0.9)];
        let db = stored(&photos);
        let mut session = ReviewSession::from_similarity(vec![similar(photos)]);
        session.groups[0].clear_selection();

        assert!(session.delete_selected(&db).unwrap().is_empty());
        assert_eq!(session.groups.len(), 1);
        assert_eq!(db.get_all_photos().unwrap().len(), 2);
    }

    #[test]
    fn test_navigation_and_json() {
        let mut session = ReviewSession::from_similarity(vec![
            similar(vec![photo("a", 0, 0.2), photo("b", 1, 0.9)]),
            similar(vec![photo("c", 10, 0.2), photo("d", 11, 0.9)]),
        ]);

        session.prev_group();
        assert_eq!(session.current_index(), 0);
        session.next_group();
        session.next_group();
        assert_eq!(session.current_index(), 1);

        let json: serde_json::Value = serde_json::from_str(&session.to_json().unwrap()).unwrap();
        assert_eq!(json["groups"][1]["kind"], "similar");
        assert_eq!(json["groups"][1]["best"], "d");
        assert_eq!(json["groups"][1]["selected"][0], "c");
    }
}
