//! The ordered collection of root annotations for one section.

use crate::annotation::{AnnotationRecord, SectionId};
use crate::error::Result;
use crate::grid::{CellRect, GridGeometry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotations grouped by anchor row, in store order within each row.
pub type RowIndex<'a> = BTreeMap<u32, Vec<&'a AnnotationRecord>>;

/// Root annotations of a section, in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationStore {
    section_id: SectionId,
    annotations: Vec<AnnotationRecord>,
}

impl AnnotationStore {
    /// Create an empty store for `section_id`.
    pub fn new(section_id: SectionId) -> Self {
        Self {
            section_id,
            annotations: Vec::new(),
        }
    }

    pub fn section_id(&self) -> SectionId {
        self.section_id
    }

    /// Root annotations in order.
    pub fn roots(&self) -> &[AnnotationRecord] {
        &self.annotations
    }

    /// Number of root annotations.
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Number of records including every reply.
    pub fn total_len(&self) -> usize {
        self.annotations.iter().map(|r| r.subtree_len()).sum()
    }

    pub fn clear(&mut self) {
        self.annotations.clear();
    }

    /// Depth-first search across every root and its replies.
    pub fn find_by_id(&self, id: &str) -> Option<&AnnotationRecord> {
        self.annotations.iter().find_map(|r| r.find(id))
    }

    pub(crate) fn find_mut(&mut self, id: &str) -> Option<&mut AnnotationRecord> {
        self.annotations.iter_mut().find_map(|r| r.find_mut(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find_by_id(id).is_some()
    }

    /// The root whose subtree contains `id`.
    pub fn root_of(&self, id: &str) -> Option<&AnnotationRecord> {
        self.annotations.iter().find(|r| r.find(id).is_some())
    }

    /// Append a root. Returns false and leaves the store untouched when the id
    /// is already present.
    pub fn add(&mut self, mut record: AnnotationRecord) -> bool {
        if self.contains(record.id()) {
            log::debug!("Annotation {} already present, not added", record.id());
            return false;
        }
        record.make_root();
        self.annotations.push(record);
        true
    }

    /// Append `reply` to the replies of `parent_id`.
    pub fn attach_reply(&mut self, parent_id: &str, reply: AnnotationRecord) -> bool {
        if self.contains(reply.id()) {
            return false;
        }
        match self.find_mut(parent_id) {
            Some(parent) => {
                parent.attach_reply(reply);
                true
            }
            None => false,
        }
    }

    /// Remove a root or a reply. Returns the removed subtree.
    pub fn remove(&mut self, id: &str) -> Option<AnnotationRecord> {
        if let Some(pos) = self.annotations.iter().position(|r| r.id() == id) {
            return Some(self.annotations.remove(pos));
        }
        self.annotations
            .iter_mut()
            .find_map(|r| r.remove_descendant(id))
    }

    /// Replace the record with the same id, keeping its position.
    pub fn replace(&mut self, mut record: AnnotationRecord) -> bool {
        if let Some(pos) = self.annotations.iter().position(|r| r.id() == record.id()) {
            record.make_root();
            self.annotations[pos] = record;
            return true;
        }
        for root in &mut self.annotations {
            match root.replace_descendant(record) {
                Ok(()) => return true,
                Err(back) => record = back,
            }
        }
        false
    }

    /// Position of a root in display order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.annotations.iter().position(|r| r.id() == id)
    }

    /// Anchored (non document-level) roots whose anchor lies inside `rect`.
    pub fn anchored_in(&self, rect: CellRect) -> impl Iterator<Item = &AnnotationRecord> {
        self.annotations
            .iter()
            .filter(move |r| !r.is_document_level() && rect.contains(r.col(), r.row()))
    }

    /// Document-level roots.
    pub fn document_level(&self) -> impl Iterator<Item = &AnnotationRecord> {
        self.annotations.iter().filter(|r| r.is_document_level())
    }

    /// Visible roots shown for the cell `(col, row)`.
    ///
    /// When the cell is part of a merged rectangle, every root anchored inside
    /// that rectangle is shown for it.
    pub fn query_at(
        &self,
        col: u32,
        row: u32,
        geometry: &dyn GridGeometry,
        show_solved: bool,
    ) -> Vec<&AnnotationRecord> {
        let area = geometry
            .merged_range_at(col, row)
            .unwrap_or_else(|| CellRect::cell(col, row));
        self.annotations
            .iter()
            .filter(|r| {
                r.level() == 0
                    && !r.is_hidden
                    && !r.is_document_level()
                    && (show_solved || !r.is_solved)
                    && area.contains(r.col(), r.row())
            })
            .collect()
    }

    /// Roots anchored in `rect`, grouped by row. `None` when nothing qualifies.
    pub fn query_range(&self, rect: CellRect) -> Option<RowIndex<'_>> {
        let mut rows: RowIndex<'_> = BTreeMap::new();
        for record in self.anchored_in(rect) {
            rows.entry(record.row()).or_default().push(record);
        }
        if rows.is_empty() { None } else { Some(rows) }
    }

    /// True when at least two distinct visible annotations anchor inside `rect`.
    pub fn count_overlapping(&self, rect: CellRect) -> bool {
        self.anchored_in(rect).filter(|r| !r.is_hidden).take(2).count() >= 2
    }

    /// Serialize the store to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize a store and rebuild the reply links.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut store: Self = serde_json::from_str(json)?;
        store.relink();
        Ok(store)
    }

    /// Rebuild parent handles and levels after deserialization.
    pub(crate) fn relink(&mut self) {
        for root in &mut self.annotations {
            root.make_root();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationDraft, MAX_BODY_LEN};
    use crate::error::AnnotationError;
    use crate::grid::MergedCells;

    const SHEET: SectionId = SectionId(0);

    fn record(col: u32, row: u32) -> AnnotationRecord {
        AnnotationRecord::from_draft(SHEET, &AnnotationDraft::at(col, row, "note"), MAX_BODY_LEN)
    }

    fn reply() -> AnnotationRecord {
        AnnotationRecord::from_draft(SHEET, &AnnotationDraft::default(), MAX_BODY_LEN)
    }

    #[test]
    fn test_store_creation() {
        let store = AnnotationStore::new(SHEET);
        assert!(store.is_empty());
        assert_eq!(store.section_id(), SHEET);
    }

    #[test]
    fn test_add_and_find() {
        let mut store = AnnotationStore::new(SHEET);
        let a = record(1, 1);
        let id = a.id().to_string();

        assert!(store.add(a.clone()));
        assert!(!store.add(a));
        assert_eq!(store.len(), 1);
        assert_eq!(store.find_by_id(&id).unwrap().anchor(), (1, 1));
        assert!(store.find_by_id("missing").is_none());
    }

    #[test]
    fn test_find_reply_depth_first() {
        let mut store = AnnotationStore::new(SHEET);
        let a = record(1, 1);
        let a_id = a.id().to_string();
        store.add(a);
        let r = reply();
        let r_id = r.id().to_string();
        assert!(store.attach_reply(&a_id, r));

        let found = store.find_by_id(&r_id).unwrap();
        assert_eq!(found.level(), 1);
        assert_eq!(store.root_of(&r_id).unwrap().id(), a_id);
        assert_eq!(store.total_len(), 2);
        assert!(!store.attach_reply("missing", reply()));
    }

    #[test]
    fn test_remove_root_and_reply() {
        let mut store = AnnotationStore::new(SHEET);
        let a = record(1, 1);
        let b = record(2, 2);
        let a_id = a.id().to_string();
        let b_id = b.id().to_string();
        store.add(a);
        store.add(b);
        let r = reply();
        let r_id = r.id().to_string();
        store.attach_reply(&a_id, r);

        assert_eq!(store.remove(&r_id).unwrap().id(), r_id);
        assert!(store.find_by_id(&r_id).is_none());
        assert!(store.find_by_id(&a_id).is_some());

        assert!(store.remove(&a_id).is_some());
        assert!(store.find_by_id(&a_id).is_none());
        assert!(store.find_by_id(&b_id).is_some());
        assert!(store.remove("missing").is_none());
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut store = AnnotationStore::new(SHEET);
        let a = record(1, 1);
        let b = record(2, 2);
        let a_id = a.id().to_string();
        store.add(a.clone());
        store.add(b);

        let mut edited = a;
        edited.set_body("edited", MAX_BODY_LEN);
        assert!(store.replace(edited));
        assert_eq!(store.position(&a_id), Some(0));
        assert_eq!(store.roots()[0].body(), "edited");
    }

    #[test]
    fn test_query_at_filters() {
        let mut store = AnnotationStore::new(SHEET);
        let grid = MergedCells::new();
        let visible = record(1, 1);
        let mut hidden = record(1, 1);
        hidden.is_hidden = true;
        let mut solved = record(1, 1);
        solved.is_solved = true;
        let doc = AnnotationRecord::from_draft(SHEET, &AnnotationDraft::document("doc"), MAX_BODY_LEN);
        let visible_id = visible.id().to_string();
        store.add(visible);
        store.add(hidden);
        store.add(solved);
        store.add(doc);

        assert_eq!(store.query_at(1, 1, &grid, true).len(), 2);
        let unsolved = store.query_at(1, 1, &grid, false);
        assert_eq!(unsolved.len(), 1);
        assert_eq!(unsolved[0].id(), visible_id);
        assert!(store.query_at(0, 0, &grid, true).is_empty());
    }

    #[test]
    fn test_query_at_resolves_merged_cells() {
        let mut store = AnnotationStore::new(SHEET);
        let mut grid = MergedCells::new();
        grid.merge(CellRect::new(1, 1, 3, 2));
        store.add(record(3, 1));
        store.add(record(5, 5));

        assert_eq!(store.query_at(1, 2, &grid, true).len(), 1);
        assert!(store.query_at(4, 1, &grid, true).is_empty());
    }

    #[test]
    fn test_query_range_groups_rows() {
        let mut store = AnnotationStore::new(SHEET);
        store.add(record(1, 3));
        store.add(record(2, 3));
        store.add(record(1, 5));
        store.add(record(9, 9));

        let rows = store.query_range(CellRect::new(0, 0, 4, 6)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[&3].len(), 2);
        assert_eq!(rows[&5].len(), 1);
        assert!(store.query_range(CellRect::new(20, 20, 30, 30)).is_none());
    }

    #[test]
    fn test_count_overlapping() {
        let mut store = AnnotationStore::new(SHEET);
        let rect = CellRect::new(1, 1, 2, 1);
        store.add(record(1, 1));
        assert!(!store.count_overlapping(rect));

        let mut hidden = record(2, 1);
        hidden.is_hidden = true;
        store.add(hidden);
        assert!(!store.count_overlapping(rect));

        store.add(record(2, 1));
        assert!(store.count_overlapping(rect));
    }

    #[test]
    fn test_json_roundtrip_relinks_replies() {
        let mut store = AnnotationStore::new(SHEET);
        let a = record(1, 1);
        let a_id = a.id().to_string();
        store.add(a);
        let r = reply();
        let r_id = r.id().to_string();
        store.attach_reply(&a_id, r);

        let json = store.to_json().unwrap();
        let loaded = AnnotationStore::from_json(&json).unwrap();
        let reply = loaded.find_by_id(&r_id).unwrap();
        assert_eq!(reply.parent_id(), Some(a_id.as_str()));
        assert_eq!(loaded, store);
    }

    #[test]
    fn test_from_json_rejects_malformed_input() {
        let result = AnnotationStore::from_json(r#"{"sectionId": 0, "annotations": ["#);
        assert!(matches!(result, Err(AnnotationError::Serialization(_))));
    }
}
