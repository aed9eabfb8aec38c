//! Anchor remapping for structural edits.
//!
//! [`remap`] never touches the store: it returns one [`RemapIntent`] per
//! affected root and leaves applying them to the caller.

use crate::annotation::{AnnotationId, AnnotationRecord};
use crate::error::{AnnotationError, Result};
use crate::grid::CellRect;
use crate::store::AnnotationStore;
use serde::{Deserialize, Serialize};

/// Kind of structural edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditKind {
    /// Insert cells in the rectangle, shifting the cells below down.
    InsertRowsShiftDown,
    /// Insert cells in the rectangle, shifting the cells to the right.
    InsertColsShiftRight,
    /// Insert whole columns.
    InsertColumns,
    /// Insert whole rows.
    InsertRows,
    /// Delete cells in the rectangle, shifting the cells below up.
    DeleteRowsShiftUp,
    /// Delete cells in the rectangle, shifting the cells to the right left.
    DeleteColsShiftLeft,
    /// Delete whole columns.
    DeleteColumns,
    /// Delete whole rows.
    DeleteRows,
}

impl EditKind {
    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            EditKind::DeleteRowsShiftUp
                | EditKind::DeleteColsShiftLeft
                | EditKind::DeleteColumns
                | EditKind::DeleteRows
        )
    }
}

/// A structural edit and the rectangle it affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralEdit {
    pub kind: EditKind,
    pub rect: CellRect,
}

impl StructuralEdit {
    /// Build a validated descriptor.
    pub fn new(kind: EditKind, rect: CellRect) -> Result<Self> {
        let edit = Self { kind, rect };
        edit.validate()?;
        Ok(edit)
    }

    /// Insert `count` whole rows starting at `row`.
    pub fn insert_rows(row: u32, count: u32) -> Result<Self> {
        Self::new(EditKind::InsertRows, CellRect::rows(row, span_end(row, count)?))
    }

    /// Delete `count` whole rows starting at `row`.
    pub fn delete_rows(row: u32, count: u32) -> Result<Self> {
        Self::new(EditKind::DeleteRows, CellRect::rows(row, span_end(row, count)?))
    }

    /// Insert `count` whole columns starting at `col`.
    pub fn insert_columns(col: u32, count: u32) -> Result<Self> {
        Self::new(EditKind::InsertColumns, CellRect::cols(col, span_end(col, count)?))
    }

    /// Delete `count` whole columns starting at `col`.
    pub fn delete_columns(col: u32, count: u32) -> Result<Self> {
        Self::new(EditKind::DeleteColumns, CellRect::cols(col, span_end(col, count)?))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.rect.is_valid() {
            return Err(AnnotationError::InvalidStructuralEdit(format!(
                "crossed rectangle {:?}",
                self.rect
            )));
        }
        Ok(())
    }
}

fn span_end(start: u32, count: u32) -> Result<u32> {
    if count == 0 {
        return Err(AnnotationError::InvalidStructuralEdit("empty span".to_string()));
    }
    start
        .checked_add(count - 1)
        .ok_or_else(|| AnnotationError::InvalidStructuralEdit("span overflows the grid".to_string()))
}

/// What should happen to one annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemapAction {
    /// Move the anchor to `(col, row)`.
    Move { col: u32, row: u32 },
    /// Remove the annotation.
    Remove,
}

/// Remapping result for one root annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapIntent {
    pub id: AnnotationId,
    pub action: RemapAction,
}

/// Compute the effect of `edit` on every anchored root in `store`.
///
/// Unaffected annotations produce no intent. Document-level annotations are
/// never affected.
pub fn remap(store: &AnnotationStore, edit: &StructuralEdit) -> Result<Vec<RemapIntent>> {
    edit.validate()?;
    Ok(store
        .roots()
        .iter()
        .filter(|r| !r.is_document_level())
        .filter_map(|r| {
            remap_one(r, edit).map(|action| RemapIntent {
                id: r.id().to_string(),
                action,
            })
        })
        .collect())
}

/// Effect of `edit` on a single record.
pub fn remap_one(record: &AnnotationRecord, edit: &StructuralEdit) -> Option<RemapAction> {
    let (col, row) = record.anchor();
    let rect = &edit.rect;
    let shifted = |col: u32, row: u32| Some(RemapAction::Move { col, row });
    let pushed = |col: Option<u32>, row: Option<u32>| match (col, row) {
        (Some(col), Some(row)) => Some(RemapAction::Move { col, row }),
        _ => {
            log::warn!("Annotation {} pushed past the grid edge, removed", record.id());
            Some(RemapAction::Remove)
        }
    };

    match edit.kind {
        EditKind::InsertRowsShiftDown => {
            if !(row >= rect.r1 && rect.contains_col(col)) {
                return None;
            }
            pushed(Some(col), row.checked_add(rect.height()))
        }
        EditKind::InsertColsShiftRight => {
            if !(col >= rect.c1 && rect.contains_row(row)) {
                return None;
            }
            pushed(col.checked_add(rect.width()), Some(row))
        }
        EditKind::InsertRows => {
            if row < rect.r1 {
                return None;
            }
            pushed(Some(col), row.checked_add(rect.height()))
        }
        EditKind::InsertColumns => {
            if col < rect.c1 {
                return None;
            }
            pushed(col.checked_add(rect.width()), Some(row))
        }
        EditKind::DeleteRowsShiftUp => {
            if rect.contains(col, row) {
                Some(RemapAction::Remove)
            } else if row > rect.r1 && rect.contains_col(col) {
                shifted(col, row - rect.height())
            } else {
                None
            }
        }
        EditKind::DeleteColsShiftLeft => {
            if rect.contains(col, row) {
                Some(RemapAction::Remove)
            } else if col > rect.c1 && rect.contains_row(row) {
                shifted(col - rect.width(), row)
            } else {
                None
            }
        }
        EditKind::DeleteRows => {
            if rect.contains_row(row) {
                Some(RemapAction::Remove)
            } else if row > rect.r2 {
                shifted(col, row - rect.height())
            } else {
                None
            }
        }
        EditKind::DeleteColumns => {
            if rect.contains_col(col) {
                Some(RemapAction::Remove)
            } else if col > rect.c2 {
                shifted(col - rect.width(), row)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationDraft, MAX_BODY_LEN, SectionId};

    fn store_with(anchors: &[(u32, u32)]) -> (AnnotationStore, Vec<String>) {
        let mut store = AnnotationStore::new(SectionId(0));
        let mut ids = Vec::new();
        for &(col, row) in anchors {
            let record = AnnotationRecord::from_draft(
                SectionId(0),
                &AnnotationDraft::at(col, row, ""),
                MAX_BODY_LEN,
            );
            ids.push(record.id().to_string());
            store.add(record);
        }
        (store, ids)
    }

    fn action_for<'a>(intents: &'a [RemapIntent], id: &str) -> Option<&'a RemapAction> {
        intents.iter().find(|i| i.id == id).map(|i| &i.action)
    }

    #[test]
    fn test_insert_rows_shifts_at_and_below() {
        let (store, ids) = store_with(&[(2, 2), (2, 5), (7, 10)]);
        let edit = StructuralEdit::insert_rows(5, 3).unwrap();
        let intents = remap(&store, &edit).unwrap();

        assert_eq!(intents.len(), 2);
        assert!(action_for(&intents, &ids[0]).is_none());
        assert_eq!(action_for(&intents, &ids[1]), Some(&RemapAction::Move { col: 2, row: 8 }));
        assert_eq!(action_for(&intents, &ids[2]), Some(&RemapAction::Move { col: 7, row: 13 }));
    }

    #[test]
    fn test_insert_past_grid_edge_removes() {
        let (store, ids) = store_with(&[(0, u32::MAX - 1), (u32::MAX, 0), (0, 100)]);
        let rows = remap(&store, &StructuralEdit::insert_rows(50, 2).unwrap()).unwrap();
        assert_eq!(action_for(&rows, &ids[0]), Some(&RemapAction::Remove));
        assert_eq!(action_for(&rows, &ids[2]), Some(&RemapAction::Move { col: 0, row: 102 }));

        let cols = remap(&store, &StructuralEdit::insert_columns(10, 1).unwrap()).unwrap();
        assert_eq!(action_for(&cols, &ids[1]), Some(&RemapAction::Remove));
        assert!(action_for(&cols, &ids[2]).is_none());
    }

    #[test]
    fn test_delete_rows_removes_covered_and_shifts_below() {
        let (store, ids) = store_with(&[(0, 4), (0, 5), (3, 7), (1, 8), (1, 20)]);
        let edit = StructuralEdit::delete_rows(5, 3).unwrap();
        let intents = remap(&store, &edit).unwrap();

        assert!(action_for(&intents, &ids[0]).is_none());
        assert_eq!(action_for(&intents, &ids[1]), Some(&RemapAction::Remove));
        assert_eq!(action_for(&intents, &ids[2]), Some(&RemapAction::Remove));
        assert_eq!(action_for(&intents, &ids[3]), Some(&RemapAction::Move { col: 1, row: 5 }));
        assert_eq!(action_for(&intents, &ids[4]), Some(&RemapAction::Move { col: 1, row: 17 }));
    }

    #[test]
    fn test_column_edits_mirror_rows() {
        let (store, ids) = store_with(&[(1, 0), (2, 0), (4, 9)]);
        let insert = StructuralEdit::insert_columns(2, 2).unwrap();
        let intents = remap(&store, &insert).unwrap();
        assert!(action_for(&intents, &ids[0]).is_none());
        assert_eq!(action_for(&intents, &ids[1]), Some(&RemapAction::Move { col: 4, row: 0 }));
        assert_eq!(action_for(&intents, &ids[2]), Some(&RemapAction::Move { col: 6, row: 9 }));

        let delete = StructuralEdit::delete_columns(2, 2).unwrap();
        let intents = remap(&store, &delete).unwrap();
        assert!(action_for(&intents, &ids[0]).is_none());
        assert_eq!(action_for(&intents, &ids[1]), Some(&RemapAction::Remove));
        assert_eq!(action_for(&intents, &ids[2]), Some(&RemapAction::Move { col: 2, row: 9 }));
    }

    #[test]
    fn test_shift_down_limited_to_rect_columns() {
        let (store, ids) = store_with(&[(1, 5), (4, 5), (2, 1)]);
        let edit = StructuralEdit::new(EditKind::InsertRowsShiftDown, CellRect::new(0, 3, 2, 4)).unwrap();
        let intents = remap(&store, &edit).unwrap();

        assert_eq!(action_for(&intents, &ids[0]), Some(&RemapAction::Move { col: 1, row: 7 }));
        assert!(action_for(&intents, &ids[1]).is_none());
        assert!(action_for(&intents, &ids[2]).is_none());
    }

    #[test]
    fn test_shift_right_limited_to_rect_rows() {
        let (store, ids) = store_with(&[(3, 1), (3, 6)]);
        let edit = StructuralEdit::new(EditKind::InsertColsShiftRight, CellRect::new(2, 0, 2, 2)).unwrap();
        let intents = remap(&store, &edit).unwrap();

        assert_eq!(action_for(&intents, &ids[0]), Some(&RemapAction::Move { col: 4, row: 1 }));
        assert!(action_for(&intents, &ids[1]).is_none());
    }

    #[test]
    fn test_delete_shift_up_boundary_is_removed() {
        let (store, ids) = store_with(&[(1, 3), (1, 4), (1, 6), (5, 6)]);
        let edit = StructuralEdit::new(EditKind::DeleteRowsShiftUp, CellRect::new(0, 3, 2, 4)).unwrap();
        let intents = remap(&store, &edit).unwrap();

        assert_eq!(action_for(&intents, &ids[0]), Some(&RemapAction::Remove));
        assert_eq!(action_for(&intents, &ids[1]), Some(&RemapAction::Remove));
        assert_eq!(action_for(&intents, &ids[2]), Some(&RemapAction::Move { col: 1, row: 4 }));
        assert!(action_for(&intents, &ids[3]).is_none());
    }

    #[test]
    fn test_delete_shift_left() {
        let (store, ids) = store_with(&[(2, 0), (5, 0), (5, 3)]);
        let edit = StructuralEdit::new(EditKind::DeleteColsShiftLeft, CellRect::new(2, 0, 3, 1)).unwrap();
        let intents = remap(&store, &edit).unwrap();

        assert_eq!(action_for(&intents, &ids[0]), Some(&RemapAction::Remove));
        assert_eq!(action_for(&intents, &ids[1]), Some(&RemapAction::Move { col: 3, row: 0 }));
        assert!(action_for(&intents, &ids[2]).is_none());
    }

    #[test]
    fn test_document_level_ignored() {
        let mut store = AnnotationStore::new(SectionId(0));
        store.add(AnnotationRecord::from_draft(
            SectionId(0),
            &AnnotationDraft::document("doc"),
            MAX_BODY_LEN,
        ));
        let edit = StructuralEdit::delete_rows(0, 100).unwrap();
        assert!(remap(&store, &edit).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_edits_rejected() {
        assert!(matches!(
            StructuralEdit::insert_rows(3, 0),
            Err(AnnotationError::InvalidStructuralEdit(_))
        ));
        assert!(StructuralEdit::delete_rows(u32::MAX, 2).is_err());

        let crossed = StructuralEdit {
            kind: EditKind::DeleteRows,
            rect: CellRect { c1: 0, r1: 5, c2: 0, r2: 1 },
        };
        let (store, _) = store_with(&[(0, 3)]);
        assert!(matches!(
            remap(&store, &crossed),
            Err(AnnotationError::InvalidStructuralEdit(_))
        ));
    }
}
