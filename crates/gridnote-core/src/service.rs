//! The annotation service: the entry point for every annotation mutation.
//!
//! Single-record mutations ask the [`LockArbiter`] first and only touch the
//! store once the lock is granted. Each committed mutation is recorded in the
//! shared [`crate::history::HistoryLedger`] and announced to listeners. Bulk
//! operations run inside one transaction so a single undo reverts them.

use crate::annotation::{AnnotationDraft, AnnotationId, AnnotationRecord, SectionId};
use crate::config::AnnotationConfig;
use crate::error::{AnnotationError, Result};
use crate::events::{AnnotationListener, Listeners};
use crate::grid::{CellRect, GridGeometry, MergedCells};
use crate::history::{HistoryChange, SharedHistory};
use crate::lock::{LockArbiter, LockCheck, LockOutcome, LockTicket};
use crate::remap::{RemapAction, StructuralEdit, remap};
use crate::store::{AnnotationStore, RowIndex};
use std::collections::{BTreeMap, HashMap};

/// Result of a facade operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// The mutation was applied and recorded.
    Committed,
    /// Waiting for the remote lock answer; see [`AnnotationService::poll_locks`].
    Pending(LockTicket),
    /// The target does not exist; nothing happened.
    Skipped,
}

/// A mutation waiting for its lock.
#[derive(Debug, Clone)]
enum PendingOperation {
    Change {
        id: AnnotationId,
        patch: AnnotationRecord,
        move_anchor: bool,
    },
    Remove {
        id: AnnotationId,
    },
}

impl PendingOperation {
    fn id(&self) -> &str {
        match self {
            PendingOperation::Change { id, .. } | PendingOperation::Remove { id } => id,
        }
    }
}

/// What a bulk operation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    /// Annotations added (copies).
    pub added: Vec<AnnotationId>,
    /// Annotations whose anchor changed.
    pub changed: Vec<AnnotationId>,
    /// Annotations removed.
    pub removed: Vec<AnnotationId>,
    /// Annotations left alone because another session holds their lock.
    pub skipped: Vec<AnnotationId>,
}

impl BulkReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Annotation facade for one section.
pub struct AnnotationService {
    store: AnnotationStore,
    history: SharedHistory,
    arbiter: LockArbiter,
    geometry: Box<dyn GridGeometry>,
    listeners: Listeners,
    config: AnnotationConfig,
    pending: BTreeMap<LockTicket, PendingOperation>,
    redraw_suppressed: bool,
}

impl AnnotationService {
    /// Create a service for `section`, recording into `history`.
    pub fn new(
        section: SectionId,
        history: SharedHistory,
        arbiter: LockArbiter,
        config: AnnotationConfig,
    ) -> Self {
        Self {
            store: AnnotationStore::new(section),
            history,
            arbiter,
            geometry: Box::new(MergedCells::new()),
            listeners: Listeners::default(),
            config,
            pending: BTreeMap::new(),
            redraw_suppressed: false,
        }
    }

    /// Replace the geometry provider.
    pub fn with_geometry(mut self, geometry: Box<dyn GridGeometry>) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn set_geometry(&mut self, geometry: Box<dyn GridGeometry>) {
        self.geometry = geometry;
    }

    /// Load annotations without recording history or notifying listeners.
    pub fn load(&mut self, store: AnnotationStore) {
        if store.section_id() != self.section_id() {
            log::warn!(
                "Loading store of section {} into section {}",
                store.section_id(),
                self.section_id()
            );
        }
        self.store = store;
    }

    pub fn section_id(&self) -> SectionId {
        self.store.section_id()
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn config(&self) -> &AnnotationConfig {
        &self.config
    }

    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    pub fn arbiter(&self) -> &LockArbiter {
        &self.arbiter
    }

    pub fn register_listener(&mut self, listener: Box<dyn AnnotationListener>) {
        self.listeners.register(listener);
    }

    pub fn set_show_solved(&mut self, show: bool) {
        self.config.show_solved = show;
    }

    /// Suppress redraw requests until re-enabled.
    pub fn set_redraw_suppressed(&mut self, suppressed: bool) {
        self.redraw_suppressed = suppressed;
    }

    /// Ask listeners to redraw, unless suppressed.
    pub fn request_redraw(&mut self) {
        if !self.redraw_suppressed {
            self.listeners.redraw();
        }
    }

    // --- Queries ---

    pub fn find(&self, id: &str) -> Option<&AnnotationRecord> {
        self.store.find_by_id(id)
    }

    /// Root annotations shown for a cell, honoring merged cells and the solved filter.
    pub fn query_at(&self, col: u32, row: u32) -> Vec<&AnnotationRecord> {
        self.store
            .query_at(col, row, self.geometry.as_ref(), self.config.show_solved)
    }

    pub fn query_range(&self, rect: CellRect) -> Option<RowIndex<'_>> {
        self.store.query_range(rect)
    }

    pub fn count_overlapping(&self, rect: CellRect) -> bool {
        self.store.count_overlapping(rect)
    }

    /// Visible anchored roots inside the geometry's visible range.
    pub fn visible_roots(&self) -> Vec<&AnnotationRecord> {
        self.store
            .roots()
            .iter()
            .filter(|r| {
                !r.is_document_level()
                    && !r.is_hidden
                    && (self.config.show_solved || !r.is_solved)
                    && self.geometry.is_visible(r.col(), r.row())
            })
            .collect()
    }

    /// Whether an operation on `id` is waiting for its lock.
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.values().any(|op| op.id() == id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // --- Local mutations ---

    /// Add a root annotation through the Add path.
    pub fn add_annotation(&mut self, draft: &AnnotationDraft) -> Result<AnnotationId> {
        let record = AnnotationRecord::from_draft(self.section_id(), draft, self.config.max_body_len);
        let id = record.id().to_string();
        self.transaction(|svc| svc.commit_add(record))?;
        self.request_redraw();
        Ok(id)
    }

    /// Attach a new reply to `parent_id`.
    ///
    /// The reply inherits section, anchor and document-level flag from its
    /// parent. The owning root is recorded as one Change so the reply can be
    /// undone. Returns `None` when the parent does not exist.
    pub fn add_reply(
        &mut self,
        parent_id: &str,
        draft: &AnnotationDraft,
    ) -> Result<Option<AnnotationRecord>> {
        let Some(before) = self.store.root_of(parent_id).cloned() else {
            log::debug!("Reply target {} not found", parent_id);
            return Ok(None);
        };
        let mut reply_draft = draft.clone();
        reply_draft.replies.clear();
        let reply = AnnotationRecord::from_draft(self.section_id(), &reply_draft, self.config.max_body_len);
        let reply_id = reply.id().to_string();

        self.transaction(|svc| {
            svc.store.attach_reply(parent_id, reply);
            let after = svc.store.find_by_id(before.id()).cloned();
            if let Some(after) = after {
                svc.history
                    .borrow_mut()
                    .commit_change(svc.section_id(), before.clone(), after.clone())?;
                svc.listeners.changed(&after);
            }
            Ok(())
        })?;
        self.request_redraw();
        Ok(self.store.find_by_id(&reply_id).cloned())
    }

    /// Overwrite an annotation with `patch`. Requires the annotation lock.
    ///
    /// With `move_anchor` the anchor is taken from the patch as well (roots only).
    pub fn change_annotation(
        &mut self,
        id: &str,
        patch: &AnnotationRecord,
        move_anchor: bool,
    ) -> Result<OperationStatus> {
        if !self.store.contains(id) {
            log::debug!("Change target {} not found", id);
            return Ok(OperationStatus::Skipped);
        }
        let op = PendingOperation::Change {
            id: id.to_string(),
            patch: patch.clone(),
            move_anchor,
        };
        self.arbitrate(op)
    }

    /// Remove an annotation and its replies. Requires the annotation lock.
    pub fn remove_annotation(&mut self, id: &str) -> Result<OperationStatus> {
        if !self.store.contains(id) {
            log::debug!("Remove target {} not found", id);
            return Ok(OperationStatus::Skipped);
        }
        self.arbitrate(PendingOperation::Remove { id: id.to_string() })
    }

    fn lock_scope(&self, id: &str) -> SectionId {
        self.store
            .find_by_id(id)
            .map(|r| r.section_id())
            .unwrap_or_else(|| self.section_id())
    }

    fn arbitrate(&mut self, op: PendingOperation) -> Result<OperationStatus> {
        let scope = self.lock_scope(op.id());
        match self.arbiter.try_lock(op.id(), scope) {
            LockCheck::Ready(outcome) if outcome.is_granted() => self.execute(op),
            LockCheck::Ready(_) => {
                log::info!("Annotation {} is locked elsewhere, operation aborted", op.id());
                Err(AnnotationError::LockDenied {
                    id: op.id().to_string(),
                })
            }
            LockCheck::Pending(ticket) => {
                self.pending.insert(ticket, op);
                Ok(OperationStatus::Pending(ticket))
            }
        }
    }

    fn execute(&mut self, op: PendingOperation) -> Result<OperationStatus> {
        let status = match op {
            PendingOperation::Change {
                id,
                patch,
                move_anchor,
            } => self.transaction(|svc| svc.commit_patch(&id, &patch, move_anchor))?,
            PendingOperation::Remove { id } => self.transaction(|svc| svc.commit_remove(&id))?,
        };
        if status == OperationStatus::Committed {
            self.request_redraw();
        }
        Ok(status)
    }

    /// Apply the answer for a pending lock check. Returns `None` when the
    /// ticket does not belong to this service.
    pub fn resolve_lock(
        &mut self,
        ticket: LockTicket,
        outcome: LockOutcome,
    ) -> Option<Result<OperationStatus>> {
        let op = self.pending.remove(&ticket)?;
        if outcome.is_granted() {
            Some(self.execute(op))
        } else {
            log::info!("Lock for annotation {} denied, operation aborted", op.id());
            Some(Err(AnnotationError::LockDenied {
                id: op.id().to_string(),
            }))
        }
    }

    /// Drain lock answers and run or abort the operations waiting on them.
    pub fn poll_locks(&mut self) -> Vec<(LockTicket, Result<OperationStatus>)> {
        let resolved = self.arbiter.drain_resolved();
        let mut results = Vec::with_capacity(resolved.len());
        for (ticket, outcome) in resolved {
            match self.resolve_lock(ticket, outcome) {
                Some(result) => results.push((ticket, result)),
                None => log::warn!("Lock answer for ticket {:?} has no waiting operation", ticket),
            }
        }
        results
    }

    // --- Bulk operations ---

    /// Copy or move every annotation anchored in `from` so that it keeps its
    /// offset relative to the rectangle's top-left cell inside `to`.
    ///
    /// Copies go through the Add path with fresh ids. Moves are applied as
    /// Changes without per-item locking.
    pub fn move_or_copy_range(&mut self, from: CellRect, to: CellRect, is_copy: bool) -> Result<BulkReport> {
        validate_rect(&from)?;
        validate_rect(&to)?;
        let sources: Vec<AnnotationRecord> = self.store.anchored_in(from).cloned().collect();
        if sources.is_empty() {
            return Ok(BulkReport::default());
        }

        let mut report = BulkReport::default();
        self.transaction(|svc| {
            for source in &sources {
                let col = to.c1.checked_add(source.col() - from.c1);
                let row = to.r1.checked_add(source.row() - from.r1);
                let (Some(col), Some(row)) = (col, row) else {
                    log::warn!("Annotation {} would leave the grid, skipped", source.id());
                    continue;
                };
                if is_copy {
                    let mut copy = source.duplicate();
                    copy.set_anchor(col, row);
                    report.added.push(copy.id().to_string());
                    svc.commit_add(copy)?;
                } else if svc.commit_anchor(source.id(), col, row)?.is_some() {
                    report.changed.push(source.id().to_string());
                }
            }
            Ok(())
        })?;
        for id in &report.changed {
            if let Some(record) = self.store.find_by_id(id) {
                self.listeners.changed(record);
            }
        }
        self.request_redraw();
        Ok(report)
    }

    /// Remap every anchor for a structural edit and apply the result as one
    /// transaction. Listeners get one batch per kind.
    pub fn apply_structural_edit(&mut self, edit: &StructuralEdit) -> Result<BulkReport> {
        let intents = remap(&self.store, edit)?;
        let mut report = BulkReport::default();
        let mut changed = Vec::new();

        self.transaction(|svc| {
            for intent in &intents {
                if !svc.is_free_for_me(&intent.id) {
                    log::info!("Annotation {} is locked elsewhere, remap skipped", intent.id);
                    report.skipped.push(intent.id.clone());
                    continue;
                }
                match intent.action {
                    RemapAction::Move { col, row } => {
                        if let Some(after) = svc.commit_anchor(&intent.id, col, row)? {
                            report.changed.push(intent.id.clone());
                            changed.push((intent.id.clone(), after));
                        }
                    }
                    RemapAction::Remove => {
                        if svc.take_and_record(&intent.id)?.is_some() {
                            report.removed.push(intent.id.clone());
                        }
                    }
                }
            }
            Ok(())
        })?;

        self.listeners.batch_changed(&changed);
        self.listeners.batch_removed(&report.removed);
        if !report.is_empty() {
            self.request_redraw();
        }
        Ok(report)
    }

    /// Keep one annotation for a merged rectangle.
    ///
    /// The survivor is the annotation with the smallest `(row, col)` anchor;
    /// every other annotation anchored inside `rect` is removed and the
    /// survivor is moved to the rectangle's top-left cell. Returns the survivor.
    pub fn merge_overlapping(&mut self, rect: CellRect) -> Result<Option<AnnotationId>> {
        validate_rect(&rect)?;
        let candidates: Vec<(AnnotationId, u32, u32)> = self
            .store
            .anchored_in(rect)
            .map(|r| (r.id().to_string(), r.row(), r.col()))
            .collect();
        let Some((survivor, _, _)) = candidates
            .iter()
            .min_by_key(|(_, row, col)| (*row, *col))
            .cloned()
        else {
            return Ok(None);
        };

        let mut changed = Vec::new();
        let mut removed = Vec::new();
        self.transaction(|svc| {
            for (id, _, _) in &candidates {
                if *id == survivor {
                    continue;
                }
                if !svc.is_free_for_me(id) {
                    log::info!("Annotation {} is locked elsewhere, merge keeps it", id);
                    continue;
                }
                if svc.take_and_record(id)?.is_some() {
                    removed.push(id.clone());
                }
            }
            if let Some(after) = svc.commit_anchor(&survivor, rect.c1, rect.r1)? {
                changed.push((survivor.clone(), after));
            }
            Ok(())
        })?;

        self.listeners.batch_changed(&changed);
        self.listeners.batch_removed(&removed);
        if !changed.is_empty() || !removed.is_empty() {
            self.request_redraw();
        }
        Ok(Some(survivor))
    }

    /// Relocate annotations after a sort: every root anchored in `bounds`
    /// whose row is a key of `places` moves to the mapped row.
    pub fn sort_by_places(&mut self, places: &HashMap<u32, u32>, bounds: CellRect) -> Result<BulkReport> {
        validate_rect(&bounds)?;
        let moves: Vec<(AnnotationId, u32, u32)> = self
            .store
            .anchored_in(bounds)
            .filter_map(|r| {
                let dest = *places.get(&r.row())?;
                (dest != r.row()).then(|| (r.id().to_string(), r.col(), dest))
            })
            .collect();

        let mut report = BulkReport::default();
        let mut changed = Vec::new();
        self.transaction(|svc| {
            for (id, col, row) in &moves {
                if !svc.is_free_for_me(id) {
                    report.skipped.push(id.clone());
                    continue;
                }
                if let Some(after) = svc.commit_anchor(id, *col, *row)? {
                    report.changed.push(id.clone());
                    changed.push((id.clone(), after));
                }
            }
            Ok(())
        })?;

        self.listeners.batch_changed(&changed);
        if !changed.is_empty() {
            self.request_redraw();
        }
        Ok(report)
    }

    /// Remove every root anchored in `rect` as one transaction.
    pub fn remove_range(&mut self, rect: CellRect) -> Result<BulkReport> {
        validate_rect(&rect)?;
        let ids: Vec<AnnotationId> = self.store.anchored_in(rect).map(|r| r.id().to_string()).collect();
        let mut report = BulkReport::default();
        self.transaction(|svc| {
            for id in &ids {
                if !svc.is_free_for_me(id) {
                    report.skipped.push(id.clone());
                    continue;
                }
                if svc.take_and_record(id)?.is_some() {
                    report.removed.push(id.clone());
                }
            }
            Ok(())
        })?;
        self.listeners.batch_removed(&report.removed);
        if !report.removed.is_empty() {
            self.request_redraw();
        }
        Ok(report)
    }

    // --- Remote changes ---

    /// Apply a root added by another session. No lock, no history.
    pub fn apply_remote_add(&mut self, record: AnnotationRecord) -> bool {
        if !self.store.add(record.clone()) {
            return false;
        }
        self.listeners.added(&record);
        self.request_redraw();
        true
    }

    /// Apply a change made by another session. No lock, no history.
    pub fn apply_remote_change(&mut self, record: AnnotationRecord) -> bool {
        let id = record.id().to_string();
        if !self.store.replace(record) {
            log::debug!("Remote change for unknown annotation {}", id);
            return false;
        }
        if let Some(current) = self.store.find_by_id(&id) {
            self.listeners.changed(current);
        }
        self.request_redraw();
        true
    }

    /// Apply a removal made by another session. No lock, no history.
    pub fn apply_remote_remove(&mut self, id: &str) -> bool {
        if self.store.remove(id).is_none() {
            return false;
        }
        self.listeners.removed(id);
        self.request_redraw();
        true
    }

    // --- History replay ---

    /// Revert one history entry. Bypasses lock arbitration and does not record.
    pub fn replay_undo(&mut self, change: &HistoryChange) {
        match change {
            HistoryChange::Add { record } => self.replay_remove(record.id()),
            HistoryChange::Remove { record } => self.replay_insert(record),
            HistoryChange::Change { before, .. } => self.replay_replace(before),
        }
    }

    /// Re-apply one history entry. Bypasses lock arbitration and does not record.
    pub fn replay_redo(&mut self, change: &HistoryChange) {
        match change {
            HistoryChange::Add { record } => self.replay_insert(record),
            HistoryChange::Remove { record } => self.replay_remove(record.id()),
            HistoryChange::Change { after, .. } => self.replay_replace(after),
        }
    }

    fn replay_insert(&mut self, record: &AnnotationRecord) {
        let inserted = match record.parent_id() {
            Some(parent) => self.store.attach_reply(parent, record.clone()),
            None => self.store.add(record.clone()),
        };
        if inserted {
            self.listeners.added(record);
        } else {
            log::warn!("History replay could not re-insert annotation {}", record.id());
        }
    }

    fn replay_remove(&mut self, id: &str) {
        if self.store.remove(id).is_some() {
            self.listeners.removed(id);
        } else {
            log::warn!("History replay could not find annotation {}", id);
        }
    }

    fn replay_replace(&mut self, record: &AnnotationRecord) {
        if self.store.replace(record.clone()) {
            self.listeners.changed(record);
        } else {
            log::warn!("History replay could not replace annotation {}", record.id());
        }
    }

    // --- Internals ---

    /// Run `f` inside one history transaction. The transaction is closed even
    /// when `f` fails.
    fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.history.borrow_mut().begin_transaction()?;
        let result = f(self);
        let ended = self.history.borrow_mut().end_transaction();
        let value = result?;
        ended?;
        Ok(value)
    }

    fn is_free_for_me(&self, id: &str) -> bool {
        self.arbiter.is_free_for_me(id, self.lock_scope(id))
    }

    fn commit_add(&mut self, record: AnnotationRecord) -> Result<()> {
        if !self.store.add(record.clone()) {
            return Ok(());
        }
        self.history
            .borrow_mut()
            .commit_add(self.section_id(), record.clone())?;
        self.listeners.added(&record);
        Ok(())
    }

    fn commit_patch(&mut self, id: &str, patch: &AnnotationRecord, move_anchor: bool) -> Result<OperationStatus> {
        let max_body_len = self.config.max_body_len;
        let Some(record) = self.store.find_mut(id) else {
            return Ok(OperationStatus::Skipped);
        };
        let before = record.clone();
        let move_anchor = move_anchor && record.is_root();
        record.apply_patch(patch, move_anchor, max_body_len);
        let after = record.clone();
        self.history
            .borrow_mut()
            .commit_change(self.section_id(), before, after.clone())?;
        self.listeners.changed(&after);
        Ok(OperationStatus::Committed)
    }

    fn commit_remove(&mut self, id: &str) -> Result<OperationStatus> {
        if self.take_and_record(id)?.is_none() {
            return Ok(OperationStatus::Skipped);
        }
        self.listeners.removed(id);
        Ok(OperationStatus::Committed)
    }

    /// Remove and record without notifying.
    fn take_and_record(&mut self, id: &str) -> Result<Option<AnnotationRecord>> {
        let Some(removed) = self.store.remove(id) else {
            return Ok(None);
        };
        self.history
            .borrow_mut()
            .commit_remove(self.section_id(), removed.clone())?;
        Ok(Some(removed))
    }

    /// Move an anchor and record the change without notifying. Returns the
    /// new state, or `None` when the record is missing or already there.
    fn commit_anchor(&mut self, id: &str, col: u32, row: u32) -> Result<Option<AnnotationRecord>> {
        let Some(record) = self.store.find_mut(id) else {
            return Ok(None);
        };
        if record.anchor() == (col, row) {
            return Ok(None);
        }
        let before = record.clone();
        record.set_anchor(col, row);
        let after = record.clone();
        self.history
            .borrow_mut()
            .commit_change(self.section_id(), before, after.clone())?;
        Ok(Some(after))
    }
}

fn validate_rect(rect: &CellRect) -> Result<()> {
    if rect.is_valid() {
        Ok(())
    } else {
        Err(AnnotationError::InvalidStructuralEdit(format!(
            "crossed rectangle {:?}",
            rect
        )))
    }
}
