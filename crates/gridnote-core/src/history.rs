//! Undo/redo ledger of annotation transactions.
//!
//! A transaction groups the record-level entries of one logical operation so
//! that undo reverts them together. The ledger is shared by every section of a
//! document; transactions never nest.

use crate::annotation::{AnnotationRecord, SectionId};
use crate::error::{AnnotationError, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// Default number of transactions kept for undo.
pub const DEFAULT_MAX_UNDO_HISTORY: usize = 100;

/// Ledger handle shared by the sections of one document.
pub type SharedHistory = Rc<RefCell<HistoryLedger>>;

/// A record-level change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryChange {
    /// A subtree was added.
    Add { record: AnnotationRecord },
    /// A subtree was removed.
    Remove { record: AnnotationRecord },
    /// A record was replaced.
    Change {
        before: AnnotationRecord,
        after: AnnotationRecord,
    },
}

/// A change together with the section it happened in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub section: SectionId,
    pub change: HistoryChange,
}

/// One undoable unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub entries: Vec<HistoryEntry>,
}

impl Transaction {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Append-only log of transactions with undo and redo stacks.
#[derive(Debug)]
pub struct HistoryLedger {
    undo_stack: Vec<Transaction>,
    redo_stack: Vec<Transaction>,
    open: Option<Transaction>,
    max_transactions: usize,
}

impl Default for HistoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_UNDO_HISTORY)
    }

    /// Create an empty ledger keeping at most `max_transactions` undo steps.
    pub fn with_limit(max_transactions: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            open: None,
            max_transactions: max_transactions.max(1),
        }
    }

    /// Wrap into a shared handle.
    pub fn shared(self) -> SharedHistory {
        Rc::new(RefCell::new(self))
    }

    /// Start a transaction. Fails if one is already open.
    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.open.is_some() {
            return Err(AnnotationError::TransactionAlreadyOpen);
        }
        self.open = Some(Transaction::default());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn push(&mut self, section: SectionId, change: HistoryChange) -> Result<()> {
        let tx = self.open.as_mut().ok_or(AnnotationError::NoOpenTransaction)?;
        tx.entries.push(HistoryEntry { section, change });
        Ok(())
    }

    /// Record an added subtree.
    pub fn commit_add(&mut self, section: SectionId, record: AnnotationRecord) -> Result<()> {
        self.push(section, HistoryChange::Add { record })
    }

    /// Record a removed subtree.
    pub fn commit_remove(&mut self, section: SectionId, record: AnnotationRecord) -> Result<()> {
        self.push(section, HistoryChange::Remove { record })
    }

    /// Record a replaced record.
    pub fn commit_change(
        &mut self,
        section: SectionId,
        before: AnnotationRecord,
        after: AnnotationRecord,
    ) -> Result<()> {
        self.push(section, HistoryChange::Change { before, after })
    }

    /// Close the open transaction. Empty transactions are discarded.
    /// Returns true when a transaction was added to the undo stack.
    pub fn end_transaction(&mut self) -> Result<bool> {
        let tx = self.open.take().ok_or(AnnotationError::NoOpenTransaction)?;
        if tx.is_empty() {
            return Ok(false);
        }
        self.undo_stack.push(tx);
        self.redo_stack.clear();
        if self.undo_stack.len() > self.max_transactions {
            self.undo_stack.remove(0);
        }
        Ok(true)
    }

    /// Pop the last transaction for undo. The caller replays its entries in reverse.
    pub fn undo(&mut self) -> Option<Transaction> {
        if self.open.is_some() {
            log::warn!("Undo requested while a transaction is open");
            return None;
        }
        let tx = self.undo_stack.pop()?;
        self.redo_stack.push(tx.clone());
        Some(tx)
    }

    /// Pop the last undone transaction for redo. The caller replays its entries in order.
    pub fn redo(&mut self) -> Option<Transaction> {
        if self.open.is_some() {
            log::warn!("Redo requested while a transaction is open");
            return None;
        }
        let tx = self.redo_stack.pop()?;
        self.undo_stack.push(tx.clone());
        Some(tx)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// The most recently committed transaction.
    pub fn last(&self) -> Option<&Transaction> {
        self.undo_stack.last()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.open = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationDraft, MAX_BODY_LEN};

    const SHEET: SectionId = SectionId(0);

    fn record() -> AnnotationRecord {
        AnnotationRecord::from_draft(SHEET, &AnnotationDraft::at(0, 0, "x"), MAX_BODY_LEN)
    }

    #[test]
    fn test_commit_requires_open_transaction() {
        let mut ledger = HistoryLedger::new();
        assert!(matches!(
            ledger.commit_add(SHEET, record()),
            Err(AnnotationError::NoOpenTransaction)
        ));
        assert!(matches!(ledger.end_transaction(), Err(AnnotationError::NoOpenTransaction)));
    }

    #[test]
    fn test_nesting_is_rejected() {
        let mut ledger = HistoryLedger::new();
        ledger.begin_transaction().unwrap();
        assert!(matches!(
            ledger.begin_transaction(),
            Err(AnnotationError::TransactionAlreadyOpen)
        ));
        assert!(ledger.is_open());
    }

    #[test]
    fn test_entries_grouped_per_transaction() {
        let mut ledger = HistoryLedger::new();
        ledger.begin_transaction().unwrap();
        ledger.commit_add(SHEET, record()).unwrap();
        ledger.commit_remove(SHEET, record()).unwrap();
        assert!(ledger.end_transaction().unwrap());

        assert_eq!(ledger.undo_count(), 1);
        assert_eq!(ledger.last().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_transaction_discarded() {
        let mut ledger = HistoryLedger::new();
        ledger.begin_transaction().unwrap();
        assert!(!ledger.end_transaction().unwrap());
        assert!(!ledger.can_undo());
    }

    #[test]
    fn test_undo_redo_moves_between_stacks() {
        let mut ledger = HistoryLedger::new();
        ledger.begin_transaction().unwrap();
        let before = record();
        let mut after = before.clone();
        after.set_body("y", MAX_BODY_LEN);
        ledger.commit_change(SHEET, before, after).unwrap();
        ledger.end_transaction().unwrap();

        let tx = ledger.undo().unwrap();
        assert!(matches!(tx.entries[0].change, HistoryChange::Change { .. }));
        assert!(ledger.can_redo());
        assert!(!ledger.can_undo());

        assert!(ledger.redo().is_some());
        assert!(ledger.can_undo());
        assert!(ledger.redo().is_none());
    }

    #[test]
    fn test_new_transaction_clears_redo() {
        let mut ledger = HistoryLedger::new();
        for _ in 0..2 {
            ledger.begin_transaction().unwrap();
            ledger.commit_add(SHEET, record()).unwrap();
            ledger.end_transaction().unwrap();
        }
        ledger.undo();
        assert!(ledger.can_redo());

        ledger.begin_transaction().unwrap();
        ledger.commit_add(SHEET, record()).unwrap();
        ledger.end_transaction().unwrap();
        assert!(!ledger.can_redo());
    }

    #[test]
    fn test_history_limit() {
        let mut ledger = HistoryLedger::with_limit(3);
        for _ in 0..5 {
            ledger.begin_transaction().unwrap();
            ledger.commit_add(SHEET, record()).unwrap();
            ledger.end_transaction().unwrap();
        }
        assert_eq!(ledger.undo_count(), 3);
    }

    #[test]
    fn test_undo_refused_while_open() {
        let mut ledger = HistoryLedger::new();
        ledger.begin_transaction().unwrap();
        ledger.commit_add(SHEET, record()).unwrap();
        ledger.end_transaction().unwrap();

        ledger.begin_transaction().unwrap();
        assert!(ledger.undo().is_none());
    }
}
