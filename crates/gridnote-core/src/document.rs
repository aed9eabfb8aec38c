//! Annotations for a whole grid document.

use crate::annotation::{AnnotationDraft, AnnotationId, SectionId};
use crate::collaboration::RelayLockService;
use crate::config::AnnotationConfig;
use crate::error::{AnnotationError, Result};
use crate::history::{HistoryLedger, SharedHistory};
use crate::lock::{LockArbiter, LockTicket};
use crate::service::{AnnotationService, OperationStatus};
use crate::store::AnnotationStore;
use std::collections::{BTreeMap, BTreeSet};

/// One [`AnnotationService`] per section, sharing a single undo history.
///
/// Document-level annotations live in the [`SectionId::DOCUMENT`] section,
/// which always exists.
pub struct AnnotationDocument {
    config: AnnotationConfig,
    history: SharedHistory,
    sections: BTreeMap<SectionId, AnnotationService>,
    relay: Option<RelayLockService>,
}

impl AnnotationDocument {
    /// A single-editor document.
    pub fn new(config: AnnotationConfig) -> Self {
        Self::build(config, None)
    }

    /// A document whose sections arbitrate locks through `relay`.
    ///
    /// Locks are only requested when `config.collaborative` is set.
    pub fn with_relay(config: AnnotationConfig, relay: RelayLockService) -> Self {
        Self::build(config, Some(relay))
    }

    fn build(config: AnnotationConfig, relay: Option<RelayLockService>) -> Self {
        let history = HistoryLedger::with_limit(config.max_undo_history).shared();
        let mut doc = Self {
            config,
            history,
            sections: BTreeMap::new(),
            relay,
        };
        doc.add_section(SectionId::DOCUMENT);
        doc
    }

    pub fn config(&self) -> &AnnotationConfig {
        &self.config
    }

    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    pub fn relay(&self) -> Option<&RelayLockService> {
        self.relay.as_ref()
    }

    /// Get or create the service for `section`.
    pub fn add_section(&mut self, section: SectionId) -> &mut AnnotationService {
        let Self {
            config,
            history,
            sections,
            relay,
        } = self;
        sections.entry(section).or_insert_with(|| {
            log::debug!("Creating annotation section {}", section);
            AnnotationService::new(section, history.clone(), arbiter_for(config, relay.as_ref()), config.clone())
        })
    }

    /// Drop a section and its annotations. The document section is kept.
    pub fn remove_section(&mut self, section: SectionId) -> Option<AnnotationService> {
        if section.is_document() {
            return None;
        }
        self.sections.remove(&section)
    }

    pub fn section(&self, section: SectionId) -> Option<&AnnotationService> {
        self.sections.get(&section)
    }

    pub fn section_mut(&mut self, section: SectionId) -> Option<&mut AnnotationService> {
        self.sections.get_mut(&section)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&SectionId, &AnnotationService)> {
        self.sections.iter()
    }

    pub fn document_section(&self) -> Option<&AnnotationService> {
        self.section(SectionId::DOCUMENT)
    }

    /// Add an annotation, routing document-level drafts to the document section.
    pub fn add_annotation(&mut self, section: SectionId, draft: &AnnotationDraft) -> Result<AnnotationId> {
        let target = if draft.is_document_level {
            SectionId::DOCUMENT
        } else {
            section
        };
        self.add_section(target).add_annotation(draft)
    }

    /// Snapshot of every section's store.
    pub fn stores(&self) -> Vec<AnnotationStore> {
        self.sections.values().map(|s| s.store().clone()).collect()
    }

    /// Replace section contents from stored snapshots. History is cleared.
    pub fn load(&mut self, stores: Vec<AnnotationStore>) {
        for store in stores {
            self.add_section(store.section_id()).load(store);
        }
        self.history.borrow_mut().clear();
    }

    pub fn can_undo(&self) -> bool {
        self.history.borrow().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.borrow().can_redo()
    }

    /// Revert the last transaction. Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool> {
        if self.history.borrow().is_open() {
            return Err(AnnotationError::TransactionAlreadyOpen);
        }
        let Some(tx) = self.history.borrow_mut().undo() else {
            return Ok(false);
        };
        log::debug!("Undoing transaction of {} entries", tx.len());
        let mut touched = BTreeSet::new();
        for entry in tx.entries.iter().rev() {
            match self.sections.get_mut(&entry.section) {
                Some(service) => {
                    service.replay_undo(&entry.change);
                    touched.insert(entry.section);
                }
                None => log::warn!("Undo entry for unknown section {}", entry.section),
            }
        }
        self.redraw(&touched);
        Ok(true)
    }

    /// Re-apply the last undone transaction. Returns false when there is nothing to redo.
    pub fn redo(&mut self) -> Result<bool> {
        if self.history.borrow().is_open() {
            return Err(AnnotationError::TransactionAlreadyOpen);
        }
        let Some(tx) = self.history.borrow_mut().redo() else {
            return Ok(false);
        };
        log::debug!("Redoing transaction of {} entries", tx.len());
        let mut touched = BTreeSet::new();
        for entry in &tx.entries {
            match self.sections.get_mut(&entry.section) {
                Some(service) => {
                    service.replay_redo(&entry.change);
                    touched.insert(entry.section);
                }
                None => log::warn!("Redo entry for unknown section {}", entry.section),
            }
        }
        self.redraw(&touched);
        Ok(true)
    }

    fn redraw(&mut self, sections: &BTreeSet<SectionId>) {
        for section in sections {
            if let Some(service) = self.sections.get_mut(section) {
                service.request_redraw();
            }
        }
    }

    /// Run or abort every operation whose lock answer has arrived, in all sections.
    pub fn poll_locks(&mut self) -> Vec<(LockTicket, Result<OperationStatus>)> {
        self.sections
            .values_mut()
            .flat_map(|service| service.poll_locks())
            .collect()
    }
}

fn arbiter_for(config: &AnnotationConfig, relay: Option<&RelayLockService>) -> LockArbiter {
    match relay {
        Some(relay) if config.collaborative => {
            LockArbiter::collaborative(Box::new(relay.clone()), relay.owner_key())
        }
        _ => LockArbiter::local(),
    }
}
