//! Lock arbitration for annotation mutations.
//!
//! In single-editor mode every request is granted immediately. In
//! collaborative mode the arbiter consults a [`LockService`]; a request that
//! cannot be answered from known lock state is enqueued and resolves later
//! through [`LockArbiter::drain_resolved`]. This is the only place where an
//! annotation operation may wait on a remote round trip.

use crate::annotation::SectionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a lock protects. Annotations use [`LockKind::Object`] so they never
/// contend with cell, row or column edit locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Cell,
    Range,
    Object,
}

/// Identity of a lockable object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub kind: LockKind,
    pub scope: SectionId,
    pub owner_key: String,
    pub object_id: String,
}

/// Who holds a lock, relative to this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOwner {
    Mine,
    Other,
}

/// Known state of one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub key: LockKey,
    pub holder: Option<LockOwner>,
}

/// Handle for a lock check awaiting a remote answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockTicket(pub u64);

/// Answer to an enqueued check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockResolution {
    pub ticket: LockTicket,
    pub granted: bool,
}

/// The remote collaboration service, as seen by the arbiter.
pub trait LockService {
    /// Current knowledge about `key`.
    fn check_lock(&self, key: &LockKey) -> LockInfo;

    /// Whether `info` is held by `owner`.
    fn intersects(&self, info: &LockInfo, owner: LockOwner) -> bool {
        info.holder == Some(owner)
    }

    /// Ask the remote side to grant `info`. The answer arrives through
    /// [`LockService::take_resolved`].
    fn enqueue_check(&mut self, info: LockInfo) -> LockTicket;

    /// Take the answer for `ticket` if it has arrived. Answers for other
    /// tickets stay queued, so several arbiters can share one service.
    fn take_resolved(&mut self, ticket: LockTicket) -> Option<LockResolution>;
}

/// Result of an arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The lock was already held by this session.
    MineAlready,
    /// The lock is granted.
    AcquiredLocally,
    /// Another session holds the lock; the mutation must not happen.
    HeldByOther,
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        !matches!(self, LockOutcome::HeldByOther)
    }
}

/// Either an immediate outcome or a ticket to wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCheck {
    Ready(LockOutcome),
    Pending(LockTicket),
}

/// Grants mutation rights on annotations.
pub struct LockArbiter {
    service: Option<Box<dyn LockService>>,
    owner_key: String,
    issued: BTreeSet<LockTicket>,
}

impl Default for LockArbiter {
    fn default() -> Self {
        Self::local()
    }
}

impl std::fmt::Debug for LockArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockArbiter")
            .field("collaborative", &self.is_collaborative())
            .field("owner_key", &self.owner_key)
            .finish()
    }
}

impl LockArbiter {
    /// Single-editor arbiter: every request is granted.
    pub fn local() -> Self {
        Self {
            service: None,
            owner_key: String::new(),
            issued: BTreeSet::new(),
        }
    }

    /// Arbiter backed by a remote lock service. `owner_key` identifies this session.
    pub fn collaborative(service: Box<dyn LockService>, owner_key: impl Into<String>) -> Self {
        Self {
            service: Some(service),
            owner_key: owner_key.into(),
            issued: BTreeSet::new(),
        }
    }

    pub fn is_collaborative(&self) -> bool {
        self.service.is_some()
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    /// The lock key for an annotation. The object id is namespaced so it can
    /// never collide with ordinary cell locks.
    pub fn annotation_key(&self, id: &str, scope: SectionId) -> LockKey {
        LockKey {
            kind: LockKind::Object,
            scope,
            owner_key: self.owner_key.clone(),
            object_id: format!("annotation:{id}"),
        }
    }

    /// Request the lock for annotation `id`.
    pub fn try_lock(&mut self, id: &str, scope: SectionId) -> LockCheck {
        let key = self.annotation_key(id, scope);
        let Some(service) = self.service.as_mut() else {
            return LockCheck::Ready(LockOutcome::AcquiredLocally);
        };

        let info = service.check_lock(&key);
        if service.intersects(&info, LockOwner::Mine) {
            return LockCheck::Ready(LockOutcome::MineAlready);
        }
        if service.intersects(&info, LockOwner::Other) {
            log::debug!("Annotation {} is locked by another session", id);
            return LockCheck::Ready(LockOutcome::HeldByOther);
        }
        let ticket = service.enqueue_check(info);
        self.issued.insert(ticket);
        log::debug!("Lock check for annotation {} pending as {:?}", id, ticket);
        LockCheck::Pending(ticket)
    }

    /// Synchronous check used by bulk operations: false only when another
    /// session is known to hold the lock. Never enqueues a remote check.
    pub fn is_free_for_me(&self, id: &str, scope: SectionId) -> bool {
        let Some(service) = self.service.as_ref() else {
            return true;
        };
        let info = service.check_lock(&self.annotation_key(id, scope));
        !service.intersects(&info, LockOwner::Other)
    }

    /// Outcomes of this arbiter's pending checks answered since the last call.
    pub fn drain_resolved(&mut self) -> Vec<(LockTicket, LockOutcome)> {
        let Self { service, issued, .. } = self;
        let Some(service) = service.as_mut() else {
            return Vec::new();
        };
        let mut resolved = Vec::new();
        issued.retain(|ticket| match service.take_resolved(*ticket) {
            Some(r) => {
                let outcome = if r.granted {
                    LockOutcome::AcquiredLocally
                } else {
                    LockOutcome::HeldByOther
                };
                resolved.push((r.ticket, outcome));
                false
            }
            None => true,
        });
        resolved
    }

    /// Number of checks issued by this arbiter and still unanswered.
    pub fn outstanding(&self) -> usize {
        self.issued.len()
    }
}
