//! Lock arbitration over a message relay.
//!
//! [`RelayLockService`] keeps the lock table this session knows about, queues
//! outgoing JSON messages for the host to send, and consumes incoming ones.
//! Handles are cheap clones sharing one state, so the host can keep a handle
//! for I/O while the [`crate::lock::LockArbiter`] owns another.

use crate::annotation::SectionId;
use crate::lock::{LockInfo, LockKey, LockKind, LockOwner, LockResolution, LockService, LockTicket};
use crate::sync::{ClientMessage, LockEvent, ServerMessage};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Lock identity without the requesting owner.
type LockSlot = (LockKind, SectionId, String);

fn slot(key: &LockKey) -> LockSlot {
    (key.kind, key.scope, key.object_id.clone())
}

#[derive(Debug, Default)]
struct RelayState {
    owner_key: String,
    next_ticket: u64,
    held: HashMap<LockSlot, LockOwner>,
    pending: HashMap<LockTicket, LockKey>,
    resolved: Vec<LockResolution>,
    outgoing: Vec<String>,
}

impl RelayState {
    fn queue(&mut self, msg: &ClientMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::error!("Failed to encode lock message: {}", e),
        }
    }
}

/// A [`LockService`] that talks to the lock authority through queued messages.
#[derive(Debug, Clone, Default)]
pub struct RelayLockService {
    state: Rc<RefCell<RelayState>>,
}

impl RelayLockService {
    /// Create a relay for the session identified by `owner_key`.
    pub fn new(owner_key: impl Into<String>) -> Self {
        let state = RelayState {
            owner_key: owner_key.into(),
            ..Default::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn owner_key(&self) -> String {
        self.state.borrow().owner_key.clone()
    }

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&self) -> Vec<String> {
        std::mem::take(&mut self.state.borrow_mut().outgoing)
    }

    /// Check if there are pending outgoing messages.
    pub fn has_outgoing(&self) -> bool {
        !self.state.borrow().outgoing.is_empty()
    }

    /// Number of checks still waiting for an answer.
    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Known holder of `key`.
    pub fn holder(&self, key: &LockKey) -> Option<LockOwner> {
        self.state.borrow().held.get(&slot(key)).copied()
    }

    /// Release every lock held by this session and queue the release messages.
    pub fn release_all(&self) {
        let mut state = self.state.borrow_mut();
        let mine: Vec<LockSlot> = state
            .held
            .iter()
            .filter(|(_, owner)| **owner == LockOwner::Mine)
            .map(|(slot, _)| slot.clone())
            .collect();
        for (kind, scope, object_id) in mine {
            state.held.remove(&(kind, scope, object_id.clone()));
            let key = LockKey {
                kind,
                scope,
                owner_key: state.owner_key.clone(),
                object_id,
            };
            state.queue(&ClientMessage::LockRelease { key });
        }
    }

    /// Handle an incoming server message.
    /// Returns a LockEvent describing what happened.
    pub fn handle_message(&self, json: &str) -> Option<LockEvent> {
        let msg: ServerMessage = match serde_json::from_str(json) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Failed to parse lock message: {} ({})", json, e);
                return None;
            }
        };
        let mut state = self.state.borrow_mut();

        match msg {
            ServerMessage::LockResolved { ticket, granted } => {
                let Some(key) = state.pending.remove(&ticket) else {
                    log::warn!("Lock answer for unknown ticket {:?}", ticket);
                    return None;
                };
                if granted {
                    state.held.insert(slot(&key), LockOwner::Mine);
                } else {
                    state.held.entry(slot(&key)).or_insert(LockOwner::Other);
                }
                state.resolved.push(LockResolution { ticket, granted });
                Some(LockEvent::Resolved { ticket, granted })
            }
            ServerMessage::LockAcquired { key, owner_key } => {
                let mine = owner_key == state.owner_key;
                let owner = if mine { LockOwner::Mine } else { LockOwner::Other };
                state.held.insert(slot(&key), owner);
                Some(LockEvent::Acquired { key, mine })
            }
            ServerMessage::LockReleased { key } => {
                state.held.remove(&slot(&key));
                Some(LockEvent::Released { key })
            }
            ServerMessage::Error { message } => {
                log::warn!("Lock server error: {}", message);
                Some(LockEvent::Error { message })
            }
        }
    }
}

impl LockService for RelayLockService {
    fn check_lock(&self, key: &LockKey) -> LockInfo {
        LockInfo {
            key: key.clone(),
            holder: self.holder(key),
        }
    }

    fn enqueue_check(&mut self, info: LockInfo) -> LockTicket {
        let mut state = self.state.borrow_mut();
        state.next_ticket += 1;
        let ticket = LockTicket(state.next_ticket);
        state.queue(&ClientMessage::LockCheck {
            ticket,
            key: info.key.clone(),
        });
        state.pending.insert(ticket, info.key);
        ticket
    }

    fn take_resolved(&mut self, ticket: LockTicket) -> Option<LockResolution> {
        let mut state = self.state.borrow_mut();
        let pos = state.resolved.iter().position(|r| r.ticket == ticket)?;
        Some(state.resolved.remove(pos))
    }
}
