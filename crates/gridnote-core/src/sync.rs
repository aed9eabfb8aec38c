//! Messages exchanged with the remote lock authority.
//!
//! Transport is the host's concern: messages are plain JSON strings queued by
//! [`crate::collaboration::RelayLockService`].

use crate::lock::{LockKey, LockTicket};
use serde::{Deserialize, Serialize};

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the lock on `key`
    LockCheck { ticket: LockTicket, key: LockKey },
    /// Give up a lock held by this session
    LockRelease { key: LockKey },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Answer to a `lock_check`
    LockResolved { ticket: LockTicket, granted: bool },
    /// A session acquired a lock
    LockAcquired { key: LockKey, owner_key: String },
    /// A lock was released
    LockReleased { key: LockKey },
    /// Error message
    Error { message: String },
}

/// Events produced by incoming messages
#[derive(Debug, Clone, PartialEq)]
pub enum LockEvent {
    /// A pending check was answered
    Resolved { ticket: LockTicket, granted: bool },
    /// A lock changed hands
    Acquired { key: LockKey, mine: bool },
    /// A lock became free
    Released { key: LockKey },
    /// Error occurred
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::SectionId;
    use crate::lock::LockKind;

    fn key() -> LockKey {
        LockKey {
            kind: LockKind::Object,
            scope: SectionId(0),
            owner_key: "me".to_string(),
            object_id: "annotation:a".to_string(),
        }
    }

    #[test]
    fn test_client_message_tagging() {
        let msg = ClientMessage::LockCheck { ticket: LockTicket(7), key: key() };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "lock_check");
        assert_eq!(value["ticket"], 7);
        assert_eq!(value["key"]["kind"], "object");
        assert_eq!(value["key"]["scope"], 0);
    }

    #[test]
    fn test_server_message_parsing() {
        let json = r#"{"type":"lock_resolved","ticket":3,"granted":false}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg, ServerMessage::LockResolved { ticket: LockTicket(3), granted: false });

        let json = r#"{"type":"error","message":"boom"}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg, ServerMessage::Error { message: "boom".to_string() });
    }
}
