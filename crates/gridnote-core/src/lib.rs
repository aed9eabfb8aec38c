//! Gridnote Core Library
//!
//! Threaded annotations attached to cells of a grid document: the annotation
//! tree, per-section stores, anchor remapping for structural edits, lock
//! arbitration for collaborative editing, and a shared undo history.

pub mod annotation;
pub mod collaboration;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod grid;
pub mod history;
pub mod lock;
pub mod remap;
pub mod service;
pub mod storage;
pub mod store;
pub mod sync;

pub use annotation::{AnnotationDraft, AnnotationId, AnnotationRecord, SectionId};
pub use collaboration::RelayLockService;
pub use config::AnnotationConfig;
pub use document::AnnotationDocument;
pub use error::{AnnotationError, Result};
pub use events::{AnnotationEvent, AnnotationListener, EventRecorder};
pub use grid::{CellRect, GridGeometry, MergedCells};
pub use history::{HistoryChange, HistoryLedger, SharedHistory};
pub use lock::{LockArbiter, LockCheck, LockOutcome, LockService, LockTicket};
pub use remap::{EditKind, StructuralEdit};
pub use service::{AnnotationService, BulkReport, OperationStatus};
pub use storage::{AnnotationSnapshot, Storage, StorageError};
pub use store::AnnotationStore;
pub use sync::{ClientMessage, LockEvent, ServerMessage};
