//! Storage abstraction for persisting annotations.

mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod file;

pub use memory::MemoryStorage;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStorage;

use crate::config::AnnotationConfig;
use crate::document::AnnotationDocument;
use crate::store::AnnotationStore;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Annotations not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future for async operations (compatible with WASM).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Every section's annotations for one grid document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSnapshot {
    pub sections: Vec<AnnotationStore>,
}

impl AnnotationSnapshot {
    /// Capture the current contents of `document`.
    pub fn capture(document: &AnnotationDocument) -> Self {
        Self {
            sections: document.stores(),
        }
    }

    /// Build a document from this snapshot. Undo history starts empty.
    pub fn restore(self, config: AnnotationConfig) -> AnnotationDocument {
        let mut document = AnnotationDocument::new(config);
        document.load(self.sections);
        document
    }

    /// Total number of annotations, replies included.
    pub fn total_len(&self) -> usize {
        self.sections.iter().map(AnnotationStore::total_len).sum()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a snapshot and rebuild reply links in every section.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut snapshot: Self = serde_json::from_str(json)?;
        for store in &mut snapshot.sections {
            store.relink();
        }
        Ok(snapshot)
    }
}

/// Trait for annotation storage backends.
///
/// Snapshots are keyed by the id of the grid document they belong to.
///
/// Note: On native platforms, implementations must be Send + Sync.
/// On WASM, these bounds are relaxed since it's single-threaded.
#[cfg(not(target_arch = "wasm32"))]
pub trait Storage: Send + Sync {
    /// Save a snapshot.
    fn save(&self, id: &str, snapshot: &AnnotationSnapshot) -> BoxFuture<'_, StorageResult<()>>;

    /// Load a snapshot.
    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<AnnotationSnapshot>>;

    /// Delete a snapshot.
    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// List all stored document ids.
    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;

    /// Check if a snapshot exists.
    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>>;
}

/// Trait for annotation storage backends (WASM version without Send + Sync).
#[cfg(target_arch = "wasm32")]
pub trait Storage {
    fn save(&self, id: &str, snapshot: &AnnotationSnapshot) -> BoxFuture<'_, StorageResult<()>>;
    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<AnnotationSnapshot>>;
    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>>;
    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;
    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>>;
}

#[cfg(test)]
pub(crate) fn block_on<F: std::future::Future>(f: F) -> F::Output {
    // Simple blocking executor for tests
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn dummy_raw_waker() -> RawWaker {
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            dummy_raw_waker()
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    let mut f = std::pin::pin!(f);

    loop {
        if let Poll::Ready(result) = f.as_mut().poll(&mut cx) {
            return result;
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_snapshot() -> AnnotationSnapshot {
    use crate::annotation::{AnnotationDraft, SectionId};

    let mut document = AnnotationDocument::new(AnnotationConfig::default());
    let root = document
        .add_annotation(SectionId(0), &AnnotationDraft::at(2, 3, "check totals").with_author("u1", "Ada"))
        .ok();
    if let (Some(root), Some(sheet)) = (root, document.section_mut(SectionId(0))) {
        let _ = sheet.add_reply(&root, &AnnotationDraft::default().with_author("u2", "Lin"));
    }
    let _ = document.add_annotation(SectionId(0), &AnnotationDraft::document("file notes"));
    AnnotationSnapshot::capture(&document)
}
