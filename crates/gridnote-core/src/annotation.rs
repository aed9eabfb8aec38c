//! Annotation records: threaded comments anchored to grid cells.
//!
//! A root annotation owns its replies. Replies keep a non-owning handle to
//! their parent (the parent's id) which is used for level computation and
//! sibling removal; it is never serialized and is rebuilt by [`AnnotationRecord::relink`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an annotation.
pub type AnnotationId = String;

/// Maximum body length in characters.
pub const MAX_BODY_LEN: usize = 32767;

/// Identity of the section (sheet) that owns an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionId(pub i32);

impl SectionId {
    /// Sentinel for document-scoped annotations and their replies.
    pub const DOCUMENT: SectionId = SectionId(-1);

    pub fn is_document(&self) -> bool {
        *self == Self::DOCUMENT
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generate a fresh annotation id.
///
/// Document-level annotations get `doc_<guid>`, anchored ones `sheet<N>_<guid>`.
pub fn generate_id(section: SectionId, document_level: bool) -> AnnotationId {
    if document_level || section.is_document() {
        format!("doc_{}", Uuid::new_v4())
    } else {
        format!("sheet{}_{}", section.0, Uuid::new_v4())
    }
}

/// Truncate `body` to at most `max_len` characters.
pub fn truncate_body(body: &str, max_len: usize) -> String {
    match body.char_indices().nth(max_len) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

/// Transient description of an annotation, as supplied by the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnotationDraft {
    pub col: u32,
    pub row: u32,
    pub body: String,
    pub created_at: String,
    pub author_id: String,
    pub author_name: String,
    pub is_document_level: bool,
    pub is_solved: bool,
    pub is_hidden: bool,
    pub replies: Vec<AnnotationDraft>,
}

impl AnnotationDraft {
    /// A draft anchored at `(col, row)` with the given body.
    pub fn at(col: u32, row: u32, body: impl Into<String>) -> Self {
        Self {
            col,
            row,
            body: body.into(),
            ..Default::default()
        }
    }

    /// A document-level draft.
    pub fn document(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            is_document_level: true,
            ..Default::default()
        }
    }

    pub fn with_author(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.author_id = id.into();
        self.author_name = name.into();
        self
    }
}

/// A node of the annotation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    section_id: SectionId,
    col: u32,
    row: u32,
    id: AnnotationId,
    level: u32,
    body: String,
    pub created_at: String,
    pub author_id: String,
    pub author_name: String,
    is_document_level: bool,
    pub is_solved: bool,
    #[serde(default)]
    replies: Vec<AnnotationRecord>,
    pub is_hidden: bool,
    #[serde(skip)]
    parent_id: Option<AnnotationId>,
}

impl AnnotationRecord {
    /// Build a root record from a draft, generating ids for it and its replies.
    pub fn from_draft(section: SectionId, draft: &AnnotationDraft, max_body_len: usize) -> Self {
        let section = if draft.is_document_level {
            SectionId::DOCUMENT
        } else {
            section
        };
        Self::detached(section, draft, max_body_len)
    }

    /// A record with a fresh id and no parent. Nested drafts are attached recursively.
    fn detached(section: SectionId, draft: &AnnotationDraft, max_body_len: usize) -> Self {
        let mut record = Self {
            section_id: section,
            col: draft.col,
            row: draft.row,
            id: generate_id(section, draft.is_document_level),
            level: 0,
            body: truncate_body(&draft.body, max_body_len),
            created_at: draft.created_at.clone(),
            author_id: draft.author_id.clone(),
            author_name: draft.author_name.clone(),
            is_document_level: draft.is_document_level,
            is_solved: draft.is_solved,
            replies: Vec::new(),
            is_hidden: draft.is_hidden,
            parent_id: None,
        };
        for nested in &draft.replies {
            let nested = Self::detached(section, nested, max_body_len);
            record.attach_reply(nested);
        }
        record
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn section_id(&self) -> SectionId {
        self.section_id
    }

    pub fn col(&self) -> u32 {
        self.col
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    /// Anchor as `(col, row)`.
    pub fn anchor(&self) -> (u32, u32) {
        (self.col, self.row)
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_document_level(&self) -> bool {
        self.is_document_level
    }

    pub fn replies(&self) -> &[AnnotationRecord] {
        &self.replies
    }

    /// Id of the owning record, `None` for roots.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Overwrite the body, truncating to `max_len` characters.
    pub fn set_body(&mut self, body: &str, max_len: usize) {
        self.body = truncate_body(body, max_len);
    }

    /// Move the anchor. Replies follow their root.
    pub fn set_anchor(&mut self, col: u32, row: u32) {
        self.col = col;
        self.row = row;
        self.relink();
    }

    /// Replace the id, e.g. when duplicating a record.
    pub(crate) fn set_id(&mut self, id: AnnotationId) {
        self.id = id;
        self.relink();
    }

    /// Detach from any parent so the record can live as a root.
    pub(crate) fn make_root(&mut self) {
        self.parent_id = None;
        self.level = 0;
        self.relink();
    }

    /// Append a reply. The reply inherits section, document-level flag and
    /// anchor from this record and gets `level = self.level + 1`.
    pub fn attach_reply(&mut self, mut reply: AnnotationRecord) -> &AnnotationRecord {
        self.adopt(&mut reply);
        self.replies.push(reply);
        let last = self.replies.len() - 1;
        &self.replies[last]
    }

    fn adopt(&self, reply: &mut AnnotationRecord) {
        reply.parent_id = Some(self.id.clone());
        reply.level = self.level + 1;
        reply.section_id = if self.is_document_level {
            SectionId::DOCUMENT
        } else {
            self.section_id
        };
        reply.is_document_level = self.is_document_level;
        reply.col = self.col;
        reply.row = self.row;
        reply.relink();
    }

    /// Re-derive parent handles, levels and inherited fields of the whole subtree.
    pub fn relink(&mut self) {
        let mut replies = std::mem::take(&mut self.replies);
        for reply in &mut replies {
            self.adopt(reply);
        }
        self.replies = replies;
    }

    /// Overwrite the mutable fields from `patch` and replace the reply
    /// subtree wholesale. Replies without an id get a fresh one.
    pub fn apply_patch(&mut self, patch: &AnnotationRecord, move_anchor: bool, max_body_len: usize) {
        self.set_body(&patch.body, max_body_len);
        self.created_at = patch.created_at.clone();
        self.author_id = patch.author_id.clone();
        self.author_name = patch.author_name.clone();
        self.is_solved = patch.is_solved;
        self.is_hidden = patch.is_hidden;
        if move_anchor {
            self.col = patch.col;
            self.row = patch.row;
        }
        self.replies = patch.replies.clone();
        self.assign_missing_ids();
        self.relink();
    }

    fn assign_missing_ids(&mut self) {
        for reply in &mut self.replies {
            if reply.id.is_empty() {
                reply.id = generate_id(self.section_id, self.is_document_level);
            }
            reply.assign_missing_ids();
        }
    }

    /// Deep copy with fresh ids for the record and every reply.
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.regenerate_ids();
        copy.relink();
        copy
    }

    fn regenerate_ids(&mut self) {
        self.id = generate_id(self.section_id, self.is_document_level);
        for reply in &mut self.replies {
            reply.regenerate_ids();
        }
    }

    /// Depth-first search of this subtree.
    pub fn find(&self, id: &str) -> Option<&AnnotationRecord> {
        if self.id == id {
            return Some(self);
        }
        self.replies.iter().find_map(|r| r.find(id))
    }

    pub(crate) fn find_mut(&mut self, id: &str) -> Option<&mut AnnotationRecord> {
        if self.id == id {
            return Some(self);
        }
        self.replies.iter_mut().find_map(|r| r.find_mut(id))
    }

    /// Splice a descendant out of this subtree.
    pub(crate) fn remove_descendant(&mut self, id: &str) -> Option<AnnotationRecord> {
        if let Some(pos) = self.replies.iter().position(|r| r.id == id) {
            return Some(self.replies.remove(pos));
        }
        self.replies.iter_mut().find_map(|r| r.remove_descendant(id))
    }

    /// Replace a descendant with `record`, keeping its sibling position.
    pub(crate) fn replace_descendant(&mut self, record: AnnotationRecord) -> Result<(), AnnotationRecord> {
        if let Some(pos) = self.replies.iter().position(|r| r.id == record.id) {
            let mut record = record;
            self.adopt(&mut record);
            self.replies[pos] = record;
            return Ok(());
        }
        let mut record = record;
        for reply in &mut self.replies {
            match reply.replace_descendant(record) {
                Ok(()) => return Ok(()),
                Err(back) => record = back,
            }
        }
        Err(record)
    }

    /// Total number of records in this subtree, including itself.
    pub fn subtree_len(&self) -> usize {
        1 + self.replies.iter().map(|r| r.subtree_len()).sum::<usize>()
    }
}
