//! Annotation service configuration.

use crate::annotation::MAX_BODY_LEN;
use crate::error::Result;
use crate::history::DEFAULT_MAX_UNDO_HISTORY;
use serde::{Deserialize, Serialize};

/// Settings for an [`crate::AnnotationDocument`] and its sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Bodies longer than this many characters are truncated on write.
    pub max_body_len: usize,
    /// Whether solved annotations are returned by cell queries.
    pub show_solved: bool,
    /// Number of transactions kept for undo.
    pub max_undo_history: usize,
    /// Whether mutations go through remote lock arbitration.
    pub collaborative: bool,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            max_body_len: MAX_BODY_LEN,
            show_solved: true,
            max_undo_history: DEFAULT_MAX_UNDO_HISTORY,
            collaborative: false,
        }
    }
}

impl AnnotationConfig {
    /// Parse a configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
