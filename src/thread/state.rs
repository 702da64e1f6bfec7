//! Thread lifecycle states and kinds

use serde::{Deserialize, Serialize};

use crate::annotations::AnnotationType;

/// Interaction state of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadState {
    /// Created locally, nothing saved yet
    Pending,
    /// Pending and focused by the user
    PendingActive,
    /// Has records and is being looked at
    Hover,
    /// Has records and is idle
    Inactive,
}

impl ThreadState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ThreadState::Pending | ThreadState::PendingActive)
    }
}

/// What a thread is anchored by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadKind {
    Point,
    Highlight,
    Drawing,
}

impl From<AnnotationType> for ThreadKind {
    fn from(annotation_type: AnnotationType) -> Self {
        match annotation_type {
            AnnotationType::Point => ThreadKind::Point,
            AnnotationType::Highlight | AnnotationType::HighlightComment => ThreadKind::Highlight,
            AnnotationType::Draw => ThreadKind::Drawing,
        }
    }
}
