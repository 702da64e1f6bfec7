//! Annotation types
//!
//! Records mirror the annotations API payload after parsing. The geometry
//! payload is kept opaque; only the page number is interpreted here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User id the API uses for a viewer that has not been identified yet
pub const ANONYMOUS_USER_ID: &str = "0";

/// A single annotation (one comment in a thread)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    /// Annotation ID (server assigned, or a UUID for temporary records)
    pub id: String,
    /// File version this annotation belongs to
    #[serde(rename = "fileVersionId")]
    pub file_version_id: String,
    /// Thread this annotation belongs to
    #[serde(rename = "threadId")]
    pub thread_id: String,
    /// Thread sequence label assigned by the server
    #[serde(rename = "threadNumber", skip_serializing_if = "Option::is_none")]
    pub thread_number: Option<String>,
    /// Type of annotation
    #[serde(rename = "type")]
    pub annotation_type: AnnotationType,
    /// Comment text, empty for a plain highlight
    pub text: String,
    /// Type-specific geometry
    pub location: Location,
    /// Author of the annotation
    pub author: AnnotationUser,
    /// What the current user may do with this annotation
    pub permissions: Permissions,
    /// Creation timestamp
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    #[serde(rename = "modifiedAt")]
    pub modified_at: DateTime<Utc>,
}

/// Types of annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationType {
    /// Point comment
    #[serde(rename = "point")]
    Point,
    /// Text highlight without a comment
    #[serde(rename = "highlight")]
    Highlight,
    /// Text highlight carrying comments
    #[serde(rename = "highlight-comment", alias = "highlight_comment")]
    HighlightComment,
    /// Freehand drawing
    #[serde(rename = "draw", alias = "drawing")]
    Draw,
}

/// Opaque geometry payload for an annotation
///
/// Point annotations carry `x`/`y`, highlights carry quad points, drawings
/// carry paths. Every type may carry a `page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(serde_json::Value);

/// An annotation author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationUser {
    pub id: String,
    pub name: String,
    #[serde(rename = "avatarUrl", skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Permissions the current user holds on one annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub can_edit: bool,
    #[serde(default)]
    pub can_delete: bool,
}

/// Payload for creating an annotation
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationDraft {
    pub file_version_id: String,
    pub annotation_type: AnnotationType,
    pub text: String,
    pub location: Location,
    pub thread_id: String,
    /// Sent back to the API so replies keep the thread's number
    pub thread_number: Option<String>,
}

impl AnnotationRecord {
    /// Build the optimistic stand-in for a draft that has not been confirmed yet
    pub fn temporary(draft: &AnnotationDraft, author: AnnotationUser) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            file_version_id: draft.file_version_id.clone(),
            thread_id: draft.thread_id.clone(),
            thread_number: draft.thread_number.clone(),
            annotation_type: draft.annotation_type,
            text: draft.text.clone(),
            location: draft.location.clone(),
            author,
            permissions: Permissions::full(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Whether this record carries no comment text
    pub fn is_blank(&self) -> bool {
        self.text.is_empty()
    }

    /// Page this annotation is anchored to
    pub fn page(&self) -> u32 {
        self.location.page()
    }
}

impl AnnotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationType::Point => "point",
            AnnotationType::Highlight => "highlight",
            AnnotationType::HighlightComment => "highlight-comment",
            AnnotationType::Draw => "draw",
        }
    }

    /// Whether this is `highlight` or `highlight-comment`
    pub fn is_highlight(&self) -> bool {
        matches!(
            self,
            AnnotationType::Highlight | AnnotationType::HighlightComment
        )
    }
}

impl fmt::Display for AnnotationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnnotationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "point" => Ok(AnnotationType::Point),
            "highlight" => Ok(AnnotationType::Highlight),
            "highlight-comment" | "highlight_comment" => Ok(AnnotationType::HighlightComment),
            "draw" | "drawing" => Ok(AnnotationType::Draw),
            other => Err(format!("unknown annotation type: {}", other)),
        }
    }
}

impl Location {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Page number, defaulting to 1 when the payload has none
    pub fn page(&self) -> u32 {
        self.0
            .get("page")
            .and_then(|page| match page {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .and_then(|page| u32::try_from(page).ok())
            .filter(|page| *page > 0)
            .unwrap_or(1)
    }

    /// A location must be a JSON object to anchor a thread
    pub fn is_valid(&self) -> bool {
        self.0.is_object()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

impl Default for Location {
    fn default() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

impl From<serde_json::Value> for Location {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl AnnotationUser {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            avatar_url: None,
        }
    }

    /// Placeholder user until the API tells us who we are
    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_USER_ID, "Anonymous User")
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_USER_ID
    }
}

impl Permissions {
    /// Edit and delete, as held on annotations the user just created
    pub fn full() -> Self {
        Self {
            can_edit: true,
            can_delete: true,
        }
    }

    pub fn read_only() -> Self {
        Self {
            can_edit: false,
            can_delete: false,
        }
    }
}
