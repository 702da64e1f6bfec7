//! User-facing notices for annotation failures

use serde::Serialize;

use crate::error::ErrorReason;

/// Notice the viewer shows when annotations misbehave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotatorNotice {
    LoadFailed,
    CreateFailed,
    UpdateFailed,
    DeleteFailed,
    AuthorizationFailed,
}

impl AnnotatorNotice {
    /// Localization key for the notice text
    pub fn message_key(&self) -> &'static str {
        match self {
            AnnotatorNotice::LoadFailed => "annotations_load_error",
            AnnotatorNotice::CreateFailed => "annotations_create_error",
            AnnotatorNotice::UpdateFailed => "annotations_update_error",
            AnnotatorNotice::DeleteFailed => "annotations_delete_error",
            AnnotatorNotice::AuthorizationFailed => "annotations_authorization_error",
        }
    }
}

impl From<ErrorReason> for AnnotatorNotice {
    fn from(reason: ErrorReason) -> Self {
        match reason {
            ErrorReason::Read => AnnotatorNotice::LoadFailed,
            ErrorReason::Create => AnnotatorNotice::CreateFailed,
            ErrorReason::Update => AnnotatorNotice::UpdateFailed,
            ErrorReason::Delete => AnnotatorNotice::DeleteFailed,
            ErrorReason::Authorization => AnnotatorNotice::AuthorizationFailed,
        }
    }
}
