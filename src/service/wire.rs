//! Wire format of the annotations API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::annotations::{
    AnnotationDraft, AnnotationRecord, AnnotationType, AnnotationUser, Location, Permissions,
};

/// Fields requested on every read
pub(crate) const READ_FIELDS: &str =
    "item,thread,details,message,created_by,created_at,modified_at,permissions";

/// Body of `POST /2.0/annotations`
#[derive(Debug, Serialize)]
pub(crate) struct CreateAnnotationBody<'a> {
    item: ItemRef<'a>,
    details: DetailsBody<'a>,
    message: &'a str,
    /// Sent as `thread` so the API keeps the number instead of allocating a new one
    #[serde(skip_serializing_if = "Option::is_none")]
    thread: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ItemRef<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct DetailsBody<'a> {
    #[serde(rename = "type")]
    annotation_type: AnnotationType,
    location: &'a Location,
    #[serde(rename = "threadID")]
    thread_id: &'a str,
}

impl<'a> CreateAnnotationBody<'a> {
    pub(crate) fn from_draft(draft: &'a AnnotationDraft) -> Self {
        Self {
            item: ItemRef {
                kind: "file_version",
                id: &draft.file_version_id,
            },
            details: DetailsBody {
                annotation_type: draft.annotation_type,
                location: &draft.location,
                thread_id: &draft.thread_id,
            },
            message: &draft.text,
            thread: draft.thread_number.as_deref(),
        }
    }
}

/// An annotation as returned by the API
#[derive(Debug, Deserialize)]
pub(crate) struct ApiAnnotation {
    id: String,
    item: ApiItem,
    details: ApiDetails,
    #[serde(default, deserialize_with = "thread_number")]
    thread: Option<String>,
    #[serde(default)]
    message: Option<String>,
    created_by: ApiUser,
    created_at: DateTime<Utc>,
    #[serde(default)]
    modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    permissions: Option<Permissions>,
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiDetails {
    #[serde(rename = "type")]
    annotation_type: AnnotationType,
    #[serde(rename = "threadID")]
    thread_id: String,
    #[serde(default)]
    location: Option<Location>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    profile_image: Option<String>,
}

impl ApiAnnotation {
    /// Convert to a record, using `default_permissions` when the API sent none
    pub(crate) fn into_record(self, default_permissions: Permissions) -> AnnotationRecord {
        AnnotationRecord {
            id: self.id,
            file_version_id: self.item.id,
            thread_id: self.details.thread_id,
            thread_number: self.thread,
            annotation_type: self.details.annotation_type,
            text: self.message.unwrap_or_default(),
            // A missing location anchors nothing; keep it invalid so the thread is skipped
            location: self
                .details
                .location
                .unwrap_or_else(|| Location::new(Value::Null)),
            author: AnnotationUser {
                id: self.created_by.id,
                name: self.created_by.name,
                avatar_url: self.created_by.profile_image,
            },
            permissions: self.permissions.unwrap_or(default_permissions),
            created_at: self.created_at,
            modified_at: self.modified_at.unwrap_or(self.created_at),
        }
    }
}

/// One page of `GET /2.0/files/{id}/annotations`
#[derive(Debug)]
pub(crate) struct AnnotationPage {
    pub(crate) entries: Vec<ApiAnnotation>,
    pub(crate) next_marker: Option<String>,
}

/// Whether a response body is an API error object
pub(crate) fn is_error_payload(data: &Value) -> bool {
    data.get("type").and_then(Value::as_str) == Some("error")
}

/// Parse a created annotation, rejecting error payloads and bodies without an id
pub(crate) fn parse_created(data: Value) -> Result<ApiAnnotation, String> {
    if is_error_payload(&data) {
        return Err(error_message(&data));
    }
    if data.get("id").map_or(true, Value::is_null) {
        return Err("response did not include an annotation id".to_string());
    }

    serde_json::from_value(data).map_err(|e| format!("malformed annotation: {}", e))
}

/// Parse one read page, rejecting error payloads and non-array `entries`
pub(crate) fn parse_page(mut data: Value) -> Result<AnnotationPage, String> {
    if is_error_payload(&data) {
        return Err(error_message(&data));
    }

    let next_marker = data
        .get("next_marker")
        .and_then(Value::as_str)
        .filter(|marker| !marker.is_empty())
        .map(|marker| marker.to_string());

    let entries = match data.get_mut("entries").map(Value::take) {
        Some(Value::Array(entries)) => entries,
        _ => return Err("response entries is not an array".to_string()),
    };

    let entries = entries
        .into_iter()
        .map(serde_json::from_value::<ApiAnnotation>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("malformed annotation: {}", e))?;

    Ok(AnnotationPage {
        entries,
        next_marker,
    })
}

fn error_message(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .unwrap_or("API returned an error")
        .to_string()
}

/// Thread numbers arrive as strings or bare numbers
fn thread_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
