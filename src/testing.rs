//! Shared test fixtures

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::annotations::{
    AnnotationDraft, AnnotationRecord, AnnotationType, AnnotationUser, Location, Permissions,
};
use crate::error::{Operation, ServiceError};
use crate::service::{AnnotationErrorEvent, AnnotationService, ErrorEvents};
use crate::thread::{ThreadKind, ThreadView, ThreadViewFactory};

pub(crate) fn record_at(id: &str, thread_id: &str, created_at: &str) -> AnnotationRecord {
    let created_at: DateTime<Utc> = created_at.parse().unwrap();
    AnnotationRecord {
        id: id.to_string(),
        file_version_id: "1".to_string(),
        thread_id: thread_id.to_string(),
        thread_number: None,
        annotation_type: AnnotationType::Point,
        text: "comment".to_string(),
        location: Location::new(json!({ "page": 1, "x": 10, "y": 10 })),
        author: AnnotationUser::new("42", "Jane"),
        permissions: Permissions::full(),
        created_at,
        modified_at: created_at,
    }
}

/// A highlight comment with thread number 1
pub(crate) fn comment(id: &str, thread_id: &str, text: &str, can_delete: bool) -> AnnotationRecord {
    let mut record = record_at(id, thread_id, "2016-10-30T10:00:00Z");
    record.annotation_type = AnnotationType::HighlightComment;
    record.text = text.to_string();
    record.thread_number = Some("1".to_string());
    record.permissions = if can_delete {
        Permissions::full()
    } else {
        Permissions::read_only()
    };
    record
}

/// The comment-less record that anchors a highlight
pub(crate) fn blank_highlight(id: &str, thread_id: &str, can_delete: bool) -> AnnotationRecord {
    let mut record = comment(id, thread_id, "", can_delete);
    record.annotation_type = AnnotationType::Highlight;
    record.created_at = "2016-10-30T09:00:00Z".parse().unwrap();
    record
}

/// Single-connection pool so every query sees the same in-memory database
pub(crate) async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

/// In-memory annotation service with switchable failures
pub(crate) struct StubService {
    records: Mutex<Vec<AnnotationRecord>>,
    created: Mutex<Vec<AnnotationDraft>>,
    deleted: Mutex<Vec<String>>,
    thread_number: Mutex<String>,
    fail_create: AtomicBool,
    fail_delete: AtomicBool,
    fail_read: AtomicBool,
    reads: AtomicUsize,
    next_id: AtomicUsize,
    events: ErrorEvents,
}

impl StubService {
    pub(crate) fn new() -> Self {
        Self::with_records(Vec::new())
    }

    pub(crate) fn with_records(records: Vec<AnnotationRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            thread_number: Mutex::new("7".to_string()),
            fail_create: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_read: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            events: ErrorEvents::new(),
        }
    }

    pub(crate) fn set_records(&self, records: Vec<AnnotationRecord>) {
        *self.records.lock() = records;
    }

    /// Thread number handed out by every create
    pub(crate) fn set_thread_number(&self, number: &str) {
        *self.thread_number.lock() = number.to_string();
    }

    pub(crate) fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_read(&self, fail: bool) {
        self.fail_read.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn created(&self) -> Vec<AnnotationDraft> {
        self.created.lock().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    pub(crate) fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnnotationService for StubService {
    async fn create(&self, draft: &AnnotationDraft) -> Result<AnnotationRecord, ServiceError> {
        self.created.lock().push(draft.clone());
        if self.fail_create.load(Ordering::SeqCst) {
            return self
                .events
                .report(Err(ServiceError::transport(Operation::Create, "offline")));
        }

        let mut record = AnnotationRecord::temporary(draft, self.current_user());
        record.id = format!("server-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        record.thread_number = Some(self.thread_number.lock().clone());
        self.records.lock().push(record.clone());
        Ok(record)
    }

    async fn read(&self, file_version_id: &str) -> Result<Vec<AnnotationRecord>, ServiceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_read.load(Ordering::SeqCst) {
            return self
                .events
                .report(Err(ServiceError::data(Operation::Read, "bad page")));
        }

        Ok(self
            .records
            .lock()
            .iter()
            .filter(|record| record.file_version_id == file_version_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, annotation_id: &str) -> Result<(), ServiceError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return self
                .events
                .report(Err(ServiceError::data(Operation::Delete, "HTTP 500")));
        }

        self.deleted.lock().push(annotation_id.to_string());
        self.records.lock().retain(|record| record.id != annotation_id);
        Ok(())
    }

    fn current_user(&self) -> AnnotationUser {
        AnnotationUser::new("42", "Jane")
    }

    fn subscribe(&self) -> broadcast::Receiver<AnnotationErrorEvent> {
        self.events.subscribe()
    }
}

/// View that records every hook call
#[derive(Default)]
pub(crate) struct RecordingView {
    calls: Mutex<Vec<String>>,
}

impl RecordingView {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn push(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl ThreadView for RecordingView {
    fn show(&self) {
        self.push("show".to_string());
    }

    fn hide(&self) {
        self.push("hide".to_string());
    }

    fn add_annotation(&self, record: &AnnotationRecord) {
        self.push(format!("add:{}", record.id));
    }

    fn remove_annotation(&self, annotation_id: &str) {
        self.push(format!("remove:{}", annotation_id));
    }

    fn cancel_first_comment(&self) {
        self.push("cancel_first_comment".to_string());
    }

    fn destroy(&self) {
        self.push("destroy".to_string());
    }
}

/// Factory that keeps every view it builds
#[derive(Default)]
pub(crate) struct RecordingViewFactory {
    views: Mutex<Vec<(ThreadKind, Arc<RecordingView>)>>,
}

impl RecordingViewFactory {
    pub(crate) fn views(&self) -> Vec<(ThreadKind, Arc<RecordingView>)> {
        self.views.lock().clone()
    }
}

impl ThreadViewFactory for RecordingViewFactory {
    fn create_view(&self, kind: ThreadKind, _location: &Location) -> Arc<dyn ThreadView> {
        let view = Arc::new(RecordingView::default());
        self.views.lock().push((kind, view.clone()));
        view
    }
}

/// An annotation entry as the API returns it
pub(crate) fn api_entry(id: &str, thread_id: &str, created_at: &str) -> Value {
    json!({
        "id": id,
        "item": { "type": "file_version", "id": "1" },
        "details": { "type": "point", "threadID": thread_id, "location": { "x": 1, "y": 1, "page": 1 } },
        "thread": "1",
        "message": format!("comment {}", id),
        "created_by": { "id": "42", "name": "Jane" },
        "created_at": created_at
    })
}

/// Request seen by [`MockApi`]
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) query: HashMap<String, String>,
    pub(crate) authorization: Option<String>,
    pub(crate) body: Option<Value>,
}

struct MockState {
    pages: Mutex<HashMap<String, Value>>,
    create_response: Mutex<Option<Value>>,
    delete_status: Mutex<u16>,
    requests: Mutex<Vec<RecordedRequest>>,
    next_id: AtomicUsize,
}

/// In-process annotations API
pub(crate) struct MockApi {
    pub(crate) base_url: String,
    state: Arc<MockState>,
}

impl MockApi {
    pub(crate) async fn start() -> Self {
        let state = Arc::new(MockState {
            pages: Mutex::new(HashMap::new()),
            create_response: Mutex::new(None),
            delete_status: Mutex::new(204),
            requests: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
        });

        let app = Router::new()
            .route("/2.0/annotations", post(create_annotation))
            .route("/2.0/annotations/:id", delete(delete_annotation))
            .route("/2.0/files/:file_id/annotations", get(list_annotations))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Page served for `marker`; `None` is the first page
    pub(crate) fn set_page(&self, marker: Option<&str>, page: Value) {
        self.state
            .pages
            .lock()
            .insert(marker.unwrap_or_default().to_string(), page);
    }

    /// Fixed create response instead of echoing the request
    pub(crate) fn set_create_response(&self, response: Value) {
        *self.state.create_response.lock() = Some(response);
    }

    pub(crate) fn set_delete_status(&self, status: u16) {
        *self.state.delete_status.lock() = status;
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }
}

impl MockState {
    fn record(
        &self,
        method: &str,
        path: String,
        query: HashMap<String, String>,
        headers: &HeaderMap,
        body: Option<Value>,
    ) {
        self.requests.lock().push(RecordedRequest {
            method: method.to_string(),
            path,
            query,
            authorization: headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string()),
            body,
        });
    }
}

async fn create_annotation(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record(
        "POST",
        "/2.0/annotations".to_string(),
        HashMap::new(),
        &headers,
        Some(body.clone()),
    );

    if let Some(response) = state.create_response.lock().clone() {
        return Json(response);
    }

    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "id": format!("ann-{}", id),
        "item": body["item"],
        "details": body["details"],
        "thread": body.get("thread").cloned().unwrap_or(json!("1")),
        "message": body["message"],
        "created_by": { "id": "42", "name": "Jane" },
        "created_at": "2016-10-30T10:00:00Z"
    }))
}

async fn list_annotations(
    State(state): State<Arc<MockState>>,
    Path(file_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    let marker = query.get("marker").cloned().unwrap_or_default();
    state.record(
        "GET",
        format!("/2.0/files/{}/annotations", file_id),
        query,
        &headers,
        None,
    );

    let page = state
        .pages
        .lock()
        .get(&marker)
        .cloned()
        .unwrap_or_else(|| json!({ "entries": [] }));
    Json(page)
}

async fn delete_annotation(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    state.record(
        "DELETE",
        format!("/2.0/annotations/{}", id),
        HashMap::new(),
        &headers,
        None,
    );

    let status = *state.delete_status.lock();
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
