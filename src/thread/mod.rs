//! Annotation threads
//!
//! An [`AnnotationThread`] owns the ordered records of one thread and keeps
//! them in step with the annotation service. Writes are optimistic: the local
//! change is applied before the call returns, and the network half runs as
//! its own tokio task. The returned future only reports that task's outcome;
//! dropping it does not cancel the request.

mod events;
mod state;
mod view;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::annotations::{AnnotationDraft, AnnotationRecord, AnnotationType, Location};
use crate::error::ThreadError;
use crate::service::AnnotationService;

pub use events::{ThreadEvent, ThreadEventKind};
pub use state::{ThreadKind, ThreadState};
pub use view::{NoopView, NoopViewFactory, ThreadView, ThreadViewFactory};

/// Everything needed to build a thread
#[derive(Debug, Clone)]
pub struct ThreadParams {
    pub file_version_id: String,
    /// Generated when absent
    pub thread_id: Option<String>,
    pub thread_number: Option<String>,
    pub annotation_type: AnnotationType,
    pub location: Location,
    /// Existing records, already in display order
    pub records: Vec<AnnotationRecord>,
}

/// Handle to one annotation thread
///
/// Clones share the same thread.
#[derive(Clone)]
pub struct AnnotationThread {
    shared: Arc<Shared>,
}

struct Shared {
    thread_id: String,
    instance: Uuid,
    file_version_id: String,
    location: Location,
    service: Arc<dyn AnnotationService>,
    view: Arc<dyn ThreadView>,
    events: mpsc::UnboundedSender<ThreadEvent>,
    inner: Mutex<ThreadInner>,
}

struct ThreadInner {
    annotation_type: AnnotationType,
    thread_number: Option<String>,
    records: Vec<AnnotationRecord>,
    /// Ids of optimistic records still waiting for the server
    pending_ids: HashSet<String>,
    state: ThreadState,
    destroyed: bool,
}

/// View update decided while removing a record
enum Teardown {
    CancelFirstComment,
    Destroy,
    RemoveOne,
}

impl ThreadInner {
    /// A highlight whose only record carries no comment
    fn is_plain_highlight(&self) -> bool {
        self.annotation_type.is_highlight()
            && self.records.len() == 1
            && self.records[0].is_blank()
    }
}

impl AnnotationThread {
    pub fn new(
        params: ThreadParams,
        service: Arc<dyn AnnotationService>,
        view: Arc<dyn ThreadView>,
        events: mpsc::UnboundedSender<ThreadEvent>,
    ) -> Self {
        let state = if params.records.is_empty() {
            ThreadState::Pending
        } else {
            ThreadState::Inactive
        };
        let thread_number = params.thread_number.or_else(|| {
            params
                .records
                .iter()
                .find_map(|record| record.thread_number.clone())
        });

        Self {
            shared: Arc::new(Shared {
                thread_id: params
                    .thread_id
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                instance: Uuid::new_v4(),
                file_version_id: params.file_version_id,
                location: params.location,
                service,
                view,
                events,
                inner: Mutex::new(ThreadInner {
                    annotation_type: params.annotation_type,
                    thread_number,
                    records: params.records,
                    pending_ids: HashSet::new(),
                    state,
                    destroyed: false,
                }),
            }),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.shared.thread_id
    }

    pub(crate) fn instance(&self) -> Uuid {
        self.shared.instance
    }

    pub fn location(&self) -> &Location {
        &self.shared.location
    }

    pub fn page(&self) -> u32 {
        self.shared.location.page()
    }

    pub fn kind(&self) -> ThreadKind {
        self.shared.inner.lock().annotation_type.into()
    }

    pub fn annotation_type(&self) -> AnnotationType {
        self.shared.inner.lock().annotation_type
    }

    pub fn thread_number(&self) -> Option<String> {
        self.shared.inner.lock().thread_number.clone()
    }

    pub fn state(&self) -> ThreadState {
        self.shared.inner.lock().state
    }

    /// Move between UI-driven states
    pub fn set_state(&self, state: ThreadState) {
        self.shared.inner.lock().state = state;
    }

    /// Return to the idle state
    pub fn reset(&self) {
        self.set_state(ThreadState::Inactive);
    }

    /// Snapshot of the records in display order
    pub fn records(&self) -> Vec<AnnotationRecord> {
        self.shared.inner.lock().records.clone()
    }

    pub fn record_count(&self) -> usize {
        self.shared.inner.lock().records.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().destroyed
    }

    pub fn is_plain_highlight(&self) -> bool {
        self.shared.inner.lock().is_plain_highlight()
    }

    pub fn show(&self) {
        self.shared.view.show();
    }

    pub fn hide(&self) {
        self.shared.view.hide();
    }

    /// Add an annotation optimistically and return the server half
    ///
    /// The temporary record is visible as soon as this returns. The future
    /// resolves to the confirmed record; on failure the temporary record has
    /// been removed again. Must be called inside a tokio runtime.
    pub fn save_annotation(
        &self,
        annotation_type: AnnotationType,
        text: &str,
    ) -> BoxFuture<'static, Result<AnnotationRecord, ThreadError>> {
        let (draft, temp) = {
            let mut inner = self.shared.inner.lock();
            if inner.annotation_type.is_highlight() && annotation_type.is_highlight() {
                inner.annotation_type = annotation_type;
            }

            let draft = AnnotationDraft {
                file_version_id: self.shared.file_version_id.clone(),
                annotation_type,
                text: text.to_string(),
                location: self.shared.location.clone(),
                thread_id: self.shared.thread_id.clone(),
                thread_number: inner.thread_number.clone(),
            };
            let temp = AnnotationRecord::temporary(&draft, self.shared.service.current_user());
            inner.records.push(temp.clone());
            inner.pending_ids.insert(temp.id.clone());
            inner.state = ThreadState::Hover;
            (draft, temp)
        };

        tracing::debug!(thread_id = %self.shared.thread_id, temp_id = %temp.id, "Saving annotation");
        self.shared.view.add_annotation(&temp);

        let thread = self.clone();
        spawn_server_half(async move {
            match thread.shared.service.create(&draft).await {
                Ok(saved) => {
                    thread.reconcile(&temp.id, &saved);
                    Ok(saved)
                }
                Err(e) => {
                    tracing::warn!(thread_id = %thread.shared.thread_id, "Failed to save annotation: {}", e);
                    thread.shared.inner.lock().pending_ids.remove(&temp.id);
                    if let Err(e) = thread.remove_record(&temp.id) {
                        tracing::debug!("Temporary record could not be removed: {}", e);
                    }
                    thread.emit(ThreadEventKind::CreateFailed);
                    Err(ThreadError::from(e))
                }
            }
        })
    }

    /// Swap a temporary record for its confirmed version
    fn reconcile(&self, temp_id: &str, saved: &AnnotationRecord) {
        let (replaced, destroyed) = {
            let mut inner = self.shared.inner.lock();
            inner.pending_ids.remove(temp_id);
            if inner.thread_number.is_none() {
                inner.thread_number = saved.thread_number.clone();
            }

            let replaced = match inner.records.iter().position(|r| r.id == temp_id) {
                Some(index) => {
                    inner.records[index] = saved.clone();
                    true
                }
                None => {
                    if !inner.records.iter().any(|r| r.id == saved.id) {
                        inner.records.push(saved.clone());
                    }
                    false
                }
            };
            (replaced, inner.destroyed)
        };

        if destroyed {
            return;
        }
        if replaced {
            self.shared.view.remove_annotation(temp_id);
        }
        self.shared.view.add_annotation(saved);
    }

    /// Remove an annotation locally and return the server half
    ///
    /// A missing id resolves immediately. A record the user may not delete is
    /// refused before anything changes.
    pub fn delete_annotation(
        &self,
        annotation_id: &str,
        use_server: bool,
    ) -> BoxFuture<'static, Result<(), ThreadError>> {
        match self.remove_record(annotation_id) {
            Ok(true) => {}
            Ok(false) => return future::ready(Ok(())).boxed(),
            Err(e) => return future::ready(Err(e)).boxed(),
        }

        if !use_server {
            return future::ready(Ok(())).boxed();
        }

        let thread = self.clone();
        let annotation_id = annotation_id.to_string();
        spawn_server_half(async move {
            if let Err(e) = thread.shared.service.delete(&annotation_id).await {
                tracing::warn!(
                    thread_id = %thread.shared.thread_id,
                    "Failed to delete annotation {}: {}",
                    annotation_id,
                    e
                );
                thread.emit(ThreadEventKind::DeleteFailed);
                return Err(ThreadError::from(e));
            }

            thread.delete_blank_highlight().await;

            let empty = thread.shared.inner.lock().records.is_empty();
            if empty {
                thread.emit(ThreadEventKind::Cleanup);
            }
            Ok(())
        })
    }

    /// Local half of a delete; `Ok(false)` when the id is unknown
    fn remove_record(&self, annotation_id: &str) -> Result<bool, ThreadError> {
        let teardown = {
            let mut inner = self.shared.inner.lock();
            let index = match inner.records.iter().position(|r| r.id == annotation_id) {
                Some(index) => index,
                None => return Ok(false),
            };
            if !inner.records[index].permissions.can_delete {
                return Err(ThreadError::PermissionDenied(annotation_id.to_string()));
            }

            inner.records.remove(index);
            inner.pending_ids.remove(annotation_id);

            if inner.is_plain_highlight() && !inner.records[0].permissions.can_delete {
                inner.annotation_type = AnnotationType::Highlight;
                inner.state = ThreadState::Inactive;
                Teardown::CancelFirstComment
            } else if inner.records.is_empty() || inner.is_plain_highlight() {
                Teardown::Destroy
            } else {
                Teardown::RemoveOne
            }
        };

        match teardown {
            Teardown::CancelFirstComment => self.shared.view.cancel_first_comment(),
            Teardown::Destroy => self.destroy(),
            Teardown::RemoveOne => self.shared.view.remove_annotation(annotation_id),
        }
        Ok(true)
    }

    /// Delete the blank record left behind once a highlight loses its last comment
    async fn delete_blank_highlight(&self) {
        let blank_id = {
            let inner = self.shared.inner.lock();
            if inner.is_plain_highlight() && inner.records[0].permissions.can_delete {
                Some(inner.records[0].id.clone())
            } else {
                None
            }
        };

        if let Some(blank_id) = blank_id {
            match self.shared.service.delete(&blank_id).await {
                Ok(()) => {
                    self.shared.inner.lock().records.retain(|r| r.id != blank_id);
                }
                Err(e) => tracing::warn!(
                    thread_id = %self.shared.thread_id,
                    "Failed to delete blank highlight {}: {}",
                    blank_id,
                    e
                ),
            }
        }
    }

    /// Destroy the thread if it is still pending with nothing confirmed
    pub fn cancel(&self) -> bool {
        let cancelable = {
            let inner = self.shared.inner.lock();
            inner.state.is_pending()
                && inner
                    .records
                    .iter()
                    .all(|record| inner.pending_ids.contains(&record.id))
        };

        if cancelable {
            self.destroy();
        }
        cancelable
    }

    /// Tear the thread down; later calls do nothing
    pub fn destroy(&self) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
        }

        tracing::debug!(thread_id = %self.shared.thread_id, "Destroying thread");
        self.shared.view.destroy();
        self.emit(ThreadEventKind::Deleted);
    }

    fn emit(&self, kind: ThreadEventKind) {
        let event = ThreadEvent {
            thread_id: self.shared.thread_id.clone(),
            kind,
            instance: self.shared.instance,
        };
        if self.shared.events.send(event).is_err() {
            tracing::debug!(thread_id = %self.shared.thread_id, "Thread event dropped, registry is gone");
        }
    }
}

/// Run the server half of a write as its own task
fn spawn_server_half<T, F>(task: F) -> BoxFuture<'static, Result<T, ThreadError>>
where
    T: Send + 'static,
    F: Future<Output = Result<T, ThreadError>> + Send + 'static,
{
    let handle = tokio::spawn(task);
    async move {
        handle
            .await
            .unwrap_or_else(|e| Err(ThreadError::Interrupted(e.to_string())))
    }
    .boxed()
}

impl std::fmt::Debug for AnnotationThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("AnnotationThread")
            .field("thread_id", &self.shared.thread_id)
            .field("annotation_type", &inner.annotation_type)
            .field("state", &inner.state)
            .field("records", &inner.records.len())
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}
