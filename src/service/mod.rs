//! Annotation services
//!
//! The [`AnnotationService`] trait is the seam between the thread state
//! machine and persistence. Two backends implement it:
//!
//! - [`HttpAnnotationService`]: the REST annotations API with marker pagination
//! - [`LocalAnnotationService`]: a SQLite store for offline use and tests
//!
//! Every failure is returned to the caller and also broadcast on the
//! service's error channel, so a passive observer can surface a notice while
//! the direct caller handles its own flow.

mod events;
mod http;
mod local;
mod wire;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::annotations::{build_thread_map, AnnotationDraft, AnnotationRecord, AnnotationUser, ThreadMap};
use crate::error::ServiceError;

pub use events::{AnnotationErrorEvent, ErrorEvents};
pub use http::HttpAnnotationService;
pub use local::LocalAnnotationService;

/// CRUD access to annotations
#[async_trait]
pub trait AnnotationService: Send + Sync {
    /// Persist a draft and return the confirmed record
    async fn create(&self, draft: &AnnotationDraft) -> Result<AnnotationRecord, ServiceError>;

    /// All annotations on a file version, in the order the store returned them
    async fn read(&self, file_version_id: &str) -> Result<Vec<AnnotationRecord>, ServiceError>;

    /// Delete one annotation
    async fn delete(&self, annotation_id: &str) -> Result<(), ServiceError>;

    /// Annotations on a file version grouped by thread, oldest first
    async fn get_thread_map(&self, file_version_id: &str) -> Result<ThreadMap, ServiceError> {
        let records = self.read(file_version_id).await?;
        Ok(build_thread_map(records))
    }

    /// User attached to optimistic records
    fn current_user(&self) -> AnnotationUser;

    /// Receive every error this service reports
    fn subscribe(&self) -> broadcast::Receiver<AnnotationErrorEvent>;
}
