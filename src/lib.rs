//! Annotation Sync
//!
//! Threaded document annotations kept in sync with a remote annotations API.
//!
//! # Modules
//!
//! - `annotations`: annotation records, thread grouping and the SQLite store
//! - `service`: the annotation service trait plus HTTP and local backends
//! - `thread`: the per-thread state machine with optimistic writes
//! - `registry`: page-indexed thread registry used by the viewer

pub mod annotations;
pub mod config;
pub mod error;
pub mod registry;
pub mod service;
pub mod thread;

#[cfg(test)]
pub(crate) mod testing;

pub use annotations::{
    build_thread_map, AnnotationDraft, AnnotationRecord, AnnotationType, AnnotationUser,
    Location, Permissions, ThreadMap,
};
pub use config::{AnnotatorConfig, AnnotatorPermissions, Backend, ClientConfig, Config, StoreConfig};
pub use error::{ErrorReason, Operation, Result, ServiceError, SyncError, ThreadError};
pub use registry::{AnnotatorNotice, FetchSummary, ThreadRegistry};
pub use service::{
    AnnotationErrorEvent, AnnotationService, HttpAnnotationService, LocalAnnotationService,
};
pub use thread::{
    AnnotationThread, NoopView, NoopViewFactory, ThreadEvent, ThreadEventKind, ThreadKind,
    ThreadParams, ThreadState, ThreadView, ThreadViewFactory,
};
