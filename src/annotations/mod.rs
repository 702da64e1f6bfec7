//! Annotation module
//!
//! Value types shared by every layer of the sync engine.
//!
//! # Features
//!
//! - Annotation records as returned by the annotations API
//! - Drafts sent on create
//! - Grouping of records into threads, ordered by creation time
//! - SQLite persistence for the local backend

mod store;
mod thread_map;
mod types;

pub use store::AnnotationRepository;
pub use thread_map::{build_thread_map, ThreadMap};
pub use types::{
    AnnotationDraft, AnnotationRecord, AnnotationType, AnnotationUser, Location, Permissions,
    ANONYMOUS_USER_ID,
};
