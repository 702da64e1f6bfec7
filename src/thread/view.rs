//! Rendering hooks for threads
//!
//! Indicators, dialogs and geometry belong to the viewer. A thread only tells
//! its view what changed; every hook defaults to doing nothing.

use std::sync::Arc;

use super::state::ThreadKind;
use crate::annotations::{AnnotationRecord, Location};

/// Viewer-side presentation of one thread
pub trait ThreadView: Send + Sync {
    fn show(&self) {}

    fn hide(&self) {}

    fn add_annotation(&self, _record: &AnnotationRecord) {}

    fn remove_annotation(&self, _annotation_id: &str) {}

    /// Fall back to a plain highlight after its only comment was removed
    fn cancel_first_comment(&self) {}

    /// Tear down everything rendered for the thread
    fn destroy(&self) {}
}

/// Builds a view for each thread the registry creates
pub trait ThreadViewFactory: Send + Sync {
    fn create_view(&self, kind: ThreadKind, location: &Location) -> Arc<dyn ThreadView>;
}

/// View that renders nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopView;

impl ThreadView for NoopView {}

/// Factory producing [`NoopView`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopViewFactory;

impl ThreadViewFactory for NoopViewFactory {
    fn create_view(&self, _kind: ThreadKind, _location: &Location) -> Arc<dyn ThreadView> {
        Arc::new(NoopView)
    }
}
