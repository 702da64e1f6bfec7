//! Events a thread sends to its registry

use uuid::Uuid;

/// What happened to a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadEventKind {
    /// The thread was torn down and should leave its page
    Deleted,
    /// A server delete finished and no records remain
    Cleanup,
    /// Saving an annotation failed; the optimistic record was dropped
    CreateFailed,
    /// Deleting an annotation on the server failed
    DeleteFailed,
}

/// Event sent on the registry's thread channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEvent {
    pub thread_id: String,
    pub kind: ThreadEventKind,
    /// Distinguishes thread objects that share a thread id across refetches
    pub(crate) instance: Uuid,
}
