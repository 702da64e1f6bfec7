//! Page-indexed thread registry
//!
//! The registry is the viewer's entry point: it builds threads from the
//! service's thread map, keeps at most one pending thread across the document,
//! and applies the events threads send back about their own teardown.

mod notice;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::annotations::{AnnotationType, Location};
use crate::config::AnnotatorConfig;
use crate::error::{ErrorReason, Result};
use crate::service::{AnnotationErrorEvent, AnnotationService};
use crate::thread::{
    AnnotationThread, ThreadEvent, ThreadEventKind, ThreadKind, ThreadParams, ThreadViewFactory,
};

pub use notice::AnnotatorNotice;

/// Outcome of a fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Threads now in the registry
    pub threads: usize,
    /// Thread groups left out by type or validation
    pub skipped: usize,
    /// Set the first time a fetch finds invalid data
    pub notice: Option<AnnotatorNotice>,
}

/// Owns the page to thread mapping
pub struct ThreadRegistry {
    config: AnnotatorConfig,
    service: Arc<dyn AnnotationService>,
    views: Arc<dyn ThreadViewFactory>,
    threads: BTreeMap<u32, Vec<AnnotationThread>>,
    /// Thread instances whose events are still applied
    attached: HashSet<Uuid>,
    events_tx: mpsc::UnboundedSender<ThreadEvent>,
    events_rx: mpsc::UnboundedReceiver<ThreadEvent>,
    validation_reported: bool,
}

impl ThreadRegistry {
    pub fn new(
        config: AnnotatorConfig,
        service: Arc<dyn AnnotationService>,
        views: Arc<dyn ThreadViewFactory>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            service,
            views,
            threads: BTreeMap::new(),
            attached: HashSet::new(),
            events_tx,
            events_rx,
            validation_reported: false,
        }
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    /// Whether threads of this type are built and rendered
    pub fn is_type_annotatable(&self, annotation_type: AnnotationType) -> bool {
        match &self.config.annotatable_types {
            Some(types) => types.contains(&annotation_type),
            None => true,
        }
    }

    /// Replace every thread with freshly fetched server state
    ///
    /// The new map is built completely before it is swapped in; on error the
    /// current threads stay untouched.
    pub async fn fetch_annotations(&mut self) -> Result<FetchSummary> {
        let permissions = self.config.permissions;
        if !permissions.can_view_all && !permissions.can_view_own {
            tracing::info!("User cannot view annotations, skipping fetch");
            self.replace_threads(BTreeMap::new(), HashSet::new());
            return Ok(FetchSummary::default());
        }

        let file_version_id = self.config.file_version_id.clone();
        let thread_map = self.service.get_thread_map(&file_version_id).await?;

        let mut threads: BTreeMap<u32, Vec<AnnotationThread>> = BTreeMap::new();
        let mut attached = HashSet::new();
        let mut summary = FetchSummary::default();
        let mut invalid = false;

        for (thread_id, records) in thread_map {
            let (annotation_type, location, thread_number) = match records.first() {
                Some(first) => (
                    first.annotation_type,
                    first.location.clone(),
                    first.thread_number.clone(),
                ),
                None => continue,
            };

            if !self.is_type_annotatable(annotation_type) {
                summary.skipped += 1;
                continue;
            }
            if !location.is_valid() {
                tracing::warn!(thread_id = %thread_id, "Skipping thread with invalid location");
                invalid = true;
                summary.skipped += 1;
                continue;
            }

            let thread = self.build_thread(ThreadParams {
                file_version_id: file_version_id.clone(),
                thread_id: Some(thread_id),
                thread_number,
                annotation_type,
                location,
                records,
            });
            attached.insert(thread.instance());
            threads.entry(thread.page()).or_default().push(thread);
            summary.threads += 1;
        }

        if invalid && !self.validation_reported {
            self.validation_reported = true;
            summary.notice = Some(AnnotatorNotice::LoadFailed);
        }

        tracing::info!(
            file_version_id = %file_version_id,
            threads = summary.threads,
            skipped = summary.skipped,
            "Fetched annotations"
        );
        self.replace_threads(threads, attached);
        Ok(summary)
    }

    fn replace_threads(
        &mut self,
        threads: BTreeMap<u32, Vec<AnnotationThread>>,
        attached: HashSet<Uuid>,
    ) {
        let old = std::mem::replace(&mut self.threads, threads);
        self.attached = attached;
        for thread in old.into_values().flatten() {
            thread.destroy();
        }
    }

    fn build_thread(&self, params: ThreadParams) -> AnnotationThread {
        let kind = ThreadKind::from(params.annotation_type);
        let view = self.views.create_view(kind, &params.location);
        AnnotationThread::new(params, self.service.clone(), view, self.events_tx.clone())
    }

    /// Start a new pending thread at `location`
    ///
    /// Returns `None` when the user cannot annotate, the type is not
    /// annotatable, or the location is not an object.
    pub fn create_thread(
        &mut self,
        annotation_type: AnnotationType,
        location: Location,
    ) -> Option<AnnotationThread> {
        if !self.config.permissions.can_annotate
            || !self.is_type_annotatable(annotation_type)
            || !location.is_valid()
        {
            return None;
        }

        let thread = self.build_thread(ThreadParams {
            file_version_id: self.config.file_version_id.clone(),
            thread_id: None,
            thread_number: None,
            annotation_type,
            location,
            records: Vec::new(),
        });
        self.attached.insert(thread.instance());
        self.threads
            .entry(thread.page())
            .or_default()
            .push(thread.clone());

        tracing::debug!(thread_id = %thread.thread_id(), page = thread.page(), "Created thread");
        Some(thread)
    }

    /// Start a point thread, first destroying any pending thread
    pub fn create_point_thread(&mut self, location: Location) -> Option<AnnotationThread> {
        if !self.config.permissions.can_annotate
            || !self.is_type_annotatable(AnnotationType::Point)
        {
            return None;
        }

        self.destroy_pending_threads();
        self.create_thread(AnnotationType::Point, location)
    }

    /// Destroy every pending thread on every page
    pub fn destroy_pending_threads(&mut self) -> bool {
        let mut destroyed = false;
        for threads in self.threads.values_mut() {
            threads.retain(|thread| {
                if thread.state().is_pending() {
                    thread.destroy();
                    destroyed = true;
                    false
                } else {
                    true
                }
            });
        }
        self.threads.retain(|_, threads| !threads.is_empty());
        destroyed
    }

    pub fn threads_on_page(&self, page: u32) -> &[AnnotationThread] {
        self.threads.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pages that have at least one thread, ascending
    pub fn pages(&self) -> Vec<u32> {
        self.threads.keys().copied().collect()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.values().map(Vec::len).sum()
    }

    pub fn find_thread(&self, thread_id: &str) -> Option<&AnnotationThread> {
        self.threads
            .values()
            .flatten()
            .find(|thread| thread.thread_id() == thread_id)
    }

    pub fn render_annotations(&self) {
        for page in self.threads.keys() {
            self.render_page(*page);
        }
    }

    pub fn render_page(&self, page: u32) {
        for thread in self.threads_on_page(page) {
            if self.is_type_annotatable(thread.annotation_type()) {
                thread.show();
            }
        }
    }

    pub fn hide_annotations(&self) {
        for page in self.threads.keys() {
            self.hide_page(*page);
        }
    }

    pub fn hide_page(&self, page: u32) {
        for thread in self.threads_on_page(page) {
            thread.hide();
        }
    }

    /// Apply queued thread events, returning the ones that were applied
    ///
    /// Events from threads replaced by a later fetch are dropped, as are
    /// events a deleted thread sends after the batch that removed it.
    pub fn process_events(&mut self) -> Vec<ThreadEvent> {
        let mut applied = Vec::new();
        let mut deleted = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            if !self.attached.contains(&event.instance) {
                tracing::debug!(thread_id = %event.thread_id, "Ignoring event from detached thread");
                continue;
            }

            match event.kind {
                ThreadEventKind::Deleted => {
                    self.remove_thread(event.instance);
                    deleted.push(event.instance);
                }
                ThreadEventKind::Cleanup => {
                    self.remove_thread(event.instance);
                    self.attached.remove(&event.instance);
                }
                ThreadEventKind::CreateFailed | ThreadEventKind::DeleteFailed => {}
            }
            applied.push(event);
        }

        for instance in deleted {
            self.attached.remove(&instance);
        }
        applied
    }

    fn remove_thread(&mut self, instance: Uuid) {
        for threads in self.threads.values_mut() {
            threads.retain(|thread| thread.instance() != instance);
        }
        self.threads.retain(|_, threads| !threads.is_empty());
    }

    /// Turn a service error into a notice for the user
    ///
    /// Failed creates and deletes leave local state out of step with the
    /// server, so both trigger a refetch and re-render.
    pub async fn handle_service_error(&mut self, event: &AnnotationErrorEvent) -> AnnotatorNotice {
        let notice = AnnotatorNotice::from(event.reason);
        tracing::warn!(reason = %event.reason, "Annotation service error: {}", event.error);

        if matches!(event.reason, ErrorReason::Create | ErrorReason::Delete) {
            match self.fetch_annotations().await {
                Ok(_) => self.render_annotations(),
                Err(e) => tracing::warn!("Failed to refetch annotations: {}", e),
            }
        }
        notice
    }

    /// Destroy every thread
    pub fn destroy(&mut self) {
        self.replace_threads(BTreeMap::new(), HashSet::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::AnnotationRecord;
    use crate::config::{AnnotatorPermissions, ClientConfig};
    use crate::service::HttpAnnotationService;
    use crate::testing::{
        api_entry, blank_highlight, comment, record_at, MockApi, RecordingViewFactory, StubService,
    };
    use serde_json::json;

    fn on_page(mut record: AnnotationRecord, page: u32) -> AnnotationRecord {
        record.location = Location::new(json!({ "page": page, "x": 1, "y": 1 }));
        record
    }

    fn seeded() -> Vec<AnnotationRecord> {
        vec![
            on_page(record_at("a1", "thread-a", "2016-10-30T00:00:00Z"), 1),
            on_page(record_at("a2", "thread-a", "2016-10-31T00:00:00Z"), 1),
            on_page(record_at("b1", "thread-b", "2016-10-29T00:00:00Z"), 2),
            on_page(comment("c1", "thread-c", "note", true), 2),
        ]
    }

    fn registry_with(
        config: AnnotatorConfig,
        records: Vec<AnnotationRecord>,
    ) -> (ThreadRegistry, Arc<StubService>, Arc<RecordingViewFactory>) {
        let service = Arc::new(StubService::with_records(records));
        let views = Arc::new(RecordingViewFactory::default());
        let registry = ThreadRegistry::new(config, service.clone(), views.clone());
        (registry, service, views)
    }

    fn annotating() -> AnnotatorConfig {
        let mut config = AnnotatorConfig::new("1");
        config.permissions.can_annotate = true;
        config
    }

    #[tokio::test]
    async fn test_fetch_builds_threads_by_page() {
        let (mut registry, _, views) = registry_with(AnnotatorConfig::new("1"), seeded());

        let summary = registry.fetch_annotations().await.unwrap();

        assert_eq!(summary.threads, 3);
        assert_eq!(summary.notice, None);
        assert_eq!(registry.pages(), vec![1, 2]);
        assert_eq!(registry.threads_on_page(1).len(), 1);
        assert_eq!(registry.threads_on_page(2).len(), 2);
        assert!(registry.threads_on_page(3).is_empty());

        let thread_a = registry.find_thread("thread-a").unwrap();
        let ids: Vec<_> = thread_a.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a1".to_string(), "a2".to_string()]);

        let kinds: Vec<_> = views.views().into_iter().map(|(kind, _)| kind).collect();
        assert!(kinds.contains(&ThreadKind::Highlight));
        assert!(kinds.contains(&ThreadKind::Point));
    }

    #[tokio::test]
    async fn test_fetch_skipped_without_view_permission() {
        let mut config = AnnotatorConfig::new("1");
        config.permissions = AnnotatorPermissions {
            can_annotate: true,
            can_view_all: false,
            can_view_own: false,
        };
        let (mut registry, service, _) = registry_with(config, seeded());

        let summary = registry.fetch_annotations().await.unwrap();

        assert_eq!(summary, FetchSummary::default());
        assert_eq!(service.read_count(), 0);
        assert_eq!(registry.thread_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_respects_annotatable_types() {
        let mut config = AnnotatorConfig::new("1");
        config.annotatable_types = Some(vec![AnnotationType::Point]);
        let (mut registry, _, _) = registry_with(config, seeded());

        let summary = registry.fetch_annotations().await.unwrap();

        assert_eq!(summary.threads, 2);
        assert_eq!(summary.skipped, 1);
        assert!(registry.find_thread("thread-c").is_none());
    }

    #[tokio::test]
    async fn test_invalid_location_reported_once() {
        let mut broken = record_at("x1", "thread-x", "2016-10-30T00:00:00Z");
        broken.location = Location::new(json!("not an object"));
        let mut records = seeded();
        records.push(broken);
        let (mut registry, _, _) = registry_with(AnnotatorConfig::new("1"), records);

        let first = registry.fetch_annotations().await.unwrap();
        assert_eq!(first.notice, Some(AnnotatorNotice::LoadFailed));
        assert_eq!(first.skipped, 1);
        assert!(registry.find_thread("thread-x").is_none());

        let second = registry.fetch_annotations().await.unwrap();
        assert_eq!(second.notice, None);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_threads() {
        let (mut registry, service, _) = registry_with(AnnotatorConfig::new("1"), seeded());
        registry.fetch_annotations().await.unwrap();

        service.set_fail_read(true);
        assert!(registry.fetch_annotations().await.is_err());

        assert_eq!(registry.thread_count(), 3);
        assert!(!registry.find_thread("thread-a").unwrap().is_destroyed());
    }

    #[tokio::test]
    async fn test_refetch_swaps_threads_and_drops_stale_events() {
        let (mut registry, service, _) = registry_with(AnnotatorConfig::new("1"), seeded());
        registry.fetch_annotations().await.unwrap();
        let old = registry.find_thread("thread-a").unwrap().clone();

        service.set_records(vec![on_page(
            record_at("d1", "thread-d", "2016-10-30T00:00:00Z"),
            4,
        )]);
        registry.fetch_annotations().await.unwrap();

        assert!(old.is_destroyed());
        assert_eq!(registry.pages(), vec![4]);
        assert!(registry.process_events().is_empty());
        assert_eq!(registry.thread_count(), 1);
    }

    #[test]
    fn test_create_point_thread_requires_permission() {
        let (mut registry, _, _) = registry_with(AnnotatorConfig::new("1"), vec![]);
        assert!(registry
            .create_point_thread(Location::new(json!({ "page": 1, "x": 1, "y": 1 })))
            .is_none());

        let mut config = annotating();
        config.annotatable_types = Some(vec![AnnotationType::Highlight]);
        let (mut registry, _, _) = registry_with(config, vec![]);
        assert!(registry
            .create_point_thread(Location::new(json!({ "page": 1 })))
            .is_none());
    }

    #[test]
    fn test_at_most_one_pending_thread() {
        let (mut registry, _, _) = registry_with(annotating(), vec![]);

        let first = registry
            .create_point_thread(Location::new(json!({ "page": 1, "x": 1, "y": 1 })))
            .unwrap();
        let second = registry
            .create_point_thread(Location::new(json!({ "page": 3, "x": 5, "y": 5 })))
            .unwrap();

        assert!(first.is_destroyed());
        assert!(!second.is_destroyed());
        assert_eq!(registry.pages(), vec![3]);

        let pending = registry
            .pages()
            .into_iter()
            .flat_map(|page| registry.threads_on_page(page).to_vec())
            .filter(|thread| thread.state().is_pending())
            .count();
        assert_eq!(pending, 1);

        // The first thread's teardown event arrives after it already left the map
        let events = registry.process_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ThreadEventKind::Deleted);
        assert_eq!(registry.thread_count(), 1);
        assert!(!registry.attached.contains(&first.instance()));
        assert_eq!(registry.attached.len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_thread_is_detached() {
        let (mut registry, service, _) = registry_with(AnnotatorConfig::new("1"), seeded());
        registry.fetch_annotations().await.unwrap();
        let local = registry.find_thread("thread-a").unwrap().clone();
        let remote = registry.find_thread("thread-b").unwrap().clone();

        local.delete_annotation("a1", false).await.unwrap();
        local.delete_annotation("a2", false).await.unwrap();
        service.set_fail_delete(true);
        let delete = remote.delete_annotation("b1", true);

        let kinds: Vec<_> = registry.process_events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ThreadEventKind::Deleted, ThreadEventKind::Deleted]);
        assert!(!registry.attached.contains(&local.instance()));
        assert!(!registry.attached.contains(&remote.instance()));
        assert_eq!(registry.attached.len(), 1);

        // The failure arrives after its thread already left the registry
        assert!(delete.await.is_err());
        assert!(registry.process_events().is_empty());
        assert_eq!(registry.thread_count(), 1);
    }

    #[tokio::test]
    async fn test_saved_thread_is_not_pending() {
        let (mut registry, _, _) = registry_with(annotating(), vec![]);
        let thread = registry
            .create_point_thread(Location::new(json!({ "page": 1 })))
            .unwrap();
        thread
            .save_annotation(AnnotationType::Point, "hi")
            .await
            .unwrap();

        assert!(!registry.destroy_pending_threads());
        assert_eq!(registry.thread_count(), 1);
    }

    #[tokio::test]
    async fn test_deleted_thread_leaves_page() {
        let (mut registry, service, _) = registry_with(AnnotatorConfig::new("1"), seeded());
        registry.fetch_annotations().await.unwrap();
        let thread = registry.find_thread("thread-b").unwrap().clone();

        thread.delete_annotation("b1", true).await.unwrap();
        let events = registry.process_events();

        let kinds: Vec<_> = events.iter().map(|event| event.kind).collect();
        assert_eq!(kinds, vec![ThreadEventKind::Deleted, ThreadEventKind::Cleanup]);
        assert!(registry.find_thread("thread-b").is_none());
        assert_eq!(registry.threads_on_page(2).len(), 1);
        assert_eq!(service.deleted(), vec!["b1".to_string()]);
        assert!(!registry.attached.contains(&thread.instance()));
    }

    #[tokio::test]
    async fn test_plain_highlight_cascade_through_registry() {
        let records = vec![
            on_page(blank_highlight("h0", "thread-h", true), 1),
            on_page(comment("h1", "thread-h", "note", true), 1),
        ];
        let (mut registry, service, _) = registry_with(AnnotatorConfig::new("1"), records);
        registry.fetch_annotations().await.unwrap();
        let thread = registry.find_thread("thread-h").unwrap().clone();

        thread.delete_annotation("h1", true).await.unwrap();
        registry.process_events();

        assert_eq!(service.deleted(), vec!["h1".to_string(), "h0".to_string()]);
        assert_eq!(registry.thread_count(), 0);
    }

    #[tokio::test]
    async fn test_render_and_hide_pages() {
        let (mut registry, _, views) = registry_with(AnnotatorConfig::new("1"), seeded());
        registry.fetch_annotations().await.unwrap();

        registry.render_page(1);
        registry.hide_annotations();

        let thread_a_view = &views.views()[0].1;
        assert_eq!(thread_a_view.calls(), vec!["show".to_string(), "hide".to_string()]);
        for (_, view) in views.views().iter().skip(1) {
            assert_eq!(view.calls(), vec!["hide".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_handle_service_error() {
        let (mut registry, service, _) = registry_with(AnnotatorConfig::new("1"), seeded());

        let notice = registry
            .handle_service_error(&AnnotationErrorEvent {
                reason: ErrorReason::Read,
                error: "bad page".to_string(),
            })
            .await;
        assert_eq!(notice, AnnotatorNotice::LoadFailed);
        assert_eq!(service.read_count(), 0);

        let notice = registry
            .handle_service_error(&AnnotationErrorEvent {
                reason: ErrorReason::Create,
                error: "offline".to_string(),
            })
            .await;
        assert_eq!(notice, AnnotatorNotice::CreateFailed);
        assert_eq!(service.read_count(), 1);
        assert_eq!(registry.thread_count(), 3);

        let notice = registry
            .handle_service_error(&AnnotationErrorEvent {
                reason: ErrorReason::Authorization,
                error: "expired".to_string(),
            })
            .await;
        assert_eq!(notice, AnnotatorNotice::AuthorizationFailed);
        assert_eq!(service.read_count(), 1);

        let notice = registry
            .handle_service_error(&AnnotationErrorEvent {
                reason: ErrorReason::Update,
                error: "annotation missing".to_string(),
            })
            .await;
        assert_eq!(notice, AnnotatorNotice::UpdateFailed);
        assert_eq!(service.read_count(), 1);
    }

    #[tokio::test]
    async fn test_entry_without_location_is_skipped() {
        let api = MockApi::start().await;
        let mut unanchored = api_entry("x1", "thread-x", "2016-10-30T10:00:00Z");
        unanchored["details"]
            .as_object_mut()
            .unwrap()
            .remove("location");
        api.set_page(
            None,
            json!({ "entries": [api_entry("a1", "thread-a", "2016-10-30T09:00:00Z"), unanchored] }),
        );
        let mut client = ClientConfig::new(&api.base_url, "file-1");
        client.token = Some("secret".to_string());
        let service = Arc::new(HttpAnnotationService::new(&client).unwrap());
        let mut registry = ThreadRegistry::new(
            AnnotatorConfig::new("1"),
            service,
            Arc::new(RecordingViewFactory::default()),
        );

        let summary = registry.fetch_annotations().await.unwrap();

        assert_eq!(summary.threads, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.notice, Some(AnnotatorNotice::LoadFailed));
        assert!(registry.find_thread("thread-x").is_none());
        assert!(registry.find_thread("thread-a").is_some());
    }

    #[tokio::test]
    async fn test_destroy_clears_everything() {
        let (mut registry, _, _) = registry_with(AnnotatorConfig::new("1"), seeded());
        registry.fetch_annotations().await.unwrap();
        let thread = registry.find_thread("thread-a").unwrap().clone();

        registry.destroy();

        assert!(thread.is_destroyed());
        assert_eq!(registry.thread_count(), 0);
        assert!(registry.process_events().is_empty());
    }
}
