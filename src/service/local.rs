//! Annotation service backed by a local SQLite database

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{AnnotationErrorEvent, ErrorEvents};
use super::AnnotationService;
use crate::annotations::{
    AnnotationDraft, AnnotationRecord, AnnotationRepository, AnnotationUser, Permissions,
};
use crate::config::StoreConfig;
use crate::error::{Operation, ServiceError};

/// Offline annotation service
///
/// The current user authors every record and holds full permissions on it.
pub struct LocalAnnotationService {
    pool: SqlitePool,
    user: AnnotationUser,
    events: ErrorEvents,
}

impl LocalAnnotationService {
    /// Connect to the database and create the schema if needed
    pub async fn connect(config: &StoreConfig, user: AnnotationUser) -> crate::error::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        tracing::info!("Connected to annotation store at {}", config.url);
        Self::from_pool(pool, user).await
    }

    /// Wrap an existing pool
    pub async fn from_pool(pool: SqlitePool, user: AnnotationUser) -> crate::error::Result<Self> {
        AnnotationRepository::new(&pool).init().await?;
        Ok(Self {
            pool,
            user,
            events: ErrorEvents::new(),
        })
    }

    fn repo(&self) -> AnnotationRepository<'_> {
        AnnotationRepository::new(&self.pool)
    }

    /// Replace the text of an annotation, returning the updated record
    pub async fn update(&self, id: &str, text: &str) -> Result<AnnotationRecord, ServiceError> {
        let result = async {
            let mut record = self
                .repo()
                .get(id)
                .await
                .map_err(|e| ServiceError::data(Operation::Update, e))?
                .ok_or_else(|| {
                    ServiceError::data(Operation::Update, format!("annotation {} not found", id))
                })?;

            record.text = text.to_string();
            record.modified_at = Utc::now();
            self.repo()
                .save(&record)
                .await
                .map_err(|e| ServiceError::data(Operation::Update, e))?;
            Ok::<_, ServiceError>(record)
        }
        .await;

        self.events.report(result)
    }

    async fn insert(&self, draft: &AnnotationDraft) -> anyhow::Result<AnnotationRecord> {
        let repo = self.repo();
        let thread_number = match repo.thread_number_for(&draft.thread_id).await? {
            Some(number) => number,
            None => repo
                .next_thread_number(&draft.file_version_id)
                .await?
                .to_string(),
        };

        let now = Utc::now();
        let record = AnnotationRecord {
            id: Uuid::new_v4().to_string(),
            file_version_id: draft.file_version_id.clone(),
            thread_id: draft.thread_id.clone(),
            thread_number: Some(thread_number),
            annotation_type: draft.annotation_type,
            text: draft.text.clone(),
            location: draft.location.clone(),
            author: self.user.clone(),
            permissions: Permissions::full(),
            created_at: now,
            modified_at: now,
        };

        repo.save(&record).await?;
        Ok(record)
    }
}

#[async_trait]
impl AnnotationService for LocalAnnotationService {
    async fn create(&self, draft: &AnnotationDraft) -> Result<AnnotationRecord, ServiceError> {
        let result = self
            .insert(draft)
            .await
            .map_err(|e| ServiceError::data(Operation::Create, e));
        let record = self.events.report(result)?;

        tracing::debug!(id = %record.id, thread_id = %record.thread_id, "Stored annotation");
        Ok(record)
    }

    async fn read(&self, file_version_id: &str) -> Result<Vec<AnnotationRecord>, ServiceError> {
        let result = self
            .repo()
            .list_for_version(file_version_id)
            .await
            .map_err(|e| ServiceError::data(Operation::Read, e));
        self.events.report(result)
    }

    async fn delete(&self, annotation_id: &str) -> Result<(), ServiceError> {
        let result = match self.repo().delete(annotation_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ServiceError::data(
                Operation::Delete,
                format!("annotation {} not found", annotation_id),
            )),
            Err(e) => Err(ServiceError::data(Operation::Delete, e)),
        };
        self.events.report(result)
    }

    fn current_user(&self) -> AnnotationUser {
        self.user.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AnnotationErrorEvent> {
        self.events.subscribe()
    }
}
