//! SQLite storage for annotations
//!
//! Backs the local annotation service with CRUD operations on SQLite.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::types::{AnnotationRecord, AnnotationType, AnnotationUser, Location, Permissions};

/// Repository for annotation persistence
pub struct AnnotationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AnnotationRepository<'a> {
    /// Create a new repository
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the annotations table
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS annotations (
                id TEXT PRIMARY KEY,
                file_version_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                thread_number TEXT,
                annotation_type TEXT NOT NULL,
                message TEXT NOT NULL,
                location_json TEXT NOT NULL,
                author_json TEXT NOT NULL,
                permissions_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_annotations_version ON annotations(file_version_id);
            CREATE INDEX IF NOT EXISTS idx_annotations_thread ON annotations(thread_id);
            "#,
        )
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Save an annotation (insert or update)
    pub async fn save(&self, record: &AnnotationRecord) -> Result<()> {
        let location_json = serde_json::to_string(&record.location)?;
        let author_json = serde_json::to_string(&record.author)?;
        let permissions_json = serde_json::to_string(&record.permissions)?;

        sqlx::query(
            r#"
            INSERT INTO annotations (
                id, file_version_id, thread_id, thread_number, annotation_type,
                message, location_json, author_json, permissions_json,
                created_at, modified_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                thread_number = excluded.thread_number,
                annotation_type = excluded.annotation_type,
                message = excluded.message,
                location_json = excluded.location_json,
                permissions_json = excluded.permissions_json,
                modified_at = excluded.modified_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.file_version_id)
        .bind(&record.thread_id)
        .bind(&record.thread_number)
        .bind(record.annotation_type.as_str())
        .bind(&record.text)
        .bind(&location_json)
        .bind(&author_json)
        .bind(&permissions_json)
        .bind(timestamp(&record.created_at))
        .bind(timestamp(&record.modified_at))
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Get an annotation by ID
    pub async fn get(&self, id: &str) -> Result<Option<AnnotationRecord>> {
        let row = sqlx::query_as::<_, AnnotationRow>(
            r#"
            SELECT id, file_version_id, thread_id, thread_number, annotation_type,
                   message, location_json, author_json, permissions_json,
                   created_at, modified_at
            FROM annotations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_record()).transpose()
    }

    /// List annotations on a file version, oldest first
    pub async fn list_for_version(&self, file_version_id: &str) -> Result<Vec<AnnotationRecord>> {
        let rows = sqlx::query_as::<_, AnnotationRow>(
            r#"
            SELECT id, file_version_id, thread_id, thread_number, annotation_type,
                   message, location_json, author_json, permissions_json,
                   created_at, modified_at
            FROM annotations
            WHERE file_version_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(file_version_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_record()).collect()
    }

    /// Thread number already assigned to a thread, if any
    pub async fn thread_number_for(&self, thread_id: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            SELECT thread_number FROM annotations
            WHERE thread_id = ? AND thread_number IS NOT NULL
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(thread_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.and_then(|(number,)| number))
    }

    /// Next free thread number on a file version
    pub async fn next_thread_number(&self, file_version_id: &str) -> Result<u64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX(CAST(thread_number AS INTEGER)), 0)
            FROM annotations
            WHERE file_version_id = ?
            "#,
        )
        .bind(file_version_id)
        .fetch_one(self.pool)
        .await?;

        Ok(row.0.max(0) as u64 + 1)
    }

    /// Delete an annotation
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM annotations WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Internal row type for SQLite queries
#[derive(sqlx::FromRow)]
struct AnnotationRow {
    id: String,
    file_version_id: String,
    thread_id: String,
    thread_number: Option<String>,
    annotation_type: String,
    message: String,
    location_json: String,
    author_json: String,
    permissions_json: String,
    created_at: String,
    modified_at: String,
}

impl AnnotationRow {
    fn into_record(self) -> Result<AnnotationRecord> {
        let annotation_type: AnnotationType = self
            .annotation_type
            .parse()
            .map_err(anyhow::Error::msg)?;

        let location: Location = serde_json::from_str(&self.location_json)?;
        let author: AnnotationUser = serde_json::from_str(&self.author_json)?;
        let permissions: Permissions = serde_json::from_str(&self.permissions_json)?;

        let created_at = DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc);
        let modified_at = DateTime::parse_from_rfc3339(&self.modified_at)?.with_timezone(&Utc);

        Ok(AnnotationRecord {
            id: self.id,
            file_version_id: self.file_version_id,
            thread_id: self.thread_id,
            thread_number: self.thread_number,
            annotation_type,
            text: self.message,
            location,
            author,
            permissions,
            created_at,
            modified_at,
        })
    }
}
