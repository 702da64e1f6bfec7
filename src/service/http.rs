//! Annotation service backed by the REST annotations API

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::broadcast;

use super::events::{AnnotationErrorEvent, ErrorEvents};
use super::wire::{parse_created, parse_page, AnnotationPage, CreateAnnotationBody, READ_FIELDS};
use super::AnnotationService;
use crate::annotations::{AnnotationDraft, AnnotationRecord, AnnotationUser, Permissions};
use crate::config::ClientConfig;
use crate::error::{Operation, ServiceError, SyncError};

const BOX_API: &str = "boxapi";
const CLIENT_NAME: &str = "x-box-client-name";
const CLIENT_VERSION: &str = "x-box-client-version";

/// HTTP client for the annotations API
pub struct HttpAnnotationService {
    client: Client,
    api_host: String,
    file_id: String,
    page_limit: Option<u32>,
    can_annotate: bool,
    user: RwLock<AnnotationUser>,
    events: ErrorEvents,
}

impl HttpAnnotationService {
    /// Create a new client from configuration
    pub fn new(config: &ClientConfig) -> crate::error::Result<Self> {
        let mut builder = Client::builder().default_headers(build_headers(config)?);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_host: config.api_host.trim_end_matches('/').to_string(),
            file_id: config.file_id.clone(),
            page_limit: config.page_limit,
            can_annotate: config.can_annotate,
            user: RwLock::new(config.anonymous_user.clone()),
            events: ErrorEvents::new(),
        })
    }

    fn read_url(&self, file_version_id: &str, marker: Option<&str>) -> String {
        let mut url = format!(
            "{}/2.0/files/{}/annotations?version={}&fields={}",
            self.api_host,
            urlencoding::encode(&self.file_id),
            urlencoding::encode(file_version_id),
            READ_FIELDS
        );
        if let Some(marker) = marker {
            url.push_str("&marker=");
            url.push_str(&urlencoding::encode(marker));
        }
        if let Some(limit) = self.page_limit {
            url.push_str(&format!("&limit={}", limit));
        }
        url
    }

    async fn read_page(
        &self,
        file_version_id: &str,
        marker: Option<&str>,
    ) -> Result<AnnotationPage, ServiceError> {
        let response = self
            .client
            .get(self.read_url(file_version_id, marker))
            .send()
            .await
            .map_err(|e| ServiceError::transport(Operation::Read, e))?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::data(Operation::Read, e))?;

        parse_page(data).map_err(|e| ServiceError::data(Operation::Read, e))
    }

    /// Follow `next_marker` until the last page
    async fn read_all(&self, file_version_id: &str) -> Result<Vec<AnnotationRecord>, ServiceError> {
        let mut records = Vec::new();
        let mut seen_markers = HashSet::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self.read_page(file_version_id, marker.as_deref()).await?;
            records.extend(
                page.entries
                    .into_iter()
                    .map(|entry| entry.into_record(Permissions::full())),
            );

            match page.next_marker {
                Some(next) => {
                    if !seen_markers.insert(next.clone()) {
                        return Err(ServiceError::data(
                            Operation::Read,
                            format!("page marker {} was returned twice", next),
                        ));
                    }
                    marker = Some(next);
                }
                None => break,
            }
        }

        tracing::debug!(
            file_version_id = %file_version_id,
            count = records.len(),
            pages = seen_markers.len() + 1,
            "Read annotations"
        );
        Ok(records)
    }

    async fn post_annotation(&self, draft: &AnnotationDraft) -> Result<AnnotationRecord, ServiceError> {
        if !self.can_annotate {
            return Err(ServiceError::data(
                Operation::Create,
                format!("user cannot annotate file {}", self.file_id),
            ));
        }

        let response = self
            .client
            .post(format!("{}/2.0/annotations", self.api_host))
            .json(&CreateAnnotationBody::from_draft(draft))
            .send()
            .await
            .map_err(|e| ServiceError::transport(Operation::Create, e))?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::data(Operation::Create, e))?;

        let created = parse_created(data).map_err(|e| ServiceError::data(Operation::Create, e))?;
        Ok(created.into_record(Permissions::full()))
    }
}

#[async_trait]
impl AnnotationService for HttpAnnotationService {
    async fn create(&self, draft: &AnnotationDraft) -> Result<AnnotationRecord, ServiceError> {
        let record = self.events.report(self.post_annotation(draft).await)?;

        // The API is the only source for the viewer's identity
        {
            let mut user = self.user.write();
            if user.is_anonymous() {
                *user = record.author.clone();
            }
        }

        tracing::debug!(id = %record.id, thread_id = %record.thread_id, "Created annotation");
        Ok(record)
    }

    async fn read(&self, file_version_id: &str) -> Result<Vec<AnnotationRecord>, ServiceError> {
        let result = self.read_all(file_version_id).await;
        self.events.report(result)
    }

    async fn delete(&self, annotation_id: &str) -> Result<(), ServiceError> {
        let url = format!(
            "{}/2.0/annotations/{}",
            self.api_host,
            urlencoding::encode(annotation_id)
        );

        let result = match self.client.delete(url).send().await {
            Ok(response) if response.status() == StatusCode::NO_CONTENT => Ok(()),
            Ok(response) => Err(ServiceError::data(
                Operation::Delete,
                format!("HTTP {}", response.status()),
            )),
            Err(e) => Err(ServiceError::transport(Operation::Delete, e)),
        };

        if result.is_ok() {
            tracing::debug!(id = %annotation_id, "Deleted annotation");
        }
        self.events.report(result)
    }

    fn current_user(&self) -> AnnotationUser {
        self.user.read().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AnnotationErrorEvent> {
        self.events.subscribe()
    }
}

/// Default headers sent with every request
fn build_headers(config: &ClientConfig) -> crate::error::Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    if let Some(token) = &config.token {
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
    }

    if let Some(link) = &config.shared_link {
        let mut value = format!("shared_link={}", link);
        if let Some(password) = &config.shared_link_password {
            value.push_str(&format!("&shared_link_password={}", password));
        }
        headers.insert(BOX_API, header_value(&value)?);
    }

    headers.insert(CLIENT_NAME, header_value(&config.client_name)?);
    headers.insert(CLIENT_VERSION, header_value(&config.client_version)?);
    Ok(headers)
}

fn header_value(value: &str) -> crate::error::Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| SyncError::Config(format!("Invalid header value: {}", e)))
}
