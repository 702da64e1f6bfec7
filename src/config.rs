//! Configuration management for the annotation sync engine

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::annotations::{AnnotationType, AnnotationUser};

pub const DEFAULT_API_HOST: &str = "https://api.box.com";
pub const DEFAULT_CLIENT_NAME: &str = "annotation-sync";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub backend: Backend,
    pub client: ClientConfig,
    pub annotator: AnnotatorConfig,
    pub store: StoreConfig,
}

/// Where annotations are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Http,
    Local,
}

/// Settings for talking to the annotations API
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub api_host: String,
    pub file_id: String,
    pub token: Option<String>,
    pub shared_link: Option<String>,
    pub shared_link_password: Option<String>,
    /// Annotations requested per page; the API default applies when unset
    pub page_limit: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    /// Creates are refused before any request when false
    pub can_annotate: bool,
    pub client_name: String,
    pub client_version: String,
    /// User reported on optimistic records until the API identifies the viewer
    pub anonymous_user: AnnotationUser,
}

/// Settings for the thread registry
#[derive(Debug, Clone, Deserialize)]
pub struct AnnotatorConfig {
    pub file_version_id: String,
    pub permissions: AnnotatorPermissions,
    /// Restricts which annotation types are built and rendered; all when unset
    pub annotatable_types: Option<Vec<AnnotationType>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AnnotatorPermissions {
    pub can_annotate: bool,
    pub can_view_all: bool,
    pub can_view_own: bool,
}

/// Settings for the local SQLite backend
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: Backend::Http,
            client: ClientConfig::default(),
            annotator: AnnotatorConfig {
                file_version_id: String::new(),
                permissions: AnnotatorPermissions::default(),
                annotatable_types: None,
            },
            store: StoreConfig {
                url: "sqlite:./annotations.db?mode=rwc".to_string(),
                max_connections: 5,
            },
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_host: DEFAULT_API_HOST.to_string(),
            file_id: String::new(),
            token: None,
            shared_link: None,
            shared_link_password: None,
            page_limit: None,
            request_timeout_secs: None,
            can_annotate: false,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            anonymous_user: AnnotationUser::anonymous(),
        }
    }
}

impl Default for AnnotatorPermissions {
    fn default() -> Self {
        AnnotatorPermissions {
            can_annotate: false,
            can_view_all: true,
            can_view_own: true,
        }
    }
}

impl ClientConfig {
    pub fn new(api_host: &str, file_id: &str) -> Self {
        ClientConfig {
            api_host: api_host.trim_end_matches('/').to_string(),
            file_id: file_id.to_string(),
            ..Default::default()
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl AnnotatorConfig {
    pub fn new(file_version_id: &str) -> Self {
        AnnotatorConfig {
            file_version_id: file_version_id.to_string(),
            permissions: AnnotatorPermissions::default(),
            annotatable_types: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Config::default();
        let can_annotate = env_flag("ANNOTATIONS_CAN_ANNOTATE", false);

        Ok(Config {
            backend: match env::var("ANNOTATIONS_BACKEND")
                .unwrap_or_else(|_| "http".to_string())
                .as_str()
            {
                "local" => Backend::Local,
                _ => Backend::Http,
            },
            client: ClientConfig {
                api_host: env::var("ANNOTATIONS_API_HOST")
                    .map(|host| host.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.client.api_host),
                file_id: env::var("ANNOTATIONS_FILE_ID")?,
                token: env::var("ANNOTATIONS_TOKEN").ok(),
                shared_link: env::var("ANNOTATIONS_SHARED_LINK").ok(),
                shared_link_password: env::var("ANNOTATIONS_SHARED_LINK_PASSWORD").ok(),
                page_limit: env::var("ANNOTATIONS_PAGE_LIMIT")
                    .ok()
                    .and_then(|limit| limit.parse().ok()),
                request_timeout_secs: env::var("ANNOTATIONS_TIMEOUT_SECS")
                    .ok()
                    .and_then(|secs| secs.parse().ok()),
                can_annotate,
                ..defaults.client
            },
            annotator: AnnotatorConfig {
                file_version_id: env::var("ANNOTATIONS_FILE_VERSION_ID")?,
                permissions: AnnotatorPermissions {
                    can_annotate,
                    can_view_all: env_flag("ANNOTATIONS_CAN_VIEW_ALL", true),
                    can_view_own: env_flag("ANNOTATIONS_CAN_VIEW_OWN", true),
                },
                annotatable_types: env::var("ANNOTATIONS_TYPES")
                    .ok()
                    .map(|types| parse_types(&types)),
            },
            store: StoreConfig {
                url: env::var("ANNOTATIONS_DATABASE_URL").unwrap_or(defaults.store.url),
                max_connections: defaults.store.max_connections,
            },
        })
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|value| parse_flag(&value))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a comma separated list of annotation types, skipping unknown names
fn parse_types(value: &str) -> Vec<AnnotationType> {
    value
        .split(',')
        .filter(|name| !name.trim().is_empty())
        .filter_map(|name| match name.parse() {
            Ok(annotation_type) => Some(annotation_type),
            Err(e) => {
                tracing::warn!("Ignoring annotation type in ANNOTATIONS_TYPES: {}", e);
                None
            }
        })
        .collect()
}
