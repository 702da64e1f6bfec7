//! Annotation Sync
//!
//! Fetches the annotation threads of one file version and reports what each
//! page holds.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use annotation_sync::{
    AnnotationService, Backend, Config, HttpAnnotationService, LocalAnnotationService,
    NoopViewFactory, ThreadRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "annotation_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Annotation Sync v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("File version: {}", config.annotator.file_version_id);

    let service: Arc<dyn AnnotationService> = match config.backend {
        Backend::Http => {
            tracing::info!("Annotations API: {}", config.client.api_host);
            Arc::new(HttpAnnotationService::new(&config.client)?)
        }
        Backend::Local => Arc::new(
            LocalAnnotationService::connect(&config.store, config.client.anonymous_user.clone())
                .await
                .context("Failed to open local annotation store")?,
        ),
    };

    let mut errors = service.subscribe();
    tokio::spawn(async move {
        loop {
            match errors.recv().await {
                Ok(event) => {
                    tracing::error!(reason = %event.reason, "Annotation error: {}", event.error)
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} annotation errors", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut registry = ThreadRegistry::new(
        config.annotator.clone(),
        service,
        Arc::new(NoopViewFactory),
    );

    let summary = registry
        .fetch_annotations()
        .await
        .context("Failed to fetch annotations")?;

    if let Some(notice) = summary.notice {
        tracing::warn!("Notice: {}", notice.message_key());
    }

    for page in registry.pages() {
        tracing::info!(
            page,
            threads = registry.threads_on_page(page).len(),
            "Annotated page"
        );
    }
    tracing::info!(
        threads = summary.threads,
        skipped = summary.skipped,
        "Done"
    );

    Ok(())
}
