//! Broadcast channel for service errors

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{ErrorReason, ServiceError};

const EVENT_CAPACITY: usize = 64;

/// Broadcast whenever a service operation fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationErrorEvent {
    pub reason: ErrorReason,
    pub error: String,
}

/// Sending half of a service's error channel
#[derive(Debug, Clone)]
pub struct ErrorEvents {
    sender: broadcast::Sender<AnnotationErrorEvent>,
}

impl ErrorEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnnotationErrorEvent> {
        self.sender.subscribe()
    }

    /// Broadcast an error; having no subscribers is fine
    pub fn emit(&self, error: &ServiceError) {
        let event = AnnotationErrorEvent {
            reason: error.reason(),
            error: error.to_string(),
        };
        tracing::debug!(reason = %event.reason, "Broadcasting annotation error");
        let _ = self.sender.send(event);
    }

    /// Pass a result through, broadcasting it if it failed
    pub fn report<T>(&self, result: Result<T, ServiceError>) -> Result<T, ServiceError> {
        if let Err(e) = &result {
            self.emit(e);
        }
        result
    }
}

impl Default for ErrorEvents {
    fn default() -> Self {
        Self::new()
    }
}
