//! One-line user notifications.
//!
//! The cache manager and the submission pipeline surface every outcome as a
//! single success/warning/error message. The UI layer decides how to render
//! them; this module only defines the message type and the sink seam.

use std::sync::Mutex;

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
}

/// A single user-facing message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            message: message.into(),
        }
    }
}

/// Where user-facing messages go. Implemented by the embedding UI.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, notification: Notification);
}

impl<T: NotificationSink + ?Sized> NotificationSink for std::sync::Arc<T> {
    fn emit(&self, notification: Notification) {
        (**self).emit(notification)
    }
}

/// Sink that forwards notifications to the tracing subscriber. Useful for
/// headless embeddings and as a default while wiring up a UI.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Success => info!(message = %notification.message, "notification"),
            NotificationKind::Warning => warn!(message = %notification.message, "notification"),
            NotificationKind::Error => error!(message = %notification.message, "notification"),
        }
    }
}

/// Sink that collects notifications in memory, for UIs that drain messages on
/// their own schedule and for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn messages(&self) -> Vec<Notification> {
        self.messages.lock().unwrap().clone()
    }

    /// Drain and return all collected notifications.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.messages.lock().unwrap())
    }
}

impl NotificationSink for MemorySink {
    fn emit(&self, notification: Notification) {
        self.messages.lock().unwrap().push(notification);
    }
}
