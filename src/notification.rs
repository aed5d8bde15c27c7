use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub message: String,
    pub shown_at: DateTime<Utc>,
}

/// Single-slot status surface. Showing a message replaces whatever was displayed.
#[derive(Clone, Default)]
pub struct Notifier {
    active: Arc<Mutex<Option<Toast>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Displays `message`, returning the toast it replaced.
    pub fn show(&self, message: impl Into<String>) -> Option<Toast> {
        let toast = Toast {
            message: message.into(),
            shown_at: Utc::now(),
        };
        info!(target: "notification", message = %toast.message, "showing notification");
        self.active.lock().replace(toast)
    }

    pub fn clear(&self) -> Option<Toast> {
        self.active.lock().take()
    }

    pub fn current(&self) -> Option<Toast> {
        self.active.lock().clone()
    }
}
