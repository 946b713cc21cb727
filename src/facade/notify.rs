//! User-feedback collaborator
//!
//! Services report the outcome of user-visible operations (imports, exports,
//! migration) through a [`Notifier`]. Rendering is the embedder's concern;
//! the default implementation only logs.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

use crate::observability::Logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSeverity {
    Success,
    Info,
    Warning,
    Error,
}

impl NotificationSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationSeverity::Success => "success",
            NotificationSeverity::Info => "info",
            NotificationSeverity::Warning => "warning",
            NotificationSeverity::Error => "error",
        }
    }
}

impl fmt::Display for NotificationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub severity: NotificationSeverity,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        severity: NotificationSeverity,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
        }
    }

    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, NotificationSeverity::Success)
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, NotificationSeverity::Error)
    }
}

/// Receives user-facing notifications. Must not block.
pub trait Notifier: Send + Sync + fmt::Debug {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the structured log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        let fields = [
            ("title", notification.title.as_str()),
            ("description", notification.description.as_str()),
            ("severity", notification.severity.as_str()),
        ];
        match notification.severity {
            NotificationSeverity::Error => Logger::warn("NOTIFICATION", &fields),
            _ => Logger::info("NOTIFICATION", &fields),
        }
    }
}

/// Keeps notifications in memory, for embedders that poll
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    received: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything received so far
    pub fn drain(&self) -> Vec<Notification> {
        match self.received.lock() {
            Ok(mut received) => std::mem::take(&mut *received),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notification: Notification) {
        match self.received.lock() {
            Ok(mut received) => received.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_notifier_drains() {
        let notifier = MemoryNotifier::new();
        notifier.notify(Notification::success("Import complete", "3 records"));
        notifier.notify(Notification::error("Export failed", "disk full"));

        let received = notifier.drain();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].severity, NotificationSeverity::Error);
        assert!(notifier.drain().is_empty());
    }

    #[test]
    fn test_log_notifier_does_not_panic() {
        LogNotifier.notify(Notification::new("t", "d", NotificationSeverity::Warning));
    }
}
