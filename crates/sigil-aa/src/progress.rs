//! Human-readable progress events emitted by the flows.
//!
//! Events go to an injected [`ProgressSink`]. A `pending` event can later be
//! resolved in place through its id, so "submitted" becomes "confirmed"
//! without a second entry.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressLevel {
    Info,
    Success,
    Error,
    Pending,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: ProgressLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProgressEvent {
    pub fn new(level: ProgressLevel, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            details,
        }
    }
}

/// Receives progress events.
pub trait ProgressSink: Send + Sync {
    fn record(&self, event: ProgressEvent);

    /// Replace level, message, and details of a previously recorded event.
    fn update(&self, id: Uuid, level: ProgressLevel, message: String, details: Option<String>);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn record(&self, event: ProgressEvent) {
        let details = event.details.as_deref().unwrap_or("");
        match event.level {
            ProgressLevel::Error => tracing::error!(id = %event.id, details, "{}", event.message),
            ProgressLevel::Warn => tracing::warn!(id = %event.id, details, "{}", event.message),
            level => tracing::info!(id = %event.id, ?level, details, "{}", event.message),
        }
    }

    fn update(&self, id: Uuid, level: ProgressLevel, message: String, details: Option<String>) {
        self.record(ProgressEvent {
            id,
            timestamp: Utc::now(),
            level,
            message,
            details,
        });
    }
}

/// In-memory, ordered event log.
#[derive(Debug, Default)]
pub struct ProgressLog {
    entries: Mutex<Vec<ProgressEvent>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ProgressEvent> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// `(level, message)` pairs in order, convenient for assertions.
    pub fn summary(&self) -> Vec<(ProgressLevel, String)> {
        self.entries()
            .into_iter()
            .map(|e| (e.level, e.message))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl ProgressSink for ProgressLog {
    fn record(&self, event: ProgressEvent) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }

    fn update(&self, id: Uuid, level: ProgressLevel, message: String, details: Option<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.level = level;
            entry.message = message;
            entry.details = details;
            entry.timestamp = Utc::now();
        }
    }
}

/// Cheap handle the flows use to emit events.
#[derive(Clone)]
pub struct Progress {
    sink: Arc<dyn ProgressSink>,
}

impl Progress {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink }
    }

    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    pub fn emit(&self, level: ProgressLevel, message: impl Into<String>, details: Option<String>) -> Uuid {
        let event = ProgressEvent::new(level, message, details);
        let id = event.id;
        self.sink.record(event);
        id
    }

    pub fn info(&self, message: impl Into<String>) -> Uuid {
        self.emit(ProgressLevel::Info, message, None)
    }

    pub fn success(&self, message: impl Into<String>, details: impl Into<String>) -> Uuid {
        self.emit(ProgressLevel::Success, message, Some(details.into()))
    }

    pub fn pending(&self, message: impl Into<String>) -> Uuid {
        self.emit(ProgressLevel::Pending, message, None)
    }

    pub fn warn(&self, message: impl Into<String>) -> Uuid {
        self.emit(ProgressLevel::Warn, message, None)
    }

    pub fn error(&self, message: impl Into<String>, details: impl Into<String>) -> Uuid {
        self.emit(ProgressLevel::Error, message, Some(details.into()))
    }

    pub fn resolve(&self, id: Uuid, level: ProgressLevel, message: impl Into<String>, details: impl Into<String>) {
        self.sink.update(id, level, message.into(), Some(details.into()));
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").finish_non_exhaustive()
    }
}

/// `0x12345678...` style abbreviation for log lines.
pub(crate) fn short(value: impl std::fmt::Display, keep: usize) -> String {
    let s = value.to_string();
    if s.len() <= keep {
        s
    } else {
        format!("{}...", &s[..keep])
    }
}
