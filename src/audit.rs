//! Security event log
//!
//! Append-only ring of the most recent security events, mirrored to `tracing`
//! and persisted for audit display. Events are never transmitted.

use std::{collections::VecDeque, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::session::persist::{KeyValueStore, KEY_SECURITY_LOG};

/// Kinds of security events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    WindowBlur,
    VisibilityHidden,
    SuspiciousActivity,
    ScreenshotKey,
    WindowsKeyPressed,
    DevtoolsBlocked,
    PrintAttempt,
    SaveAttempt,
    CopyAttempt,
    CutAttempt,
    ViewSourceAttempt,
    NavigationBlocked,
    RecordingSoftwareDetected,
    ProbeFailed,
    PolicyDegraded,
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityEventType::WindowBlur => "WINDOW_BLUR",
            SecurityEventType::VisibilityHidden => "VISIBILITY_HIDDEN",
            SecurityEventType::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            SecurityEventType::ScreenshotKey => "SCREENSHOT_KEY",
            SecurityEventType::WindowsKeyPressed => "WINDOWS_KEY_PRESSED",
            SecurityEventType::DevtoolsBlocked => "DEVTOOLS_BLOCKED",
            SecurityEventType::PrintAttempt => "PRINT_ATTEMPT",
            SecurityEventType::SaveAttempt => "SAVE_ATTEMPT",
            SecurityEventType::CopyAttempt => "COPY_ATTEMPT",
            SecurityEventType::CutAttempt => "CUT_ATTEMPT",
            SecurityEventType::ViewSourceAttempt => "VIEW_SOURCE_ATTEMPT",
            SecurityEventType::NavigationBlocked => "NAVIGATION_BLOCKED",
            SecurityEventType::RecordingSoftwareDetected => "RECORDING_SOFTWARE_DETECTED",
            SecurityEventType::ProbeFailed => "PROBE_FAILED",
            SecurityEventType::PolicyDegraded => "POLICY_DEGRADED",
        };
        write!(f, "{}", name)
    }
}

/// Security event entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: SecurityEventType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "user")]
    pub identity: String,
    pub filename: Option<String>,
}

/// Who and what an event is about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOrigin {
    pub identity: Option<String>,
    pub filename: Option<String>,
}

impl EventOrigin {
    pub fn new(identity: Option<String>, filename: Option<String>) -> Self {
        Self { identity, filename }
    }
}

/// Thread-safe ring buffer of security events
pub struct AuditLog {
    entries: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog")
            .field("len", &self.entries.lock().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl AuditLog {
    /// In-memory log
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            store: None,
        }
    }

    /// Log persisted to `store`, seeded with whatever a previous run left there
    pub fn persistent(capacity: usize, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let capacity = capacity.max(1);
        let mut entries: VecDeque<SecurityEvent> = match store.get(KEY_SECURITY_LOG)? {
            Some(raw) => match serde_json::from_str::<Vec<SecurityEvent>>(&raw) {
                Ok(events) => events.into(),
                Err(e) => {
                    warn!("Discarding unreadable security log: {}", e);
                    VecDeque::new()
                }
            },
            None => VecDeque::new(),
        };
        while entries.len() > capacity {
            entries.pop_front();
        }

        Ok(Self {
            entries: Mutex::new(entries),
            capacity,
            store: Some(store),
        })
    }

    /// Appends an event, evicting the oldest beyond capacity
    pub fn record(
        &self,
        kind: SecurityEventType,
        message: impl Into<String>,
        origin: &EventOrigin,
    ) -> SecurityEvent {
        let event = SecurityEvent {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            identity: origin
                .identity
                .clone()
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            filename: origin.filename.clone(),
        };

        warn!(
            "🔒 SECURITY EVENT [{}] {} (user={}, file={})",
            event.kind,
            event.message,
            event.identity,
            event.filename.as_deref().unwrap_or("-")
        );

        let snapshot = {
            let mut entries = self.entries.lock();
            entries.push_back(event.clone());
            while entries.len() > self.capacity {
                entries.pop_front();
            }
            self.store.as_ref().map(|_| entries.iter().cloned().collect::<Vec<_>>())
        };

        if let (Some(store), Some(events)) = (self.store.as_ref(), snapshot) {
            if let Err(e) = Self::write(store.as_ref(), &events) {
                error!("Failed to persist security log: {}", e);
            }
        }

        event
    }

    pub fn entries(&self) -> Vec<SecurityEvent> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count_of(&self, kind: SecurityEventType) -> usize {
        self.entries.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Writes the current ring to the backing store
    pub fn flush(&self) -> Result<()> {
        if let Some(store) = self.store.as_ref() {
            let events = self.entries();
            Self::write(store.as_ref(), &events)?;
        }
        Ok(())
    }

    fn write(store: &dyn KeyValueStore, events: &[SecurityEvent]) -> Result<()> {
        let raw = serde_json::to_string(events)?;
        store.set(KEY_SECURITY_LOG, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::persist::MemoryStore;

    fn origin() -> EventOrigin {
        EventOrigin::new(Some("alice".into()), Some("a.pdf".into()))
    }

    #[test]
    fn test_ring_keeps_most_recent_hundred() {
        let log = AuditLog::new(100);
        for i in 0..130 {
            log.record(SecurityEventType::WindowBlur, format!("blur {}", i), &origin());
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 100);
        assert_eq!(entries[0].message, "blur 30");
        assert_eq!(entries[99].message, "blur 129");
    }

    #[test]
    fn test_unknown_identity_placeholder() {
        let log = AuditLog::new(10);
        let event = log.record(SecurityEventType::CopyAttempt, "copy", &EventOrigin::default());
        assert_eq!(event.identity, "UNKNOWN");
        assert!(event.filename.is_none());
    }

    #[test]
    fn test_persisted_ring_reloads() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let log = AuditLog::persistent(3, store.clone()).unwrap();
        for kind in [
            SecurityEventType::WindowBlur,
            SecurityEventType::ScreenshotKey,
            SecurityEventType::PrintAttempt,
            SecurityEventType::PolicyDegraded,
        ] {
            log.record(kind, "x", &origin());
        }

        let reloaded = AuditLog::persistent(3, store.clone()).unwrap();
        let kinds: Vec<_> = reloaded.entries().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SecurityEventType::ScreenshotKey,
                SecurityEventType::PrintAttempt,
                SecurityEventType::PolicyDegraded
            ]
        );

        let raw = store.get(KEY_SECURITY_LOG).unwrap().unwrap();
        assert!(raw.contains("\"type\":\"POLICY_DEGRADED\""));
    }
}
