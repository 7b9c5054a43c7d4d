use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::sqlite::SqliteStore;
use crate::models::event::{EventKind, SecurityEvent, Severity};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total_events: u64,
    #[serde(rename = "last24h")]
    pub last_24h: u64,
    pub high_severity_events: u64,
    pub recent_events: Vec<SecurityEvent>,
}

/// Append-only, size-bounded log of security and analytics events.
///
/// Writes never fail the caller: a storage error is reported through
/// tracing and the event is dropped.
pub struct EventLog {
    sqlite: Arc<SqliteStore>,
    cap: usize,
}

impl EventLog {
    pub fn new(sqlite: Arc<SqliteStore>, cap: usize) -> Self {
        Self {
            sqlite,
            cap: cap.max(1),
        }
    }

    pub fn record(&self, kind: EventKind, data: Value) {
        let event = SecurityEvent::new(kind, data);

        match event.severity {
            Severity::High | Severity::Medium => {
                warn!(event = %event.event, severity = %event.severity, data = %event.data, "Security event")
            }
            Severity::Low => debug!(event = %event.event, data = %event.data, "Event recorded"),
        }

        if let Err(e) = self.sqlite.append_event(&event, self.cap) {
            error!(event = %event.event, error = %e, "Failed to persist event");
        }
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> rusqlite::Result<Vec<SecurityEvent>> {
        self.sqlite.recent_events(limit)
    }

    /// Oldest first.
    pub fn all(&self) -> rusqlite::Result<Vec<SecurityEvent>> {
        self.sqlite.all_events()
    }

    pub fn count(&self, kind: EventKind) -> rusqlite::Result<u64> {
        self.sqlite.count_events_named(kind.as_str())
    }

    pub fn stats(&self) -> rusqlite::Result<EventStats> {
        let counts = self.sqlite.event_counts(Utc::now() - Duration::hours(24))?;
        Ok(EventStats {
            total_events: counts.total,
            last_24h: counts.since,
            high_severity_events: counts.high_severity,
            recent_events: self.recent(20)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_and_stats() {
        let log = EventLog::new(Arc::new(SqliteStore::in_memory().unwrap()), 1000);
        log.record(EventKind::PageView, json!({ "ip": "10.0.0.1" }));
        log.record(EventKind::PageView, json!({ "ip": "10.0.0.2" }));
        log.record(EventKind::SuspiciousRequest, json!({ "ip": "10.0.0.3" }));

        assert_eq!(log.count(EventKind::PageView).unwrap(), 2);

        let stats = log.stats().unwrap();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.last_24h, 3);
        assert_eq!(stats.high_severity_events, 1);
        assert_eq!(stats.recent_events[0].event, "suspicious_request");

        let v = serde_json::to_value(&stats).unwrap();
        assert!(v.get("last24h").is_some());
        assert!(v.get("recentEvents").is_some());
    }

    #[test]
    fn test_cap_keeps_newest() {
        let log = EventLog::new(Arc::new(SqliteStore::in_memory().unwrap()), 3);
        for i in 0..5 {
            log.record(EventKind::PageView, json!({ "n": i }));
        }
        let all = log.all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].data["n"], 2);
    }
}
