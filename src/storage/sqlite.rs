use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use serde::{Deserialize, Serialize};

use crate::models::contact::{Contact, ContactStatus};
use crate::models::event::{SecurityEvent, Severity};
use crate::models::site::{NewService, Service, ServiceUpdate};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedIpRow {
    pub id: i64,
    pub ip: String,
    pub reason: String,
    pub source: String,
    pub created_at: String,
}

/// Aggregate counts over the event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub total: u64,
    pub since: u64,
    pub high_severity: u64,
}

/// Embedded SQLite store backing the event log, the blocked-IP set and the
/// content documents. One connection behind a mutex; every read-modify-write
/// runs inside a transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Private database that lives as long as the store.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS security_events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                event       TEXT NOT NULL,
                data_json   TEXT NOT NULL,
                timestamp   TEXT NOT NULL,
                severity    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_security_events_event ON security_events(event);

            CREATE TABLE IF NOT EXISTS blocked_ips (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                ip          TEXT NOT NULL,
                reason      TEXT NOT NULL,
                source      TEXT NOT NULL DEFAULT 'auto',
                created_at  TEXT DEFAULT (datetime('now')),
                UNIQUE(ip)
            );

            CREATE TABLE IF NOT EXISTS documents (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  TEXT DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS services (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                name          TEXT NOT NULL,
                icon          TEXT NOT NULL DEFAULT '',
                description   TEXT NOT NULL DEFAULT '',
                features_json TEXT NOT NULL DEFAULT '[]',
                price         TEXT NOT NULL DEFAULT '',
                kind          TEXT NOT NULL DEFAULT 'contact'
            );

            CREATE TABLE IF NOT EXISTS contacts (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL,
                service     TEXT,
                message     TEXT NOT NULL,
                timestamp   TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'new',
                ip          TEXT,
                user_agent  TEXT
            );
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -----------------------------------------------------------------------
    // Security events
    // -----------------------------------------------------------------------

    /// Append an event and trim the table to the newest `cap` rows.
    pub fn append_event(&self, event: &SecurityEvent, cap: usize) -> Result<()> {
        let data = serde_json::to_string(&event.data)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO security_events (event, data_json, timestamp, severity)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.event,
                data,
                event.timestamp.to_rfc3339(),
                event.severity.as_str()
            ],
        )?;
        tx.execute(
            "DELETE FROM security_events WHERE id NOT IN (
                SELECT id FROM security_events ORDER BY id DESC LIMIT ?1
             )",
            params![cap as i64],
        )?;
        tx.commit()
    }

    /// The newest `limit` events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<SecurityEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event, data_json, timestamp, severity FROM security_events
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], event_from_row)?;
        rows.collect()
    }

    /// The whole log, oldest first.
    pub fn all_events(&self) -> Result<Vec<SecurityEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event, data_json, timestamp, severity FROM security_events ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], event_from_row)?;
        rows.collect()
    }

    pub fn event_counts(&self, since: DateTime<Utc>) -> Result<EventCounts> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM security_events", [], |r| r.get(0))?;
        let since_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM security_events WHERE timestamp >= ?1",
            params![since.to_rfc3339()],
            |r| r.get(0),
        )?;
        let high: i64 = conn.query_row(
            "SELECT COUNT(*) FROM security_events WHERE severity = 'high'",
            [],
            |r| r.get(0),
        )?;
        Ok(EventCounts {
            total: total as u64,
            since: since_count as u64,
            high_severity: high as u64,
        })
    }

    pub fn count_events_named(&self, event: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM security_events WHERE event = ?1",
            params![event],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    /// Run raw SQL against the store; used by tests to break the schema.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)
    }

    // -----------------------------------------------------------------------
    // Blocked IPs
    // -----------------------------------------------------------------------

    /// Returns `true` when the IP was not already present.
    pub fn add_blocked_ip(&self, ip: &str, reason: &str, source: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "INSERT OR IGNORE INTO blocked_ips (ip, reason, source) VALUES (?1, ?2, ?3)",
            params![ip, reason, source],
        )?;
        Ok(n > 0)
    }

    pub fn remove_blocked_ip(&self, ip: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM blocked_ips WHERE ip = ?1", params![ip])?;
        Ok(n > 0)
    }

    pub fn get_blocked_ips(&self) -> Result<Vec<BlockedIpRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, ip, reason, source, created_at FROM blocked_ips ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BlockedIpRow {
                id: row.get(0)?,
                ip: row.get(1)?,
                reason: row.get(2)?,
                source: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    pub fn get_document(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM documents WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )
        .optional()
    }

    pub fn put_document(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// Read, transform and write back a document in one transaction.
    pub fn update_document<F>(&self, key: &str, f: F) -> Result<String>
    where
        F: FnOnce(Option<String>) -> Result<String>,
    {
        self.update_document_with_services(key, f, None)
    }

    /// Like [`update_document`](Self::update_document), and when `services`
    /// is given the service table is swapped in the same transaction.
    pub fn update_document_with_services<F>(
        &self,
        key: &str,
        f: F,
        services: Option<&[NewService]>,
    ) -> Result<String>
    where
        F: FnOnce(Option<String>) -> Result<String>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM documents WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        let next = f(current)?;
        tx.execute(
            "INSERT INTO documents (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![key, next],
        )?;
        if let Some(services) = services {
            tx.execute("DELETE FROM services", [])?;
            for s in services {
                insert_service_row(&tx, s)?;
            }
        }
        tx.commit()?;
        Ok(next)
    }

    // -----------------------------------------------------------------------
    // Services
    // -----------------------------------------------------------------------

    pub fn service_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM services", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn list_services(&self) -> Result<Vec<Service>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, icon, description, features_json, price, kind
             FROM services ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], service_from_row)?;
        rows.collect()
    }

    pub fn get_service(&self, id: i64) -> Result<Option<Service>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, icon, description, features_json, price, kind
             FROM services WHERE id = ?1",
            params![id],
            service_from_row,
        )
        .optional()
    }

    pub fn insert_service(&self, service: &NewService) -> Result<Service> {
        let conn = self.conn.lock();
        insert_service_row(&conn, service)
    }

    pub fn update_service(&self, id: i64, update: ServiceUpdate) -> Result<Option<Service>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existing = tx
            .query_row(
                "SELECT id, name, icon, description, features_json, price, kind
                 FROM services WHERE id = ?1",
                params![id],
                service_from_row,
            )
            .optional()?;
        let Some(mut service) = existing else {
            return Ok(None);
        };
        update.apply(&mut service);
        tx.execute(
            "UPDATE services SET name = ?1, icon = ?2, description = ?3,
                 features_json = ?4, price = ?5, kind = ?6
             WHERE id = ?7",
            params![
                service.name,
                service.icon,
                service.description,
                features_to_json(&service.features)?,
                service.price,
                service.kind,
                id
            ],
        )?;
        tx.commit()?;
        Ok(Some(service))
    }

    pub fn delete_service(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM services WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Swap the whole service list atomically.
    pub fn replace_services(&self, services: &[NewService]) -> Result<Vec<Service>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM services", [])?;
        let mut out = Vec::with_capacity(services.len());
        for s in services {
            out.push(insert_service_row(&tx, s)?);
        }
        tx.commit()?;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Contacts
    // -----------------------------------------------------------------------

    pub fn insert_contact(&self, contact: &Contact) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO contacts (id, name, email, service, message, timestamp, status, ip, user_agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                contact.id,
                contact.name,
                contact.email,
                contact.service,
                contact.message,
                contact.timestamp.to_rfc3339(),
                contact.status.as_str(),
                contact.ip,
                contact.user_agent,
            ],
        )?;
        Ok(())
    }

    /// All contacts, newest first.
    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, email, service, message, timestamp, status, ip, user_agent
             FROM contacts ORDER BY timestamp DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], contact_from_row)?;
        rows.collect()
    }

    pub fn update_contact_status(&self, id: &str, status: ContactStatus) -> Result<Option<Contact>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let n = tx.execute(
            "UPDATE contacts SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if n == 0 {
            return Ok(None);
        }
        let contact = tx.query_row(
            "SELECT id, name, email, service, message, timestamp, status, ip, user_agent
             FROM contacts WHERE id = ?1",
            params![id],
            contact_from_row,
        )?;
        tx.commit()?;
        Ok(Some(contact))
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn insert_service_row(conn: &Connection, s: &NewService) -> Result<Service> {
    conn.execute(
        "INSERT INTO services (id, name, icon, description, features_json, price, kind)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            s.id,
            s.name,
            s.icon,
            s.description,
            features_to_json(&s.features)?,
            s.price,
            s.kind
        ],
    )?;
    Ok(Service {
        id: conn.last_insert_rowid(),
        name: s.name.clone(),
        icon: s.icon.clone(),
        description: s.description.clone(),
        features: s.features.clone(),
        price: s.price.clone(),
        kind: s.kind.clone(),
    })
}

fn features_to_json(features: &[String]) -> Result<String> {
    serde_json::to_string(features).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn parse_timestamp(idx: usize, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn event_from_row(row: &Row<'_>) -> Result<SecurityEvent> {
    let data: String = row.get(1)?;
    let ts: String = row.get(2)?;
    let severity: String = row.get(3)?;
    Ok(SecurityEvent {
        event: row.get(0)?,
        data: parse_json(1, &data)?,
        timestamp: parse_timestamp(2, &ts)?,
        severity: Severity::from_str_name(&severity).unwrap_or(Severity::Low),
    })
}

fn service_from_row(row: &Row<'_>) -> Result<Service> {
    let features: String = row.get(4)?;
    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        icon: row.get(2)?,
        description: row.get(3)?,
        features: parse_json(4, &features)?,
        price: row.get(5)?,
        kind: row.get(6)?,
    })
}

fn contact_from_row(row: &Row<'_>) -> Result<Contact> {
    let ts: String = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(Contact {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        service: row.get(3)?,
        message: row.get(4)?,
        timestamp: parse_timestamp(5, &ts)?,
        status: ContactStatus::from_str_name(&status).unwrap_or(ContactStatus::New),
        ip: row.get(7)?,
        user_agent: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::EventKind;
    use serde_json::json;

    #[test]
    fn test_event_log_trims_to_cap() {
        let store = SqliteStore::in_memory().unwrap();
        for i in 0..15 {
            let ev = SecurityEvent::new(EventKind::PageView, json!({ "n": i }));
            store.append_event(&ev, 10).unwrap();
        }
        let all = store.all_events().unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(all.first().unwrap().data["n"], 5);
        assert_eq!(all.last().unwrap().data["n"], 14);

        let recent = store.recent_events(3).unwrap();
        assert_eq!(recent[0].data["n"], 14);
        assert_eq!(recent[2].data["n"], 12);
    }

    #[test]
    fn test_event_counts() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .append_event(&SecurityEvent::new(EventKind::SuspiciousRequest, json!({})), 100)
            .unwrap();
        store
            .append_event(&SecurityEvent::new(EventKind::PageView, json!({})), 100)
            .unwrap();
        let counts = store
            .event_counts(Utc::now() - chrono::Duration::hours(24))
            .unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.since, 2);
        assert_eq!(counts.high_severity, 1);
        assert_eq!(store.count_events_named("page_view").unwrap(), 1);
    }

    #[test]
    fn test_blocked_ip_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.add_blocked_ip("10.0.0.1", "manual", "admin").unwrap());
        assert!(!store.add_blocked_ip("10.0.0.1", "again", "admin").unwrap());
        assert_eq!(store.get_blocked_ips().unwrap().len(), 1);
        assert!(store.remove_blocked_ip("10.0.0.1").unwrap());
        assert!(!store.remove_blocked_ip("10.0.0.1").unwrap());
    }

    #[test]
    fn test_update_document_is_read_modify_write() {
        let store = SqliteStore::in_memory().unwrap();
        store.put_document("k", "1").unwrap();
        let next = store
            .update_document("k", |cur| {
                let n: i64 = cur.unwrap_or_default().parse().unwrap_or(0);
                Ok((n + 1).to_string())
            })
            .unwrap();
        assert_eq!(next, "2");
        assert_eq!(store.get_document("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_service_crud() {
        let store = SqliteStore::in_memory().unwrap();
        let created = store
            .insert_service(&NewService {
                id: None,
                name: "Web".into(),
                icon: "🌐".into(),
                description: "Sites".into(),
                features: vec!["a".into()],
                price: "$1".into(),
                kind: "contact".into(),
            })
            .unwrap();
        assert_eq!(store.get_service(created.id).unwrap().unwrap().name, "Web");

        let updated = store
            .update_service(
                created.id,
                ServiceUpdate {
                    price: Some("$2".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.price, "$2");
        assert_eq!(updated.name, "Web");

        assert!(store.update_service(9999, ServiceUpdate::default()).unwrap().is_none());
        assert!(store.delete_service(created.id).unwrap());
        assert!(store.get_service(created.id).unwrap().is_none());
    }
}
