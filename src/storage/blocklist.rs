use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use ipnet::IpNet;
use serde::Serialize;

use super::sqlite::SqliteStore;

/// One entry of the blocked set as exposed to the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedEntry {
    pub ip: String,
    pub reason: String,
    pub source: String,
    #[serde(rename = "blockedAt")]
    pub blocked_at: String,
}

// ---------------------------------------------------------------------------
// BlocklistManager
// ---------------------------------------------------------------------------

/// Persistent IP block set with in-memory caches in front of SQLite.
/// Entries never expire; they leave only through [`BlocklistManager::unblock`].
pub struct BlocklistManager {
    sqlite: Arc<SqliteStore>,
    blocked_ips: DashMap<IpAddr, String>,     // IP -> reason
    blocked_cidrs: DashMap<String, String>,   // CIDR string -> reason
}

impl BlocklistManager {
    pub fn new(sqlite: Arc<SqliteStore>) -> Self {
        Self {
            sqlite,
            blocked_ips: DashMap::new(),
            blocked_cidrs: DashMap::new(),
        }
    }

    /// Load all persisted entries into the in-memory caches.
    pub fn load_from_db(&self) -> rusqlite::Result<usize> {
        let rows = self.sqlite.get_blocked_ips()?;
        for row in &rows {
            self.cache_insert(&row.ip, &row.reason);
        }
        Ok(rows.len())
    }

    // -----------------------------------------------------------------------
    // Checks
    // -----------------------------------------------------------------------

    /// Reason for the block when `ip` is in the set (exact or CIDR match).
    pub fn is_blocked(&self, ip: &IpAddr) -> Option<String> {
        if let Some(entry) = self.blocked_ips.get(ip) {
            return Some(entry.value().clone());
        }

        for entry in self.blocked_cidrs.iter() {
            if let Ok(network) = entry.key().parse::<IpNet>() {
                if network.contains(ip) {
                    return Some(entry.value().clone());
                }
            }
        }

        None
    }

    pub fn len(&self) -> usize {
        self.blocked_ips.len() + self.blocked_cidrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> rusqlite::Result<Vec<BlockedEntry>> {
        Ok(self
            .sqlite
            .get_blocked_ips()?
            .into_iter()
            .map(|row| BlockedEntry {
                ip: row.ip,
                reason: row.reason,
                source: row.source,
                blocked_at: row.created_at,
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Add an IP (or CIDR) to the set. Returns `false` when it was already
    /// present. Strings that are neither an IP nor a CIDR are rejected.
    ///
    /// The in-memory set is updated before the write, so a storage error
    /// still leaves the address blocked for this process.
    pub fn block(&self, ip: &str, reason: &str, source: &str) -> Result<bool, BlocklistError> {
        let ip = normalize(ip)?;
        self.cache_insert(&ip, reason);
        Ok(self.sqlite.add_blocked_ip(&ip, reason, source)?)
    }

    /// Remove an IP (or CIDR). Returns `false` when it was not present.
    pub fn unblock(&self, ip: &str) -> Result<bool, BlocklistError> {
        let ip = normalize(ip)?;
        let removed = self.sqlite.remove_blocked_ip(&ip)?;
        if ip.contains('/') {
            self.blocked_cidrs.remove(&ip);
        } else if let Ok(parsed) = IpAddr::from_str(&ip) {
            self.blocked_ips.remove(&parsed);
        }
        Ok(removed)
    }

    /// First reason wins, matching the `INSERT OR IGNORE` row.
    fn cache_insert(&self, ip: &str, reason: &str) {
        if ip.contains('/') {
            self.blocked_cidrs
                .entry(ip.to_string())
                .or_insert_with(|| reason.to_string());
        } else if let Ok(parsed) = IpAddr::from_str(ip) {
            self.blocked_ips
                .entry(parsed)
                .or_insert_with(|| reason.to_string());
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlocklistError {
    #[error("invalid IP address or CIDR: {0}")]
    InvalidAddress(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

/// Canonical text form so `::1` and `0:0::1` land on the same row.
fn normalize(raw: &str) -> Result<String, BlocklistError> {
    let raw = raw.trim();
    if raw.contains('/') {
        raw.parse::<IpNet>()
            .map(|n| n.to_string())
            .map_err(|_| BlocklistError::InvalidAddress(raw.to_string()))
    } else {
        raw.parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| BlocklistError::InvalidAddress(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> BlocklistManager {
        BlocklistManager::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[test]
    fn test_block_and_unblock_exact_ip() {
        let bl = manager();
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        assert!(bl.is_blocked(&ip).is_none());

        assert!(bl.block("203.0.113.7", "Manual block", "admin").unwrap());
        assert_eq!(bl.is_blocked(&ip).as_deref(), Some("Manual block"));
        assert!(!bl.block("203.0.113.7", "twice", "admin").unwrap());

        assert!(bl.unblock("203.0.113.7").unwrap());
        assert!(bl.is_blocked(&ip).is_none());
        assert!(!bl.unblock("203.0.113.7").unwrap());
    }

    #[test]
    fn test_cidr_match() {
        let bl = manager();
        bl.block("198.51.100.0/24", "range", "admin").unwrap();
        assert!(bl.is_blocked(&"198.51.100.42".parse().unwrap()).is_some());
        assert!(bl.is_blocked(&"198.51.101.1".parse().unwrap()).is_none());
    }

    #[test]
    fn test_rejects_garbage() {
        let bl = manager();
        assert!(matches!(
            bl.block("not-an-ip", "x", "admin"),
            Err(BlocklistError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_survives_reload() {
        let sqlite = Arc::new(SqliteStore::in_memory().unwrap());
        let first = BlocklistManager::new(sqlite.clone());
        first.block("10.1.1.1", "persisted", "auto").unwrap();

        let second = BlocklistManager::new(sqlite);
        assert_eq!(second.load_from_db().unwrap(), 1);
        assert!(second.is_blocked(&"10.1.1.1".parse().unwrap()).is_some());
        assert_eq!(second.list().unwrap()[0].source, "auto");
    }

    #[test]
    fn test_block_sticks_in_memory_when_storage_fails() {
        let sqlite = Arc::new(SqliteStore::in_memory().unwrap());
        let bl = BlocklistManager::new(sqlite.clone());
        sqlite.execute_batch("DROP TABLE blocked_ips;").unwrap();

        assert!(matches!(
            bl.block("203.0.113.50", "suspicious_patterns", "firewall"),
            Err(BlocklistError::Storage(_))
        ));
        assert_eq!(
            bl.is_blocked(&"203.0.113.50".parse().unwrap()).as_deref(),
            Some("suspicious_patterns")
        );
    }
}
