use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use ipnet::IpNet;
use tracing::info;

use crate::auth::manager::AuthManager;
use crate::config::settings::Settings;
use crate::protection::anti_clone::AccessMonitor;
use crate::protection::firewall::Firewall;
use crate::protection::geoip::CountryResolver;
use crate::protection::pipeline::RequestGate;
use crate::protection::rate_limiter::RateLimiter;
use crate::storage::blocklist::BlocklistManager;
use crate::storage::content::ContentStore;
use crate::storage::event_log::EventLog;
use crate::storage::sqlite::SqliteStore;

/// Shared state handed to every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub content: Arc<ContentStore>,
    pub events: Arc<EventLog>,
    pub blocklist: Arc<BlocklistManager>,
    pub gate: Arc<RequestGate>,
    pub auth: Arc<AuthManager>,
    pub trusted_proxies: Arc<Vec<IpNet>>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire every component on top of one SQLite store.
    pub fn build(
        settings: Settings,
        sqlite: Arc<SqliteStore>,
        geo: Arc<dyn CountryResolver>,
    ) -> Result<Self> {
        let events = Arc::new(EventLog::new(sqlite.clone(), settings.gate.event_log_cap));

        let blocklist = Arc::new(BlocklistManager::new(sqlite.clone()));
        let loaded = blocklist
            .load_from_db()
            .context("Failed to load blocked IPs")?;
        info!(count = loaded, "Blocked IPs loaded");

        let content = Arc::new(ContentStore::new(sqlite).context("Failed to open content store")?);

        let firewall = Firewall::new(&settings.gate, blocklist.clone(), events.clone(), geo)?;
        let gate = RequestGate::new(
            Arc::new(firewall),
            Arc::new(RateLimiter::new(&settings.gate.rate_limits)),
            Arc::new(AccessMonitor::new(&settings.gate, events.clone())),
            events.clone(),
        );

        let auth = AuthManager::new(&settings.admin, events.clone());

        let trusted_proxies = settings
            .server
            .trusted_proxies
            .iter()
            .map(|s| s.parse::<IpNet>().with_context(|| format!("Invalid trusted proxy: {}", s)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            settings: Arc::new(settings),
            content,
            events,
            blocklist,
            gate: Arc::new(gate),
            auth: Arc::new(auth),
            trusted_proxies: Arc::new(trusted_proxies),
            start_time: Instant::now(),
        })
    }
}
