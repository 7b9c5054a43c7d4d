use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;

use crate::config::settings::GatePolicy;
use crate::models::event::EventKind;
use crate::models::request::GateRequest;
use crate::storage::event_log::EventLog;

const SCRAPING_WINDOW: Duration = Duration::from_secs(60);
const HISTORY_RETENTION: Duration = Duration::from_secs(60 * 60);
const ACTIVE_WINDOW: Duration = Duration::from_secs(5 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct Hit {
    url: String,
    at: Instant,
}

/// What the monitor saw for one request. `allowed` is always true.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDiagnostics {
    pub allowed: bool,
    pub domain_whitelisted: bool,
    pub referer_whitelisted: Option<bool>,
    pub requests_last_minute: usize,
    pub potential_scraping: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopIp {
    pub ip: String,
    pub requests: usize,
    #[serde(rename = "lastUrl")]
    pub last_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessStats {
    #[serde(rename = "totalIPs")]
    pub total_ips: usize,
    pub active_last_hour: usize,
    pub active_last_day: usize,
    #[serde(rename = "topIPs")]
    pub top_ips: Vec<TopIp>,
}

/// Non-blocking observer over per-IP request history. Flags off-whitelist
/// hosts and referers and bursts above the scraping threshold, but never
/// rejects a request.
pub struct AccessMonitor {
    events: Arc<EventLog>,
    domain_whitelist: Vec<String>,
    scraping_threshold: usize,
    history_cap: usize,
    history: DashMap<IpAddr, VecDeque<Hit>>,
    /// Last request per IP, kept for a day so the daily figure outlives
    /// the hourly history prune.
    last_seen: DashMap<IpAddr, Instant>,
}

impl AccessMonitor {
    pub fn new(policy: &GatePolicy, events: Arc<EventLog>) -> Self {
        Self {
            events,
            domain_whitelist: policy
                .domain_whitelist
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
            scraping_threshold: policy.scraping_threshold,
            history_cap: policy.history_cap.max(1),
            history: DashMap::new(),
            last_seen: DashMap::new(),
        }
    }

    /// Exact match or subdomain of a whitelisted name. A port suffix is ignored.
    pub fn is_domain_whitelisted(&self, host: &str) -> bool {
        let domain = strip_port(host).to_lowercase();
        if domain.is_empty() {
            return false;
        }
        self.domain_whitelist.iter().any(|allowed| {
            domain == *allowed
                || (domain.len() > allowed.len()
                    && domain.ends_with(allowed.as_str())
                    && domain.as_bytes()[domain.len() - allowed.len() - 1] == b'.')
        })
    }

    pub fn monitor_access(&self, req: &GateRequest) -> AccessDiagnostics {
        self.monitor_access_at(req, Instant::now())
    }

    pub fn monitor_access_at(&self, req: &GateRequest, now: Instant) -> AccessDiagnostics {
        let ip = req.client_ip.to_string();
        let url = req.original_url();

        let domain_whitelisted = req
            .host
            .as_deref()
            .map(|h| self.is_domain_whitelisted(h))
            .unwrap_or(false);
        if !domain_whitelisted {
            self.events.record(
                EventKind::UnauthorizedDomainAccess,
                json!({
                    "host": req.host,
                    "ip": ip,
                    "userAgent": req.user_agent,
                    "referer": req.referer,
                    "url": url,
                }),
            );
        }

        let referer_whitelisted = req.referer.as_deref().map(|referer| {
            let ok = referer_host(referer)
                .map(|h| self.is_domain_whitelisted(&h))
                .unwrap_or(false);
            if !ok {
                self.events.record(
                    EventKind::SuspiciousReferer,
                    json!({
                        "host": req.host,
                        "referer": referer,
                        "ip": ip,
                        "userAgent": req.user_agent,
                    }),
                );
            }
            ok
        });

        let requests_last_minute = self.track(req.client_ip, url, now);
        let potential_scraping = requests_last_minute > self.scraping_threshold;
        if potential_scraping {
            self.events.record(
                EventKind::PotentialScraping,
                json!({
                    "ip": ip,
                    "requestsLastMinute": requests_last_minute,
                    "userAgent": req.user_agent,
                    "host": req.host,
                }),
            );
        }

        AccessDiagnostics {
            allowed: true,
            domain_whitelisted,
            referer_whitelisted,
            requests_last_minute,
            potential_scraping,
        }
    }

    /// Append a hit, enforce the per-IP cap, return the last-minute count.
    fn track(&self, ip: IpAddr, url: String, now: Instant) -> usize {
        self.last_seen.insert(ip, now);
        let mut hits = self.history.entry(ip).or_default();
        hits.push_back(Hit { url, at: now });
        while hits.len() > self.history_cap {
            hits.pop_front();
        }
        hits.iter()
            .filter(|h| now.saturating_duration_since(h.at) < SCRAPING_WINDOW)
            .count()
    }

    pub fn history_len(&self, ip: &IpAddr) -> usize {
        self.history.get(ip).map(|h| h.len()).unwrap_or(0)
    }

    /// Drop history older than one hour and forget IPs left with none.
    /// Last-seen times are kept for a day.
    pub fn cleanup_at(&self, now: Instant) -> usize {
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < DAY);
        let before = self.history.len();
        self.history.retain(|_, hits| {
            while let Some(front) = hits.front() {
                if now.saturating_duration_since(front.at) >= HISTORY_RETENTION {
                    hits.pop_front();
                } else {
                    break;
                }
            }
            !hits.is_empty()
        });
        before - self.history.len()
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    /// Log the aggregate access report.
    pub fn report_at(&self, now: Instant) {
        let unique = self.history.len();
        let active = self.count_active(now, ACTIVE_WINDOW);
        self.events.record(
            EventKind::AccessReport,
            json!({ "uniqueIPs": unique, "activeLast5Min": active }),
        );
    }

    pub fn report(&self) {
        self.report_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> AccessStats {
        let mut top: Vec<TopIp> = self
            .history
            .iter()
            .map(|entry| TopIp {
                ip: entry.key().to_string(),
                requests: entry.value().len(),
                last_url: entry.value().back().map(|h| h.url.clone()),
            })
            .collect();
        top.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.ip.cmp(&b.ip)));
        top.truncate(10);

        AccessStats {
            total_ips: self.history.len(),
            active_last_hour: self.count_active(now, HISTORY_RETENTION),
            active_last_day: self
                .last_seen
                .iter()
                .filter(|entry| now.saturating_duration_since(*entry.value()) < DAY)
                .count(),
            top_ips: top,
        }
    }

    pub fn stats(&self) -> AccessStats {
        self.stats_at(Instant::now())
    }

    fn count_active(&self, now: Instant, within: Duration) -> usize {
        self.history
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .back()
                    .map(|h| now.saturating_duration_since(h.at) < within)
                    .unwrap_or(false)
            })
            .count()
    }
}

fn strip_port(host: &str) -> &str {
    let host = host.trim();
    // Bracketed IPv6 literal, with or without port.
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or("");
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

fn referer_host(referer: &str) -> Option<String> {
    referer
        .parse::<http::Uri>()
        .ok()
        .and_then(|uri| uri.host().map(|h| h.trim_matches(|c| c == '[' || c == ']').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::default_gate_policy;
    use crate::storage::sqlite::SqliteStore;

    fn monitor_with(policy: GatePolicy) -> (AccessMonitor, Arc<EventLog>) {
        let events = Arc::new(EventLog::new(Arc::new(SqliteStore::in_memory().unwrap()), 10_000));
        (AccessMonitor::new(&policy, events.clone()), events)
    }

    fn monitor() -> (AccessMonitor, Arc<EventLog>) {
        monitor_with(default_gate_policy())
    }

    fn req(ip: &str) -> GateRequest {
        GateRequest::new(ip.parse().unwrap(), "GET", "/").with_host("localhost:3000")
    }

    #[test]
    fn test_domain_whitelist() {
        let mut policy = default_gate_policy();
        policy.domain_whitelist = vec!["example.com".into(), "localhost".into()];
        let (m, _) = monitor_with(policy);
        assert!(m.is_domain_whitelisted("example.com"));
        assert!(m.is_domain_whitelisted("www.example.com:8443"));
        assert!(m.is_domain_whitelisted("LOCALHOST:3000"));
        assert!(!m.is_domain_whitelisted("badexample.com"));
        assert!(!m.is_domain_whitelisted("example.com.evil.net"));
        assert!(!m.is_domain_whitelisted(""));
    }

    #[test]
    fn test_never_blocks_and_logs_foreign_host() {
        let (m, events) = monitor();
        let r = GateRequest::new("10.0.0.1".parse().unwrap(), "GET", "/")
            .with_host("mirror.evil.net")
            .with_referer("https://phish.example/page");
        let diag = m.monitor_access(&r);
        assert!(diag.allowed);
        assert!(!diag.domain_whitelisted);
        assert_eq!(diag.referer_whitelisted, Some(false));
        assert_eq!(events.count(EventKind::UnauthorizedDomainAccess).unwrap(), 1);
        assert_eq!(events.count(EventKind::SuspiciousReferer).unwrap(), 1);
    }

    #[test]
    fn test_whitelisted_referer_not_logged() {
        let (m, events) = monitor();
        let r = req("10.0.0.1").with_referer("http://localhost:3000/admin");
        let diag = m.monitor_access(&r);
        assert!(diag.domain_whitelisted);
        assert_eq!(diag.referer_whitelisted, Some(true));
        assert_eq!(events.count(EventKind::SuspiciousReferer).unwrap(), 0);
    }

    #[test]
    fn test_history_capped_at_most_recent() {
        let (m, _) = monitor();
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        let now = Instant::now();
        for i in 0..150 {
            let r = GateRequest::new(ip, "GET", format!("/page/{}", i)).with_host("localhost");
            m.monitor_access_at(&r, now);
        }
        assert_eq!(m.history_len(&ip), 100);
        let stats = m.stats_at(now);
        assert_eq!(stats.top_ips[0].last_url.as_deref(), Some("/page/149"));
    }

    #[test]
    fn test_scraping_flagged_above_threshold() {
        let mut policy = default_gate_policy();
        policy.scraping_threshold = 3;
        let (m, events) = monitor_with(policy);
        let now = Instant::now();
        let flags: Vec<bool> = (0..5)
            .map(|_| m.monitor_access_at(&req("10.0.0.3"), now).potential_scraping)
            .collect();
        assert_eq!(flags, vec![false, false, false, true, true]);
        assert_eq!(events.count(EventKind::PotentialScraping).unwrap(), 2);

        // A minute later the burst no longer counts.
        let later = now + Duration::from_secs(61);
        assert_eq!(m.monitor_access_at(&req("10.0.0.3"), later).requests_last_minute, 1);
    }

    #[test]
    fn test_cleanup_drops_old_entries() {
        let (m, _) = monitor();
        let start = Instant::now();
        m.monitor_access_at(&req("10.0.0.4"), start);
        m.monitor_access_at(&req("10.0.0.5"), start);
        m.monitor_access_at(&req("10.0.0.5"), start + Duration::from_secs(3000));

        let removed = m.cleanup_at(start + Duration::from_secs(3700));
        assert_eq!(removed, 1);
        assert_eq!(m.history_len(&"10.0.0.4".parse().unwrap()), 0);
        assert_eq!(m.history_len(&"10.0.0.5".parse().unwrap()), 1);
    }

    #[test]
    fn test_stats_and_report() {
        let (m, events) = monitor();
        let now = Instant::now();
        for _ in 0..3 {
            m.monitor_access_at(&req("10.0.0.6"), now);
        }
        m.monitor_access_at(&req("10.0.0.7"), now);

        let stats = m.stats_at(now + Duration::from_secs(600));
        assert_eq!(stats.total_ips, 2);
        assert_eq!(stats.active_last_hour, 2);
        assert_eq!(stats.active_last_day, 2);
        assert_eq!(stats.top_ips[0].ip, "10.0.0.6");
        assert_eq!(stats.top_ips[0].requests, 3);

        m.report_at(now + Duration::from_secs(600));
        let report = &events.recent(1).unwrap()[0];
        assert_eq!(report.event, "access_report");
        assert_eq!(report.data["uniqueIPs"], 2);
        assert_eq!(report.data["activeLast5Min"], 0);
    }

    #[test]
    fn test_daily_activity_outlives_hourly_prune() {
        let (m, _) = monitor();
        let start = Instant::now();
        m.monitor_access_at(&req("10.0.0.8"), start);

        let two_hours = start + Duration::from_secs(2 * 60 * 60);
        m.cleanup_at(two_hours);
        let stats = m.stats_at(two_hours);
        assert_eq!(stats.total_ips, 0);
        assert_eq!(stats.active_last_hour, 0);
        assert_eq!(stats.active_last_day, 1);

        let next_day = start + Duration::from_secs(25 * 60 * 60);
        m.cleanup_at(next_day);
        assert_eq!(m.stats_at(next_day).active_last_day, 0);
    }
}
