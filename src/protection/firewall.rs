use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use regex::Regex;
use serde_json::json;
use tracing::warn;

use super::geoip::CountryResolver;
use crate::config::settings::GatePolicy;
use crate::models::event::EventKind;
use crate::models::request::GateRequest;
use crate::models::threat::{GateDecision, ThreatReason};
use crate::storage::blocklist::{BlocklistError, BlocklistManager};
use crate::storage::event_log::EventLog;

/// First stage of the gate: blocked set, country, scanner agents and
/// payload patterns, checked in that order.
pub struct Firewall {
    blocklist: Arc<BlocklistManager>,
    events: Arc<EventLog>,
    geo: Arc<dyn CountryResolver>,
    patterns: Vec<Regex>,
    scanner_agents: Vec<String>,
    blocked_countries: HashSet<String>,
    suspicious_threshold: u32,
    /// Suspicious user-agent hits per IP.
    suspicious: DashMap<IpAddr, u32>,
}

impl Firewall {
    pub fn new(
        policy: &GatePolicy,
        blocklist: Arc<BlocklistManager>,
        events: Arc<EventLog>,
        geo: Arc<dyn CountryResolver>,
    ) -> Result<Self> {
        let patterns = policy
            .suspicious_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid suspicious pattern: {}", p)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            blocklist,
            events,
            geo,
            patterns,
            scanner_agents: policy
                .scanner_agents
                .iter()
                .map(|a| a.to_lowercase())
                .collect(),
            blocked_countries: policy
                .blocked_countries
                .iter()
                .map(|c| c.to_uppercase())
                .collect(),
            suspicious_threshold: policy.suspicious_threshold.max(1),
            suspicious: DashMap::new(),
        })
    }

    pub fn analyze(&self, req: &GateRequest) -> Result<GateDecision, BlocklistError> {
        let ip = req.client_ip;
        let url = req.original_url();

        // 1. Blocked set
        if self.blocklist.is_blocked(&ip).is_some() {
            self.events.record(
                EventKind::BlockedIpAttempt,
                json!({ "ip": ip.to_string(), "url": url, "method": req.method }),
            );
            return Ok(GateDecision::reject(
                ThreatReason::BlockedIp,
                ThreatReason::BlockedIp.to_string(),
            ));
        }

        // 2. Country
        if !self.blocked_countries.is_empty() {
            if let Some(country) = self.geo.country(ip) {
                if self.blocked_countries.contains(&country) {
                    self.block(ip, "blocked_country")?;
                    self.events.record(
                        EventKind::BlockedCountry,
                        json!({ "ip": ip.to_string(), "country": country }),
                    );
                    return Ok(GateDecision::reject(
                        ThreatReason::BlockedCountry,
                        ThreatReason::BlockedCountry.to_string(),
                    ));
                }
            }
        }

        // 3. Scanner user agents: logged and counted, never rejected directly.
        let ua = req.user_agent.as_deref().unwrap_or("");
        if self.is_suspicious_agent(ua) {
            self.events.record(
                EventKind::SuspiciousUserAgent,
                json!({ "ip": ip.to_string(), "userAgent": ua }),
            );
            self.track_suspicious(ip)?;
        }

        // 4. Payload patterns
        let text = req.scan_text();
        if self.patterns.iter().any(|re| re.is_match(&text)) {
            self.events.record(
                EventKind::SuspiciousRequest,
                json!({ "ip": ip.to_string(), "url": url, "method": req.method }),
            );
            self.block(ip, "suspicious_patterns")?;
            return Ok(GateDecision::reject(
                ThreatReason::SuspiciousPattern,
                ThreatReason::SuspiciousPattern.to_string(),
            ));
        }

        Ok(GateDecision::Allow)
    }

    pub fn is_suspicious_agent(&self, user_agent: &str) -> bool {
        let lower = user_agent.to_lowercase();
        self.scanner_agents.iter().any(|a| lower.contains(a.as_str()))
    }

    pub fn suspicious_count(&self, ip: &IpAddr) -> u32 {
        self.suspicious.get(ip).map(|c| *c).unwrap_or(0)
    }

    fn track_suspicious(&self, ip: IpAddr) -> Result<(), BlocklistError> {
        let count = {
            let mut entry = self.suspicious.entry(ip).or_insert(0);
            *entry += 1;
            *entry
        };
        if count >= self.suspicious_threshold {
            warn!(ip = %ip, count, "Suspicious activity threshold reached, blocking IP");
            self.block(ip, "multiple_suspicious_activities")?;
            self.suspicious.remove(&ip);
        }
        Ok(())
    }

    fn block(&self, ip: IpAddr, reason: &str) -> Result<(), BlocklistError> {
        if self.blocklist.block(&ip.to_string(), reason, "firewall")? {
            self.events.record(
                EventKind::IpBlocked,
                json!({ "ip": ip.to_string(), "reason": reason }),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::default_gate_policy;
    use crate::storage::sqlite::SqliteStore;

    struct FixedCountry(&'static str);

    impl CountryResolver for FixedCountry {
        fn country(&self, _ip: IpAddr) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn firewall_with(
        policy: GatePolicy,
        geo: Arc<dyn CountryResolver>,
    ) -> (Firewall, Arc<BlocklistManager>, Arc<EventLog>) {
        let sqlite = Arc::new(SqliteStore::in_memory().unwrap());
        let blocklist = Arc::new(BlocklistManager::new(sqlite.clone()));
        let events = Arc::new(EventLog::new(sqlite, 1000));
        let fw = Firewall::new(&policy, blocklist.clone(), events.clone(), geo).unwrap();
        (fw, blocklist, events)
    }

    fn firewall() -> (Firewall, Arc<BlocklistManager>, Arc<EventLog>) {
        firewall_with(default_gate_policy(), Arc::new(super::super::geoip::NoGeo))
    }

    fn ip() -> IpAddr {
        "203.0.113.10".parse().unwrap()
    }

    #[test]
    fn test_clean_request_allowed() {
        let (fw, _, _) = firewall();
        let req = GateRequest::new(ip(), "GET", "/api/services").with_user_agent("Mozilla/5.0");
        assert_eq!(fw.analyze(&req).unwrap(), GateDecision::Allow);
    }

    #[test]
    fn test_blocked_ip_rejected_on_any_path() {
        let (fw, blocklist, events) = firewall();
        blocklist.block("203.0.113.10", "manual", "admin").unwrap();
        for path in ["/", "/api/services", "/uploads/x.png"] {
            let decision = fw.analyze(&GateRequest::new(ip(), "GET", path)).unwrap();
            assert!(matches!(
                decision,
                GateDecision::Reject { reason: ThreatReason::BlockedIp, .. }
            ));
        }
        assert_eq!(events.count(EventKind::BlockedIpAttempt).unwrap(), 3);
    }

    #[test]
    fn test_pattern_blocks_and_adds_to_set() {
        let (fw, blocklist, events) = firewall();
        let req = GateRequest::new(ip(), "GET", "/api/services").with_query("q=1%20union%20select");
        let req = req.with_body("{\"q\":\"1 UNION SELECT password\"}");
        let decision = fw.analyze(&req).unwrap();
        assert!(matches!(
            decision,
            GateDecision::Reject { reason: ThreatReason::SuspiciousPattern, .. }
        ));
        assert!(blocklist.is_blocked(&ip()).is_some());
        assert_eq!(events.count(EventKind::SuspiciousRequest).unwrap(), 1);
        assert_eq!(events.count(EventKind::IpBlocked).unwrap(), 1);

        let next = fw.analyze(&GateRequest::new(ip(), "GET", "/")).unwrap();
        assert!(matches!(
            next,
            GateDecision::Reject { reason: ThreatReason::BlockedIp, .. }
        ));
    }

    #[test]
    fn test_script_tag_in_body() {
        let (fw, _, _) = firewall();
        let req = GateRequest::new(ip(), "POST", "/api/contact")
            .with_body("{\"message\":\"<script>alert(1)</script>\"}");
        assert!(!fw.analyze(&req).unwrap().is_allowed());
    }

    #[test]
    fn test_sixth_scanner_request_rejected() {
        let (fw, blocklist, events) = firewall();
        for i in 1..=5 {
            let req = GateRequest::new(ip(), "GET", "/").with_user_agent("curl/8.4.0");
            assert!(fw.analyze(&req).unwrap().is_allowed(), "request {} should pass", i);
        }
        assert_eq!(events.count(EventKind::SuspiciousUserAgent).unwrap(), 5);
        assert!(blocklist.is_blocked(&ip()).is_some());

        let sixth = GateRequest::new(ip(), "GET", "/").with_user_agent("Mozilla/5.0");
        assert!(matches!(
            fw.analyze(&sixth).unwrap(),
            GateDecision::Reject { reason: ThreatReason::BlockedIp, .. }
        ));
    }

    #[test]
    fn test_scanner_match_is_case_insensitive() {
        let (fw, _, _) = firewall();
        assert!(fw.is_suspicious_agent("SQLMap/1.7"));
        assert!(fw.is_suspicious_agent("python-requests/2.31"));
        assert!(!fw.is_suspicious_agent("Mozilla/5.0 (X11; Linux x86_64)"));
    }

    #[test]
    fn test_blocked_country() {
        let mut policy = default_gate_policy();
        policy.blocked_countries = vec!["xx".into()];
        let (fw, blocklist, events) = firewall_with(policy, Arc::new(FixedCountry("XX")));

        let decision = fw.analyze(&GateRequest::new(ip(), "GET", "/")).unwrap();
        assert!(matches!(
            decision,
            GateDecision::Reject { reason: ThreatReason::BlockedCountry, .. }
        ));
        assert!(blocklist.is_blocked(&ip()).is_some());
        assert_eq!(events.count(EventKind::BlockedCountry).unwrap(), 1);
    }

    #[test]
    fn test_invalid_pattern_rejected_at_construction() {
        let mut policy = default_gate_policy();
        policy.suspicious_patterns = vec!["(unclosed".into()];
        let sqlite = Arc::new(SqliteStore::in_memory().unwrap());
        let res = Firewall::new(
            &policy,
            Arc::new(BlocklistManager::new(sqlite.clone())),
            Arc::new(EventLog::new(sqlite, 10)),
            Arc::new(super::super::geoip::NoGeo),
        );
        assert!(res.is_err());
    }
}
