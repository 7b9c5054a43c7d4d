use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::models::event::EventKind;
use crate::models::request::GateRequest;
use crate::models::threat::{GateDecision, ThreatReason};
use crate::storage::event_log::EventLog;

use super::anti_clone::AccessMonitor;
use super::firewall::Firewall;
use super::rate_limiter::RateLimiter;

/// The request gate: firewall, rate limiter, access monitor, in that order.
///
/// A firewall storage failure is logged and the request continues; the gate
/// prefers availability over strictness.
pub struct RequestGate {
    pub firewall: Arc<Firewall>,
    pub rate_limiter: Arc<RateLimiter>,
    pub monitor: Arc<AccessMonitor>,
    events: Arc<EventLog>,
}

impl RequestGate {
    pub fn new(
        firewall: Arc<Firewall>,
        rate_limiter: Arc<RateLimiter>,
        monitor: Arc<AccessMonitor>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            firewall,
            rate_limiter,
            monitor,
            events,
        }
    }

    pub fn evaluate(&self, req: &GateRequest) -> GateDecision {
        // Stage 1: firewall
        match self.firewall.analyze(req) {
            Ok(GateDecision::Allow) => {}
            Ok(reject) => return reject,
            Err(e) => {
                warn!(ip = %req.client_ip, error = %e, "Firewall error, failing open");
                self.events.record(
                    EventKind::GateError,
                    json!({ "stage": "firewall", "ip": req.client_ip.to_string(), "error": e.to_string() }),
                );
            }
        }

        // Stage 2: rate tiers
        if let Err(limited) = self
            .rate_limiter
            .check_request(&req.method, &req.path, req.client_ip)
        {
            self.events.record(
                EventKind::RateLimitExceeded,
                json!({
                    "ip": req.client_ip.to_string(),
                    "tier": limited.tier.as_str(),
                    "url": req.original_url(),
                    "retryAfterSecs": limited.retry_after.as_secs(),
                }),
            );
            return GateDecision::reject(ThreatReason::RateLimit, limited.tier.message());
        }

        // Stage 3: monitor only
        let diag = self.monitor.monitor_access(req);
        debug!(
            ip = %req.client_ip,
            path = %req.path,
            requests_last_minute = diag.requests_last_minute,
            "Request passed gate"
        );

        GateDecision::Allow
    }
}
