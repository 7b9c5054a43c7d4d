use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::config::settings::{RateLimitTiers, RateTierConfig};

/// The three independently configured rate tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateTier {
    General,
    Admin,
    Contact,
}

impl RateTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateTier::General => "general",
            RateTier::Admin => "admin",
            RateTier::Contact => "contact",
        }
    }

    /// Message returned to the client when this tier rejects.
    pub fn message(&self) -> &'static str {
        match self {
            RateTier::General => "Too many requests from this IP, please try again later.",
            RateTier::Admin => "Too many admin requests from this IP, please try again later.",
            RateTier::Contact => "Too many contact form submissions, please try again later.",
        }
    }

    /// Tiers that apply to a request, narrowest last. Only `/api/` traffic
    /// is rate limited.
    pub fn tiers_for(method: &str, path: &str) -> Vec<RateTier> {
        let mut tiers = Vec::new();
        if path == "/api" || path.starts_with("/api/") {
            tiers.push(RateTier::General);
        }
        if path == "/api/admin" || path.starts_with("/api/admin/") {
            tiers.push(RateTier::Admin);
        }
        if method.eq_ignore_ascii_case("POST") && path == "/api/contact" {
            tiers.push(RateTier::Contact);
        }
        tiers
    }
}

#[derive(Debug, Clone, Copy)]
struct Limit {
    window: Duration,
    max_requests: u32,
}

impl From<&RateTierConfig> for Limit {
    fn from(cfg: &RateTierConfig) -> Self {
        Self {
            window: Duration::from_secs(cfg.window_secs),
            max_requests: cfg.max_requests,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FixedWindow {
    started: Instant,
    count: u32,
}

/// Rejection from a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimited {
    pub tier: RateTier,
    pub retry_after: Duration,
}

/// Fixed-window request counter per (tier, IP). The counter resets when the
/// window that opened with the first request elapses.
pub struct RateLimiter {
    general: Limit,
    admin: Limit,
    contact: Limit,
    windows: DashMap<(RateTier, IpAddr), FixedWindow>,
}

impl RateLimiter {
    pub fn new(tiers: &RateLimitTiers) -> Self {
        Self {
            general: (&tiers.general).into(),
            admin: (&tiers.admin).into(),
            contact: (&tiers.contact).into(),
            windows: DashMap::new(),
        }
    }

    fn limit(&self, tier: RateTier) -> Limit {
        match tier {
            RateTier::General => self.general,
            RateTier::Admin => self.admin,
            RateTier::Contact => self.contact,
        }
    }

    /// Count one request against `tier` for `ip` at `now`.
    pub fn check_at(&self, tier: RateTier, ip: IpAddr, now: Instant) -> Result<(), RateLimited> {
        let limit = self.limit(tier);
        let mut entry = self.windows.entry((tier, ip)).or_insert(FixedWindow {
            started: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= limit.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= limit.max_requests {
            let retry_after = limit
                .window
                .saturating_sub(now.saturating_duration_since(entry.started));
            debug!(ip = %ip, tier = tier.as_str(), count = entry.count, "Rate limit exceeded");
            return Err(RateLimited { tier, retry_after });
        }

        entry.count += 1;
        Ok(())
    }

    pub fn check(&self, tier: RateTier, ip: IpAddr) -> Result<(), RateLimited> {
        self.check_at(tier, ip, Instant::now())
    }

    /// Apply every tier relevant to the request; the first rejection wins.
    pub fn check_request(&self, method: &str, path: &str, ip: IpAddr) -> Result<(), RateLimited> {
        for tier in RateTier::tiers_for(method, path) {
            self.check(tier, ip)?;
        }
        Ok(())
    }

    /// Drop windows that have already elapsed.
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|(tier, _), w| {
            now.saturating_duration_since(w.started) < self.limit(*tier).window
        });
        before - self.windows.len()
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
