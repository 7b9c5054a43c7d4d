use std::fmt;

use serde::{Deserialize, Serialize};

/// Why the gate turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreatReason {
    /// IP already present in the blocked set.
    BlockedIp,
    /// Origin country is on the block-list.
    BlockedCountry,
    /// URL, query or body matched a suspicious pattern.
    SuspiciousPattern,
    /// A rate tier ceiling was exceeded.
    RateLimit,
}

impl fmt::Display for ThreatReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatReason::BlockedIp => write!(f, "IP blocked"),
            ThreatReason::BlockedCountry => write!(f, "Country blocked"),
            ThreatReason::SuspiciousPattern => write!(f, "Suspicious patterns detected"),
            ThreatReason::RateLimit => write!(f, "Rate limit exceeded"),
        }
    }
}

impl ThreatReason {
    /// Machine-readable code carried in the 403 body.
    pub fn code(&self) -> &'static str {
        match self {
            ThreatReason::BlockedIp
            | ThreatReason::BlockedCountry
            | ThreatReason::SuspiciousPattern => "FIREWALL_BLOCKED",
            ThreatReason::RateLimit => "RATE_LIMITED",
        }
    }
}

/// Outcome of running the gate over one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Reject { reason: ThreatReason, message: String },
}

impl GateDecision {
    pub fn reject(reason: ThreatReason, message: impl Into<String>) -> Self {
        GateDecision::Reject {
            reason,
            message: message.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(ThreatReason::BlockedIp.code(), "FIREWALL_BLOCKED");
        assert_eq!(ThreatReason::SuspiciousPattern.code(), "FIREWALL_BLOCKED");
        assert_eq!(ThreatReason::RateLimit.code(), "RATE_LIMITED");
    }
}
