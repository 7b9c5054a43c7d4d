use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every kind of entry the event log accepts. Security and analytics
/// events share one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BlockedIpAttempt,
    BlockedCountry,
    SuspiciousUserAgent,
    SuspiciousRequest,
    IpBlocked,
    IpUnblocked,
    RateLimitExceeded,
    UnauthorizedDomainAccess,
    SuspiciousReferer,
    PotentialScraping,
    AccessReport,
    GateError,
    AuthSuccess,
    AuthFailed,
    InvalidToken,
    PageView,
    ContactFormSubmit,
    SiteSettingsUpdated,
    ServiceAdded,
    ServiceUpdated,
    ServiceDeleted,
    ContactStatusUpdated,
    DataRestored,
    FileUploaded,
    FileDeleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BlockedIpAttempt => "blocked_ip_attempt",
            EventKind::BlockedCountry => "blocked_country",
            EventKind::SuspiciousUserAgent => "suspicious_user_agent",
            EventKind::SuspiciousRequest => "suspicious_request",
            EventKind::IpBlocked => "ip_blocked",
            EventKind::IpUnblocked => "ip_unblocked",
            EventKind::RateLimitExceeded => "rate_limit_exceeded",
            EventKind::UnauthorizedDomainAccess => "unauthorized_domain_access",
            EventKind::SuspiciousReferer => "suspicious_referer",
            EventKind::PotentialScraping => "potential_scraping",
            EventKind::AccessReport => "access_report",
            EventKind::GateError => "gate_error",
            EventKind::AuthSuccess => "auth_success",
            EventKind::AuthFailed => "auth_failed",
            EventKind::InvalidToken => "invalid_token",
            EventKind::PageView => "page_view",
            EventKind::ContactFormSubmit => "contact_form_submit",
            EventKind::SiteSettingsUpdated => "site_settings_updated",
            EventKind::ServiceAdded => "service_added",
            EventKind::ServiceUpdated => "service_updated",
            EventKind::ServiceDeleted => "service_deleted",
            EventKind::ContactStatusUpdated => "contact_status_updated",
            EventKind::DataRestored => "data_restored",
            EventKind::FileUploaded => "file_uploaded",
            EventKind::FileDeleted => "file_deleted",
        }
    }

    /// Pattern and country hits are high; rate and suspicious-client hits
    /// are medium; everything else is low.
    pub fn severity(&self) -> Severity {
        match self {
            EventKind::SuspiciousRequest | EventKind::BlockedCountry => Severity::High,
            EventKind::RateLimitExceeded
            | EventKind::SuspiciousUserAgent
            | EventKind::PotentialScraping => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One appended log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
}

impl SecurityEvent {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            event: kind.as_str().to_string(),
            data,
            timestamp: Utc::now(),
            severity: kind.severity(),
        }
    }
}
