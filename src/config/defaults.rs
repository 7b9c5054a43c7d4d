use super::settings::{
    AdminConfig, GatePolicy, GeoipConfig, LoggingConfig, RateLimitTiers, RateTierConfig,
    ServerConfig, StorageConfig, UploadConfig,
};

// ---------------------------------------------------------------------------
// Top-level struct defaults
// ---------------------------------------------------------------------------

pub fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind: default_bind(),
        static_dir: default_static_dir(),
        development: false,
        trusted_proxies: Vec::new(),
        body_limit_bytes: default_body_limit_bytes(),
    }
}

pub fn default_admin_config() -> AdminConfig {
    AdminConfig {
        username: default_admin_username(),
        password_hash: default_admin_password_hash(),
        token_secret: String::new(),
        token_ttl_secs: default_token_ttl_secs(),
        token_issuer: default_token_issuer(),
    }
}

pub fn default_gate_policy() -> GatePolicy {
    GatePolicy {
        suspicious_patterns: default_suspicious_patterns(),
        scanner_agents: default_scanner_agents(),
        blocked_countries: Vec::new(),
        suspicious_threshold: default_suspicious_threshold(),
        rate_limits: default_rate_limits(),
        domain_whitelist: default_domain_whitelist(),
        scraping_threshold: default_scraping_threshold(),
        history_cap: default_history_cap(),
        report_interval_secs: default_report_interval_secs(),
        event_log_cap: default_event_log_cap(),
    }
}

pub fn default_geoip_config() -> GeoipConfig {
    GeoipConfig {
        country_db: default_country_db(),
    }
}

pub fn default_upload_config() -> UploadConfig {
    UploadConfig {
        dir: default_upload_dir(),
        max_file_size: default_max_file_size(),
        max_files: default_max_files(),
    }
}

pub fn default_storage_config() -> StorageConfig {
    StorageConfig {
        sqlite_path: default_sqlite_path(),
    }
}

pub fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file: default_log_file(),
    }
}

// ---------------------------------------------------------------------------
// ServerConfig field defaults
// ---------------------------------------------------------------------------

pub fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

pub fn default_static_dir() -> String {
    "public".to_string()
}

pub fn default_body_limit_bytes() -> usize {
    1_048_576
}

// ---------------------------------------------------------------------------
// AdminConfig field defaults
// ---------------------------------------------------------------------------

pub fn default_admin_username() -> String {
    "admin".to_string()
}

/// Hash of `change-me`. Startup warns while this is in use.
pub fn default_admin_password_hash() -> String {
    crate::auth::password::hash_password_with_salt(DEFAULT_ADMIN_PASSWORD, b"sitewarden-default", 10_000)
}

pub const DEFAULT_ADMIN_PASSWORD: &str = "change-me";

pub fn default_token_ttl_secs() -> u64 {
    24 * 60 * 60
}

pub fn default_token_issuer() -> String {
    "sitewarden".to_string()
}

// ---------------------------------------------------------------------------
// GatePolicy field defaults
// ---------------------------------------------------------------------------

pub fn default_suspicious_patterns() -> Vec<String> {
    vec![
        r"(?i)\b(union|select|insert|delete|drop|create|alter|exec|script)\b".to_string(),
        r"(?is)<script[^>]*>.*?</script>".to_string(),
        r"(?i)javascript:".to_string(),
        r"(?i)vbscript:".to_string(),
        r"(?i)onload|onerror|onclick".to_string(),
    ]
}

pub fn default_scanner_agents() -> Vec<String> {
    [
        "sqlmap",
        "nikto",
        "nmap",
        "masscan",
        "zap",
        "burp",
        "wget",
        "curl",
        "python-requests",
        "go-http-client",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn default_suspicious_threshold() -> u32 {
    5
}

pub fn default_rate_limits() -> RateLimitTiers {
    RateLimitTiers {
        general: default_general_tier(),
        admin: default_admin_tier(),
        contact: default_contact_tier(),
    }
}

pub fn default_general_tier() -> RateTierConfig {
    RateTierConfig {
        window_secs: 15 * 60,
        max_requests: 100,
    }
}

pub fn default_admin_tier() -> RateTierConfig {
    RateTierConfig {
        window_secs: 15 * 60,
        max_requests: 10,
    }
}

pub fn default_contact_tier() -> RateTierConfig {
    RateTierConfig {
        window_secs: 60 * 60,
        max_requests: 5,
    }
}

pub fn default_domain_whitelist() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

pub fn default_scraping_threshold() -> usize {
    50
}

pub fn default_history_cap() -> usize {
    100
}

pub fn default_report_interval_secs() -> u64 {
    5 * 60
}

pub fn default_event_log_cap() -> usize {
    1_000
}

// ---------------------------------------------------------------------------
// Remaining field defaults
// ---------------------------------------------------------------------------

pub fn default_country_db() -> String {
    "data/GeoLite2-Country.mmdb".to_string()
}

pub fn default_upload_dir() -> String {
    "uploads".to_string()
}

pub fn default_max_file_size() -> usize {
    10 * 1024 * 1024
}

pub fn default_max_files() -> usize {
    5
}

pub fn default_sqlite_path() -> String {
    "data/sitewarden.db".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_file() -> String {
    "logs/sitewarden.log".to_string()
}
