use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::defaults;

/// Top-level configuration for the sitewarden server.
/// Deserializes from a TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "defaults::default_server_config")]
    pub server: ServerConfig,

    #[serde(default = "defaults::default_admin_config")]
    pub admin: AdminConfig,

    #[serde(default = "defaults::default_gate_policy")]
    pub gate: GatePolicy,

    #[serde(default = "defaults::default_geoip_config")]
    pub geoip: GeoipConfig,

    #[serde(default = "defaults::default_upload_config")]
    pub upload: UploadConfig,

    #[serde(default = "defaults::default_storage_config")]
    pub storage: StorageConfig,

    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load configuration from a TOML file at the given path, then apply
    /// environment overrides. A missing file yields the built-in defaults.
    pub fn load(path: &str) -> Result<Self> {
        let mut settings = if Path::new(path).exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            toml::from_str::<Settings>(&content)
                .with_context(|| format!("Failed to parse config file: {}", path))?
        } else {
            Settings::default()
        };

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Secrets and credentials come from the environment when present.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SITEWARDEN_ADMIN_USERNAME") {
            self.admin.username = v;
        }
        if let Ok(v) = std::env::var("SITEWARDEN_ADMIN_PASSWORD_HASH") {
            self.admin.password_hash = v;
        }
        if let Ok(v) = std::env::var("SITEWARDEN_TOKEN_SECRET") {
            self.admin.token_secret = v;
        }
        if let Ok(v) = std::env::var("SITEWARDEN_DEV") {
            self.server.development = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.admin.username.trim().is_empty() {
            bail!("admin.username must not be empty");
        }
        if self.admin.token_ttl_secs == 0 {
            bail!("admin.token_ttl_secs must be greater than zero");
        }
        for (name, tier) in [
            ("general", &self.gate.rate_limits.general),
            ("admin", &self.gate.rate_limits.admin),
            ("contact", &self.gate.rate_limits.contact),
        ] {
            if tier.window_secs == 0 || tier.max_requests == 0 {
                bail!("gate.rate_limits.{} needs a non-zero window and ceiling", name);
            }
        }
        if self.gate.history_cap == 0 {
            bail!("gate.history_cap must be greater than zero");
        }
        for net in &self.server.trusted_proxies {
            net.parse::<ipnet::IpNet>()
                .with_context(|| format!("Invalid trusted proxy network: {}", net))?;
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: defaults::default_server_config(),
            admin: defaults::default_admin_config(),
            gate: defaults::default_gate_policy(),
            geoip: defaults::default_geoip_config(),
            upload: defaults::default_upload_config(),
            storage: defaults::default_storage_config(),
            logging: defaults::default_logging_config(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::default_bind")]
    pub bind: String,

    #[serde(default = "defaults::default_static_dir")]
    pub static_dir: String,

    /// Expose internal error details in 500 responses.
    #[serde(default)]
    pub development: bool,

    /// Peers allowed to set `X-Forwarded-For` / `X-Real-IP`.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    #[serde(default = "defaults::default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

/// The single admin identity.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "defaults::default_admin_username")]
    pub username: String,

    /// `pbkdf2-sha256$<iterations>$<salt_hex>$<digest_hex>`
    #[serde(default = "defaults::default_admin_password_hash")]
    pub password_hash: String,

    /// HMAC key for admin tokens. Empty means a random per-process key.
    #[serde(default)]
    pub token_secret: String,

    #[serde(default = "defaults::default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    #[serde(default = "defaults::default_token_issuer")]
    pub token_issuer: String,
}

/// Unified policy for the request gate: firewall, rate limiter and the
/// anti-clone access monitor all read their thresholds from here.
#[derive(Debug, Clone, Deserialize)]
pub struct GatePolicy {
    #[serde(default = "defaults::default_suspicious_patterns")]
    pub suspicious_patterns: Vec<String>,

    #[serde(default = "defaults::default_scanner_agents")]
    pub scanner_agents: Vec<String>,

    /// ISO country codes whose traffic is blocked outright.
    #[serde(default)]
    pub blocked_countries: Vec<String>,

    /// Suspicious user-agent hits before an IP is auto-blocked.
    #[serde(default = "defaults::default_suspicious_threshold")]
    pub suspicious_threshold: u32,

    #[serde(default = "defaults::default_rate_limits")]
    pub rate_limits: RateLimitTiers,

    #[serde(default = "defaults::default_domain_whitelist")]
    pub domain_whitelist: Vec<String>,

    /// Requests per minute from one IP above which it is logged as scraping.
    #[serde(default = "defaults::default_scraping_threshold")]
    pub scraping_threshold: usize,

    #[serde(default = "defaults::default_history_cap")]
    pub history_cap: usize,

    #[serde(default = "defaults::default_report_interval_secs")]
    pub report_interval_secs: u64,

    #[serde(default = "defaults::default_event_log_cap")]
    pub event_log_cap: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitTiers {
    #[serde(default = "defaults::default_general_tier")]
    pub general: RateTierConfig,

    #[serde(default = "defaults::default_admin_tier")]
    pub admin: RateTierConfig,

    #[serde(default = "defaults::default_contact_tier")]
    pub contact: RateTierConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateTierConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

/// GeoIP database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoipConfig {
    #[serde(default = "defaults::default_country_db")]
    pub country_db: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "defaults::default_upload_dir")]
    pub dir: String,

    #[serde(default = "defaults::default_max_file_size")]
    pub max_file_size: usize,

    #[serde(default = "defaults::default_max_files")]
    pub max_files: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::default_sqlite_path")]
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    pub level: String,

    #[serde(default = "defaults::default_log_file")]
    pub file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.gate.rate_limits.general.max_requests, 100);
        assert_eq!(settings.gate.rate_limits.admin.max_requests, 10);
        assert_eq!(settings.gate.rate_limits.contact.window_secs, 3600);
        assert_eq!(settings.gate.suspicious_threshold, 5);
        assert_eq!(settings.gate.history_cap, 100);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_section_override() {
        let settings: Settings = toml::from_str(
            r#"
            [gate]
            scraping_threshold = 30
            blocked_countries = ["XX"]

            [gate.rate_limits.contact]
            window_secs = 60
            max_requests = 2
            "#,
        )
        .unwrap();
        assert_eq!(settings.gate.scraping_threshold, 30);
        assert_eq!(settings.gate.blocked_countries, vec!["XX".to_string()]);
        assert_eq!(settings.gate.rate_limits.contact.max_requests, 2);
        // Untouched tiers keep their defaults.
        assert_eq!(settings.gate.rate_limits.general.window_secs, 900);
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let mut settings = Settings::default();
        settings.gate.rate_limits.admin.max_requests = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_proxy_network() {
        let mut settings = Settings::default();
        settings.server.trusted_proxies = vec!["not-a-network".to_string()];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_sample_config_parses() {
        let settings: Settings =
            toml::from_str(include_str!("../../config/sitewarden.toml")).unwrap();
        assert_eq!(settings.server.trusted_proxies, vec!["127.0.0.1/32".to_string()]);
        assert_eq!(settings.upload.max_files, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let settings = Settings::load("config/does-not-exist.toml").unwrap();
        assert_eq!(settings.server.bind, "0.0.0.0:3000");
        assert_eq!(settings.gate.scraping_threshold, 50);
    }
}
