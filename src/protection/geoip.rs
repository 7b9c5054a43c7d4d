use std::net::IpAddr;
use std::path::Path;

use tracing::{info, warn};

/// Country lookup used by the firewall. A trait so the gate can run without
/// a database file and tests can pin countries to addresses.
pub trait CountryResolver: Send + Sync {
    /// ISO 3166 alpha-2 code, uppercase.
    fn country(&self, ip: IpAddr) -> Option<String>;
}

/// Resolver that knows nothing. Used when no database is configured.
pub struct NoGeo;

impl CountryResolver for NoGeo {
    fn country(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}

/// MaxMind country (or city) database reader.
pub struct GeoIpLookup {
    reader: Option<maxminddb::Reader<Vec<u8>>>,
}

#[derive(serde::Deserialize, Debug)]
struct GeoIpCountry {
    country: Option<CountryRecord>,
}

#[derive(serde::Deserialize, Debug)]
struct CountryRecord {
    iso_code: Option<String>,
}

impl GeoIpLookup {
    /// Open the database at `path`. A missing or unreadable file leaves the
    /// lookup empty and every query returns `None`.
    pub fn new(path: &str) -> Self {
        let reader = if Path::new(path).exists() {
            match maxminddb::Reader::open_readfile(path) {
                Ok(reader) => {
                    info!(path, "GeoIP country database loaded");
                    Some(reader)
                }
                Err(e) => {
                    warn!(path, error = %e, "Failed to load GeoIP country database");
                    None
                }
            }
        } else {
            warn!(path, "GeoIP country database file not found, country blocking disabled");
            None
        };

        Self { reader }
    }

    pub fn is_loaded(&self) -> bool {
        self.reader.is_some()
    }
}

impl CountryResolver for GeoIpLookup {
    fn country(&self, ip: IpAddr) -> Option<String> {
        let reader = self.reader.as_ref()?;

        match reader.lookup::<GeoIpCountry>(ip) {
            Ok(result) => result
                .country
                .and_then(|c| c.iso_code)
                .map(|code| code.to_uppercase()),
            Err(e) => {
                if !matches!(e, maxminddb::MaxMindDBError::AddressNotFoundError(_)) {
                    warn!(ip = %ip, error = %e, "GeoIP country lookup error");
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_database_resolves_nothing() {
        let geo = GeoIpLookup::new("/nonexistent/GeoLite2-Country.mmdb");
        assert!(!geo.is_loaded());
        assert!(geo.country("8.8.8.8".parse().unwrap()).is_none());
        assert!(NoGeo.country("8.8.8.8".parse().unwrap()).is_none());
    }
}
