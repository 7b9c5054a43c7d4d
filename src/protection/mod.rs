pub mod anti_clone;
pub mod firewall;
pub mod geoip;
pub mod pipeline;
pub mod rate_limiter;
