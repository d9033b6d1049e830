//! Configuration module for SignalTrail.
//!
//! Loads process configuration from environment variables with sensible
//! defaults. Interval and probe-target settings that the collector can change
//! at runtime live in [`crate::settings`] instead.

use std::env;
use std::time::Duration;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the remote collector (default: "http://localhost:8000")
    pub server_url: String,
    /// Path to the SQLite database file (default: "signaltrail.db")
    pub db_path: String,
    /// HTTP port for the status API (default: 8080)
    pub http_port: u16,
    /// Login credentials used when no session is stored.
    pub email: Option<String>,
    pub password: Option<String>,
    /// Destination for the SMS probe; empty disables delivery.
    pub sms_number: String,
    pub sms_text: String,
    pub throughput_url: String,
    pub dns_domain: String,
    /// Timeout applied to every request to the collector and to each probe.
    pub request_timeout: Duration,
    /// Fixed position for hosts without a location provider.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            db_path: "signaltrail.db".to_string(),
            http_port: 8080,
            email: None,
            password: None,
            sms_number: String::new(),
            sms_text: "Hello! This is a Message for SMS test!".to_string(),
            throughput_url: "https://www.google.com".to_string(),
            dns_domain: "www.digikala.com".to_string(),
            request_timeout: Duration::from_secs(10),
            latitude: None,
            longitude: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SIGNALTRAIL_SERVER_URL`: collector base URL
    /// - `SIGNALTRAIL_DB_PATH`: database file path (default: "signaltrail.db")
    /// - `SIGNALTRAIL_HTTP_PORT`: status API port (default: 8080)
    /// - `SIGNALTRAIL_EMAIL` / `SIGNALTRAIL_PASSWORD`: login credentials
    /// - `SIGNALTRAIL_SMS_NUMBER` / `SIGNALTRAIL_SMS_TEXT`: SMS probe target
    /// - `SIGNALTRAIL_THROUGHPUT_URL`: download used by the throughput probe
    /// - `SIGNALTRAIL_DNS_DOMAIN`: name resolved by the DNS probe
    /// - `SIGNALTRAIL_REQUEST_TIMEOUT_SECS`: per-request timeout (default: 10)
    /// - `SIGNALTRAIL_LATITUDE` / `SIGNALTRAIL_LONGITUDE`: fixed position
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(url) = env::var("SIGNALTRAIL_SERVER_URL") {
            cfg.server_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(db_path) = env::var("SIGNALTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(port_str) = env::var("SIGNALTRAIL_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        cfg.email = env::var("SIGNALTRAIL_EMAIL").ok().filter(|s| !s.is_empty());
        cfg.password = env::var("SIGNALTRAIL_PASSWORD").ok().filter(|s| !s.is_empty());

        if let Ok(number) = env::var("SIGNALTRAIL_SMS_NUMBER") {
            cfg.sms_number = number.trim().to_string();
        }

        if let Ok(text) = env::var("SIGNALTRAIL_SMS_TEXT") {
            cfg.sms_text = text;
        }

        if let Ok(url) = env::var("SIGNALTRAIL_THROUGHPUT_URL") {
            cfg.throughput_url = url;
        }

        if let Ok(domain) = env::var("SIGNALTRAIL_DNS_DOMAIN") {
            cfg.dns_domain = domain;
        }

        if let Ok(secs) = env::var("SIGNALTRAIL_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                if secs > 0 {
                    cfg.request_timeout = Duration::from_secs(secs);
                }
            }
        }

        cfg.latitude = env::var("SIGNALTRAIL_LATITUDE").ok().and_then(|v| v.parse().ok());
        cfg.longitude = env::var("SIGNALTRAIL_LONGITUDE").ok().and_then(|v| v.parse().ok());

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "signaltrail.db");
        assert!(cfg.sms_number.is_empty());
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
    }
}
