//! Configuration types for pubsub-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::admin::Credentials;
use crate::name::to_lower_fqdn;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Message-bus connection details for the ingestion source.
    #[serde(default)]
    pub bus: BusConfig,

    /// Path of the embedded record store.
    #[serde(default = "default_pathdb")]
    pub pathdb: PathBuf,

    /// Reject CNAME registrations on apex domains.
    #[serde(default)]
    pub disallow_cname_on_apex: bool,

    /// Allow full zone transfers. Off by default: AXFR requests may leak
    /// the whole domain set.
    #[serde(default)]
    pub allow_axfr: bool,

    /// Inline records loaded at startup, one zone-file line per record.
    #[serde(default)]
    pub local_records: Option<String>,

    /// Admin HTTP surface. Disabled when absent.
    #[serde(default)]
    pub admin: Option<AdminConfig>,

    /// Metrics agent configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Statsd metrics sink. Disabled when absent.
    #[serde(default)]
    pub statsd: Option<StatsdConfig>,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for the DNS server to listen on.
    pub address: SocketAddr,

    /// Serve over UDP.
    #[serde(default = "default_true")]
    pub udp: bool,

    /// Serve over TCP.
    #[serde(default = "default_true")]
    pub tcp: bool,

    /// Authoritative zone suffixes (FQDNs with trailing dot).
    #[serde(default)]
    pub zones: Vec<String>,

    /// Upstream recursive resolver, `host:port` or bare `host` (port 53).
    pub resolver_address: String,
}

impl DnsConfig {
    /// Configured zones in the normal form lookups use.
    pub fn normalized_zones(&self) -> Vec<String> {
        self.zones.iter().map(|z| to_lower_fqdn(z)).collect()
    }
}

/// Message-bus connection details. The concrete client lives outside this
/// crate; these settings are handed to it verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Broker addresses.
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Topics carrying record events.
    #[serde(default)]
    pub topics: Vec<String>,

    /// Enable SASL authentication.
    #[serde(default)]
    pub sasl_enable: bool,

    /// Enable TLS.
    #[serde(default)]
    pub tls_enable: bool,

    /// SASL user.
    #[serde(default)]
    pub user: String,

    /// SASL password.
    #[serde(default)]
    pub password: String,

    /// SASL mechanism (`sha256` or `sha512`).
    #[serde(default)]
    pub mechanism: String,
}

/// Admin HTTP surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Listen address of the admin HTTP server.
    pub address: SocketAddr,

    /// Admin user name. Authentication is enforced only when both
    /// username and password are set.
    #[serde(default)]
    pub username: String,

    /// Admin password.
    #[serde(default)]
    pub password: String,

    /// Secret signing the session tokens.
    #[serde(default)]
    pub jwt_secret: String,
}

impl AdminConfig {
    /// The credential pair, when both halves are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        if self.username.is_empty() || self.password.is_empty() {
            return None;
        }

        Some(Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

/// Metrics agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Number of buffered metrics that triggers a flush.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Flush interval in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl MetricsConfig {
    /// The flush interval as a duration.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

/// Statsd sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsdConfig {
    /// Statsd daemon address.
    pub address: String,

    /// Metric name prefix. Can be empty.
    #[serde(default)]
    pub prefix: String,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. "info", "pubsub_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_pathdb() -> PathBuf {
    PathBuf::from("pubsub-dns.db")
}

fn default_buffer_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_deserializes_with_defaults() {
        let raw = r#"
            [dns]
            address = "127.0.0.1:8053"
            zones = ["rock.", "services.cloud."]
            resolver_address = "9.9.9.9"
        "#;

        let config: Config = toml::from_str(raw).unwrap();

        assert!(config.dns.udp);
        assert!(config.dns.tcp);
        assert!(!config.allow_axfr);
        assert!(!config.disallow_cname_on_apex);
        assert_eq!(config.metrics.buffer_size, 100);
        assert_eq!(config.metrics.flush_interval(), Duration::from_secs(5));
        assert!(config.admin.is_none());
        assert!(config.statsd.is_none());
    }

    #[test]
    fn test_zones_are_normalized() {
        let dns = DnsConfig {
            address: "127.0.0.1:8053".parse().unwrap(),
            udp: true,
            tcp: true,
            zones: vec!["Rock.".to_string(), "services.cloud".to_string()],
            resolver_address: "9.9.9.9".to_string(),
        };

        assert_eq!(
            dns.normalized_zones(),
            vec!["rock.".to_string(), "services.cloud.".to_string()]
        );
    }

    #[test]
    fn test_admin_credentials_require_both_halves() {
        let mut admin = AdminConfig {
            address: "127.0.0.1:8080".parse().unwrap(),
            username: "admin".to_string(),
            password: String::new(),
            jwt_secret: "secret".to_string(),
        };
        assert!(admin.credentials().is_none());

        admin.password = "hunter2".to_string();
        assert!(admin.credentials().is_some());
    }
}
