//! JSON scan configuration file, applied on top of the builder defaults.
//!
//! Every field is optional; durations are in milliseconds and port lists use the
//! [`crate::ports`] syntax.

use crate::options::{HandshakeCredentials, ScannerOptionsBuilder};
use crate::ports;
use anyhow::{Context, Result};
use ipnet::IpNet;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    pub use_ipv4: Option<bool>,
    pub use_ipv6: Option<bool>,
    pub cidr_list: Option<Vec<IpNet>>,
    pub custom_endpoints: Option<Vec<String>>,
    /// Host or IP → port list, e.g. `{"engage.cloudflareclient.com": "500,2408"}`.
    pub test_ports: Option<BTreeMap<String, String>>,
    pub concurrent_scanners: Option<usize>,
    pub bucket_size: Option<usize>,
    pub icmp_ping: Option<bool>,
    pub tcp_ping: Option<bool>,
    pub tcp_ping_port: Option<u16>,
    pub icmp_ping_filter_rtt_ms: Option<u64>,
    pub tcp_ping_filter_rtt_ms: Option<u64>,
    pub connection_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub ip_queue_size: Option<usize>,
    pub stop_on_first_good_ips: Option<usize>,
    pub scan_timeout_ms: Option<u64>,
    pub port: Option<u16>,
    pub default_scan_ports: Option<String>,
    pub private_key: Option<String>,
    pub peer_public_key: Option<String>,
    pub preshared_key: Option<String>,
}

impl ScanConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        Self::parse(&content)
            .with_context(|| format!("invalid config file: {}", path.as_ref().display()))
    }

    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Apply every field except the address families, which callers settle first because
    /// endpoint resolution depends on them.
    pub fn apply(&self, mut b: ScannerOptionsBuilder) -> Result<ScannerOptionsBuilder> {
        if let Some(v) = self.port {
            b = b.port(v);
        }
        if let Some(s) = &self.default_scan_ports {
            b = b.default_scan_ports(ports::parse_ports_str(s).context("default_scan_ports")?);
        }
        if let Some(list) = &self.cidr_list {
            b = b.cidr_list(list.clone());
        }
        for ep in self.custom_endpoints.iter().flatten() {
            b = b.custom_endpoint_str(ep);
        }
        for (host, spec) in self.test_ports.iter().flatten() {
            let list = ports::parse_ports_str(spec).with_context(|| format!("test_ports for {host}"))?;
            b = b.test_endpoint_ports(host, list);
        }
        if let Some(v) = self.concurrent_scanners {
            b = b.concurrent_scanners(v);
        }
        if let Some(v) = self.bucket_size {
            b = b.bucket_size(v);
        }
        if let Some(v) = self.icmp_ping {
            b = b.icmp_ping(v);
        }
        if let Some(v) = self.tcp_ping {
            b = b.tcp_ping(v);
        }
        if let Some(v) = self.tcp_ping_port {
            b = b.tcp_ping_port(v);
        }
        if let Some(ms) = self.icmp_ping_filter_rtt_ms {
            b = b.icmp_ping_filter_rtt(Duration::from_millis(ms));
        }
        if let Some(ms) = self.tcp_ping_filter_rtt_ms {
            b = b.tcp_ping_filter_rtt(Duration::from_millis(ms));
        }
        if let Some(ms) = self.connection_timeout_ms {
            b = b.connection_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.handshake_timeout_ms {
            b = b.handshake_timeout(Duration::from_millis(ms));
        }
        if let Some(v) = self.ip_queue_size {
            b = b.ip_queue_size(v);
        }
        if let Some(v) = self.stop_on_first_good_ips {
            b = b.stop_on_first_good_ips(v);
        }
        if let Some(ms) = self.scan_timeout_ms {
            b = b.scan_timeout(Duration::from_millis(ms));
        }
        if let Some(creds) = self.credentials() {
            b = b.credentials(creds);
        }
        Ok(b)
    }

    /// Credentials when both mandatory keys are present.
    pub fn credentials(&self) -> Option<HandshakeCredentials> {
        Some(HandshakeCredentials {
            private_key: self.private_key.clone()?,
            peer_public_key: self.peer_public_key.clone()?,
            preshared_key: self.preshared_key.clone(),
        })
    }
}
