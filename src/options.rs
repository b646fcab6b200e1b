use crate::defaults::{self, DEFAULT_HANDSHAKE_PORT, DEFAULT_TCP_PING_PORT};
use crate::endpoint::{self, Families};
use crate::error::ScanError;
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Key material for the handshake probe, base64-encoded as handed out by the key provider.
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeCredentials {
    pub private_key: String,
    pub peer_public_key: String,
    pub preshared_key: Option<String>,
}

impl fmt::Debug for HandshakeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeCredentials")
            .field("private_key", &"<redacted>")
            .field("peer_public_key", &self.peer_public_key)
            .field("preshared_key", &self.preshared_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Scanner configuration. Frozen once a scan starts.
#[derive(Debug, Clone)]
pub struct ScannerOptions {
    pub use_ipv4: bool,
    pub use_ipv6: bool,
    pub cidr_list: Vec<IpNet>,
    /// Explicit candidates, bypassing sampling.
    pub custom_endpoints: Vec<SocketAddr>,
    /// Non-empty switches the engine into dedicated port-scan mode.
    pub test_ports_for_ips: BTreeMap<IpAddr, Vec<u16>>,
    /// Worker-pool size of every pipeline stage.
    pub concurrent_scanners: usize,
    /// Samples taken from each /24 (IPv4) or /120 (IPv6) unit.
    pub bucket_size: usize,
    pub icmp_ping: bool,
    pub tcp_ping: bool,
    pub tcp_ping_port: u16,
    pub icmp_ping_filter_rtt: Duration,
    pub tcp_ping_filter_rtt: Duration,
    pub connection_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Result queue capacity; 0 means unbounded.
    pub ip_queue_size: usize,
    /// Stop once this many endpoints are queued; 0 disables early stop.
    pub stop_on_first_good_ips: usize,
    pub scan_timeout: Option<Duration>,
    /// Handshake port for candidates without one; 0 picks from `default_scan_ports`.
    pub port: u16,
    pub default_scan_ports: Vec<u16>,
    pub credentials: Option<HandshakeCredentials>,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            use_ipv4: true,
            use_ipv6: true,
            cidr_list: Vec::new(),
            custom_endpoints: Vec::new(),
            test_ports_for_ips: BTreeMap::new(),
            concurrent_scanners: 100,
            bucket_size: 5,
            icmp_ping: false,
            tcp_ping: true,
            tcp_ping_port: DEFAULT_TCP_PING_PORT,
            icmp_ping_filter_rtt: Duration::from_millis(400),
            tcp_ping_filter_rtt: Duration::from_millis(300),
            connection_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(1),
            ip_queue_size: 0xFFFF,
            stop_on_first_good_ips: 0,
            scan_timeout: None,
            port: DEFAULT_HANDSHAKE_PORT,
            default_scan_ports: defaults::warp_ports(),
            credentials: None,
        }
    }
}

impl ScannerOptions {
    pub fn builder() -> ScannerOptionsBuilder {
        ScannerOptionsBuilder::default()
    }

    pub fn families(&self) -> Families {
        Families {
            ipv4: self.use_ipv4,
            ipv6: self.use_ipv6,
        }
    }

    pub fn is_port_scan(&self) -> bool {
        !self.test_ports_for_ips.is_empty()
    }

    /// Check invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ScanError> {
        if !self.use_ipv4 && !self.use_ipv6 {
            return Err(ScanError::NoFamilies);
        }
        if self.concurrent_scanners == 0 {
            return Err(invalid("concurrent_scanners", "must be at least 1"));
        }
        if self.bucket_size == 0 {
            return Err(invalid("bucket_size", "must be at least 1"));
        }
        if self.connection_timeout.is_zero() {
            return Err(invalid("connection_timeout", "must be non-zero"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(invalid("handshake_timeout", "must be non-zero"));
        }
        if self.port == 0 && self.default_scan_ports.is_empty() {
            return Err(invalid("default_scan_ports", "empty while port is 0"));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: &str) -> ScanError {
    ScanError::InvalidOption {
        name,
        reason: reason.to_string(),
    }
}

/// Builds a validated [`ScannerOptions`].
///
/// String-based endpoint setters resolve against the families and port configured so far,
/// so set those first.
#[derive(Debug, Clone, Default)]
pub struct ScannerOptionsBuilder {
    opts: ScannerOptions,
}

impl ScannerOptionsBuilder {
    pub fn use_ipv4(mut self, enable: bool) -> Self {
        self.opts.use_ipv4 = enable;
        self
    }

    pub fn use_ipv6(mut self, enable: bool) -> Self {
        self.opts.use_ipv6 = enable;
        self
    }

    pub fn cidr_list(mut self, list: Vec<IpNet>) -> Self {
        self.opts.cidr_list = list;
        self
    }

    pub fn append_cidr(mut self, cidr: IpNet) -> Self {
        self.opts.cidr_list.push(cidr);
        self
    }

    pub fn custom_endpoints(mut self, endpoints: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.opts.custom_endpoints.extend(endpoints);
        self
    }

    /// Accepts `ip:port`, a bare IP, `host:port`, a bare host, or a comma-separated list of those.
    pub fn custom_endpoint_str(mut self, input: &str) -> Self {
        let found = endpoint::parse_endpoints(input, self.opts.port, self.opts.families());
        self.opts.custom_endpoints.extend(found);
        self
    }

    pub fn test_ports_for_ip(mut self, ip: IpAddr, ports: Vec<u16>) -> Self {
        self.opts.test_ports_for_ips.insert(ip, ports);
        self
    }

    /// Like [`Self::test_ports_for_ip`] but resolves hostnames.
    pub fn test_endpoint_ports(mut self, host_or_ip: &str, ports: Vec<u16>) -> Self {
        for ip in endpoint::resolve_host(host_or_ip, self.opts.families()) {
            self.opts.test_ports_for_ips.insert(ip, ports.clone());
        }
        self
    }

    pub fn concurrent_scanners(mut self, n: usize) -> Self {
        self.opts.concurrent_scanners = n;
        self
    }

    pub fn bucket_size(mut self, n: usize) -> Self {
        self.opts.bucket_size = n;
        self
    }

    pub fn icmp_ping(mut self, enable: bool) -> Self {
        self.opts.icmp_ping = enable;
        self
    }

    pub fn tcp_ping(mut self, enable: bool) -> Self {
        self.opts.tcp_ping = enable;
        self
    }

    pub fn tcp_ping_port(mut self, port: u16) -> Self {
        self.opts.tcp_ping_port = port;
        self
    }

    pub fn icmp_ping_filter_rtt(mut self, rtt: Duration) -> Self {
        self.opts.icmp_ping_filter_rtt = rtt;
        self
    }

    pub fn tcp_ping_filter_rtt(mut self, rtt: Duration) -> Self {
        self.opts.tcp_ping_filter_rtt = rtt;
        self
    }

    pub fn connection_timeout(mut self, t: Duration) -> Self {
        self.opts.connection_timeout = t;
        self
    }

    pub fn handshake_timeout(mut self, t: Duration) -> Self {
        self.opts.handshake_timeout = t;
        self
    }

    pub fn ip_queue_size(mut self, n: usize) -> Self {
        self.opts.ip_queue_size = n;
        self
    }

    pub fn stop_on_first_good_ips(mut self, n: usize) -> Self {
        self.opts.stop_on_first_good_ips = n;
        self
    }

    /// Zero disables the overall deadline.
    pub fn scan_timeout(mut self, t: Duration) -> Self {
        self.opts.scan_timeout = (!t.is_zero()).then_some(t);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.opts.port = port;
        self
    }

    pub fn default_scan_ports(mut self, ports: Vec<u16>) -> Self {
        if !ports.is_empty() {
            self.opts.default_scan_ports = ports;
        }
        self
    }

    pub fn credentials(mut self, creds: HandshakeCredentials) -> Self {
        self.opts.credentials = Some(creds);
        self
    }

    pub fn build(mut self) -> Result<ScannerOptions, ScanError> {
        if self.opts.cidr_list.is_empty()
            && self.opts.custom_endpoints.is_empty()
            && self.opts.test_ports_for_ips.is_empty()
        {
            tracing::debug!("no targets configured, using default WARP ranges");
            self.opts.cidr_list = defaults::warp_prefixes();
        }
        self.opts.validate()?;
        Ok(self.opts)
    }
}
