//! Parsing of user-supplied endpoints and port-test targets.
//!
//! Hostnames are resolved once, at configuration time, with the system resolver.

use crate::defaults::DEFAULT_HANDSHAKE_PORT;
use crate::error::ScanError;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

/// Which address families a scan may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Families {
    pub ipv4: bool,
    pub ipv6: bool,
}

impl Families {
    pub fn allows(&self, ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(_) => self.ipv4,
            IpAddr::V6(_) => self.ipv6,
        }
    }
}

/// Parse a comma-separated endpoint list. Entries that fail are logged and skipped.
pub fn parse_endpoints(input: &str, default_port: u16, families: Families) -> Vec<SocketAddr> {
    let mut out = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match parse_endpoint(part, default_port, families) {
            Ok(addrs) => {
                tracing::debug!(endpoint = part, count = addrs.len(), "added custom endpoint");
                out.extend(addrs);
            }
            Err(e) => tracing::warn!(endpoint = part, error = %e, "skipping custom endpoint"),
        }
    }
    out
}

/// Parse one endpoint: `ip:port`, `[v6]:port`, bare IP, `host:port` or bare host.
///
/// Literal `ip:port` is taken verbatim. Everything else gets `default_port` (or 2408 when that
/// is 0) if no port is given, and resolved names keep only addresses of enabled families.
pub fn parse_endpoint(
    input: &str,
    default_port: u16,
    families: Families,
) -> Result<Vec<SocketAddr>, ScanError> {
    let port = if default_port == 0 {
        DEFAULT_HANDSHAKE_PORT
    } else {
        default_port
    };

    if let Ok(sa) = input.parse::<SocketAddr>() {
        return Ok(vec![sa]);
    }
    if let Ok(ip) = input.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let (host, port) = match input.rsplit_once(':') {
        Some((h, p)) if !h.contains(':') => {
            let p = p.parse::<u16>().map_err(|e| ScanError::InvalidEndpoint {
                endpoint: input.to_string(),
                reason: format!("bad port {p}: {e}"),
            })?;
            (h, p)
        }
        _ => (input, port),
    };

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| ScanError::InvalidEndpoint {
            endpoint: input.to_string(),
            reason: e.to_string(),
        })?
        .filter(|sa| families.allows(&sa.ip()))
        .collect();

    if addrs.is_empty() {
        return Err(ScanError::InvalidEndpoint {
            endpoint: input.to_string(),
            reason: "resolved, but no address matches the enabled families".into(),
        });
    }
    Ok(dedup(addrs))
}

/// Resolve a literal IP or hostname to the addresses usable under `families`.
pub fn resolve_host(host_or_ip: &str, families: Families) -> Vec<IpAddr> {
    if let Ok(ip) = host_or_ip.parse::<IpAddr>() {
        return vec![ip];
    }
    match (host_or_ip, 0u16).to_socket_addrs() {
        Ok(iter) => {
            let ips: Vec<IpAddr> = dedup(
                iter.map(|sa| sa.ip())
                    .filter(|ip| families.allows(ip))
                    .collect(),
            );
            if ips.is_empty() {
                tracing::warn!(host = host_or_ip, "no resolved address matches the enabled families");
            }
            ips
        }
        Err(e) => {
            tracing::warn!(host = host_or_ip, error = %e, "failed to resolve host, skipping");
            Vec::new()
        }
    }
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: Families = Families {
        ipv4: true,
        ipv6: true,
    };

    #[test]
    fn literal_addr_port_is_verbatim() {
        let v = parse_endpoint("188.114.98.75:987", 2408, BOTH).unwrap();
        assert_eq!(v, vec!["188.114.98.75:987".parse().unwrap()]);
        let v = parse_endpoint("[2606:4700:d0::1]:500", 2408, BOTH).unwrap();
        assert_eq!(v, vec!["[2606:4700:d0::1]:500".parse().unwrap()]);
    }

    #[test]
    fn bare_ip_gets_default_port() {
        let v = parse_endpoint("1.2.3.4", 0, BOTH).unwrap();
        assert_eq!(v, vec!["1.2.3.4:2408".parse().unwrap()]);
        let v = parse_endpoint("[::1]", 4500, BOTH).unwrap();
        assert_eq!(v, vec!["[::1]:4500".parse().unwrap()]);
    }

    #[test]
    fn comma_list_skips_bad_entries() {
        let v = parse_endpoints("1.1.1.1:1, ,2.2.2.2:2,host.invalid:x", 2408, BOTH);
        assert_eq!(
            v,
            vec!["1.1.1.1:1".parse().unwrap(), "2.2.2.2:2".parse().unwrap()]
        );
    }

    #[test]
    fn localhost_resolves_with_family_filter() {
        let v4_only = Families {
            ipv4: true,
            ipv6: false,
        };
        let v = parse_endpoint("localhost:80", 2408, v4_only).unwrap();
        assert!(v.iter().all(|sa| sa.is_ipv4() && sa.port() == 80));
        assert!(v.contains(&"127.0.0.1:80".parse().unwrap()));
    }

    #[test]
    fn resolve_host_accepts_literals() {
        assert_eq!(
            resolve_host("10.0.0.1", BOTH),
            vec!["10.0.0.1".parse::<IpAddr>().unwrap()]
        );
    }
}
