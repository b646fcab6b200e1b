use crate::endpoint::Families;
use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use std::net::Ipv6Addr;

/// Detect which address families this host can plausibly reach the internet with.
///
/// IPv4 counts when any non-loopback IPv4 address exists; IPv6 only when a global unicast
/// address (2000::/3) is configured, since link-local and ULA addresses cannot reach public edges.
pub fn detect_families() -> Result<Families> {
    let mut families = Families {
        ipv4: false,
        ipv6: false,
    };
    for iface in get_if_addrs()? {
        match iface.addr {
            IfAddr::V4(v4) if !v4.ip.is_loopback() => families.ipv4 = true,
            IfAddr::V6(v6) if is_global_unicast(v6.ip) => families.ipv6 = true,
            _ => {}
        }
    }
    Ok(families)
}

/// True for addresses inside 2000::/3.
pub fn is_global_unicast(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xe000) == 0x2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_unicast_classification() {
        assert!(is_global_unicast("2606:4700:d0::a29f:c001".parse().unwrap()));
        assert!(is_global_unicast("2001:4860:4860::8888".parse().unwrap()));
        assert!(!is_global_unicast("fe80::1".parse().unwrap()));
        assert!(!is_global_unicast("fd00::1".parse().unwrap()));
        assert!(!is_global_unicast(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn detection_does_not_fail() {
        assert!(detect_families().is_ok());
    }
}
