//! Candidate generation: spatially sampled addresses from CIDR ranges plus explicit endpoints.
//!
//! Ranges are never enumerated exhaustively. IPv4 ranges are walked in /24 units and IPv6 ranges
//! are sampled in randomly drawn /120 units; each unit is split into `bucket_size` equal segments
//! and one address is drawn from every segment.

use crate::error::ScanError;
use crate::lcg::FullPeriodLcg;
use crate::options::ScannerOptions;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

const IPV4_UNIT_PREFIX: u8 = 24;
const IPV6_UNIT_PREFIX: u8 = 120;
const UNIT_SIZE: u64 = 256;
/// Random /120 units drawn from an IPv6 prefix shorter than /120.
pub const IPV6_SAMPLED_UNITS: usize = 100;
/// Offsets tried per segment before giving up on it.
pub const MAX_SEGMENT_ATTEMPTS: u64 = 10;

/// A contiguous block of addresses to segment-sample.
#[derive(Debug, Clone, Copy)]
struct AddrRange {
    start: IpAddr,
    size: u64,
    /// Network and broadcast address to reject, for IPv4 prefixes of /30 and shorter.
    bounds: Option<(Ipv4Addr, Ipv4Addr)>,
}

impl AddrRange {
    fn unit(start: IpAddr) -> Self {
        Self {
            start,
            size: UNIT_SIZE,
            bounds: None,
        }
    }

    fn accepts(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                let last = v4.octets()[3];
                if last == 0 || last == 255 {
                    return false;
                }
                match self.bounds {
                    Some((network, broadcast)) => v4 != network && v4 != broadcast,
                    None => true,
                }
            }
            IpAddr::V6(_) => true,
        }
    }
}

impl From<Ipv4Net> for AddrRange {
    fn from(net: Ipv4Net) -> Self {
        let bounds = (net.prefix_len() <= 30).then(|| (net.network(), net.broadcast()));
        Self {
            start: IpAddr::V4(net.network()),
            size: 1u64 << (32 - net.prefix_len()),
            bounds,
        }
    }
}

impl From<Ipv6Net> for AddrRange {
    /// Only meaningful for prefixes of /120 or longer.
    fn from(net: Ipv6Net) -> Self {
        let host_bits = 128 - net.prefix_len().max(IPV6_UNIT_PREFIX);
        Self {
            start: IpAddr::V6(net.network()),
            size: 1u64 << host_bits,
            bounds: None,
        }
    }
}

/// Turns configured ranges and endpoints into a finite candidate list.
#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    ranges: Vec<IpNet>,
    endpoints: Vec<SocketAddr>,
    bucket_size: usize,
}

impl CandidateGenerator {
    /// Keeps only ranges of enabled families, normalized to their network address, in random order.
    pub fn new(opts: &ScannerOptions) -> Self {
        let families = opts.families();
        let mut ranges: Vec<IpNet> = opts
            .cidr_list
            .iter()
            .filter(|net| families.allows(&net.addr()))
            .map(IpNet::trunc)
            .collect();
        ranges.shuffle(&mut OsRng);

        Self {
            ranges,
            endpoints: opts.custom_endpoints.clone(),
            bucket_size: opts.bucket_size,
        }
    }

    pub fn ranges(&self) -> &[IpNet] {
        &self.ranges
    }

    /// Sampled addresses (port 0) followed by the explicit endpoints, de-duplicated by `ip:port`.
    pub fn generate(&self) -> Result<Vec<SocketAddr>, ScanError> {
        if self.ranges.is_empty() && self.endpoints.is_empty() {
            return Err(ScanError::NoCandidates);
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for net in &self.ranges {
            let ips = self.sample_prefix(*net);
            if ips.is_empty() {
                tracing::warn!(cidr = %net, "no usable addresses sampled from range");
            }
            for ip in ips {
                let sa = SocketAddr::new(ip, 0);
                if seen.insert(sa) {
                    out.push(sa);
                }
            }
        }
        for &ep in &self.endpoints {
            if seen.insert(ep) {
                out.push(ep);
            }
        }

        if out.is_empty() {
            return Err(ScanError::NothingGenerated);
        }
        Ok(out)
    }

    /// Sample one prefix according to its family and size.
    pub fn sample_prefix(&self, net: IpNet) -> Vec<IpAddr> {
        match net {
            IpNet::V4(n) if n.prefix_len() >= IPV4_UNIT_PREFIX => {
                sample_range(AddrRange::from(n), self.bucket_size)
            }
            IpNet::V4(n) => ipv4_unit_starts(n)
                .into_iter()
                .flat_map(|start| sample_range(AddrRange::unit(IpAddr::V4(start)), self.bucket_size))
                .collect(),
            IpNet::V6(n) if n.prefix_len() >= IPV6_UNIT_PREFIX => {
                sample_range(AddrRange::from(n), self.bucket_size)
            }
            IpNet::V6(n) => random_ipv6_unit_starts(n, IPV6_SAMPLED_UNITS)
                .into_iter()
                .flat_map(|start| sample_range(AddrRange::unit(IpAddr::V6(start)), self.bucket_size))
                .collect(),
        }
    }
}

/// Flatten dedicated port-scan targets into `ip:port` pairs, keeping the given order.
pub fn port_scan_targets(targets: &BTreeMap<IpAddr, Vec<u16>>) -> Vec<SocketAddr> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .flat_map(|(ip, ports)| ports.iter().map(move |p| SocketAddr::new(*ip, *p)))
        .filter(|sa| seen.insert(*sa))
        .collect()
}

/// Parse CIDR strings, logging and skipping the ones that do not parse.
pub fn parse_cidr_list<S: AsRef<str>>(items: &[S]) -> Vec<IpNet> {
    items
        .iter()
        .filter_map(|s| match s.as_ref().trim().parse::<IpNet>() {
            Ok(net) => Some(net),
            Err(e) => {
                tracing::warn!(cidr = s.as_ref(), error = %e, "skipping unparseable CIDR");
                None
            }
        })
        .collect()
}

/// Start address of every /24 inside `net`, in order. Stops at the top of the address space.
pub fn ipv4_unit_starts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let net = net.trunc();
    let last = u32::from(net.broadcast());
    let mut current = u32::from(net.network());
    let mut out = Vec::new();
    loop {
        out.push(Ipv4Addr::from(current));
        match current.checked_add(UNIT_SIZE as u32) {
            Some(next) if next <= last => current = next,
            _ => break,
        }
    }
    out
}

/// `count` random /120 units inside `net`. Repeats are possible.
pub fn random_ipv6_unit_starts(net: Ipv6Net, count: usize) -> Vec<Ipv6Addr> {
    let base = u128::from(net.network());
    let random_bits = IPV6_UNIT_PREFIX.saturating_sub(net.prefix_len()) as u32;
    let units = 1u128 << random_bits;
    let host_bits = (128 - IPV6_UNIT_PREFIX) as u32;
    (0..count)
        .map(|_| {
            let index = OsRng.gen_range(0..units);
            Ipv6Addr::from(base | (index << host_bits))
        })
        .collect()
}

/// Split `range` into `count` equal segments and draw one acceptable address from each.
///
/// Retries inside a segment walk a full-period sequence over the segment, so no offset is
/// tried twice; a segment is skipped after `MAX_SEGMENT_ATTEMPTS` rejected offsets.
fn sample_range(range: AddrRange, count: usize) -> Vec<IpAddr> {
    let count = (count as u64).min(range.size);
    if count == 0 {
        return Vec::new();
    }
    let segment = range.size / count;
    let mut out = Vec::with_capacity(count as usize);

    for i in 0..count {
        let seg_start = i * segment;
        let seg_end = if i == count - 1 {
            range.size
        } else {
            seg_start + segment
        };
        let width = seg_end - seg_start;
        let mut offsets = FullPeriodLcg::new(width, &mut OsRng);

        for _ in 0..MAX_SEGMENT_ATTEMPTS.min(width) {
            let Some(ip) = offset_addr(range.start, seg_start + offsets.next_value()) else {
                continue;
            };
            if range.accepts(ip) {
                out.push(ip);
                break;
            }
        }
    }
    out
}

fn offset_addr(start: IpAddr, offset: u64) -> Option<IpAddr> {
    match start {
        IpAddr::V4(v4) => {
            let off = u32::try_from(offset).ok()?;
            u32::from(v4).checked_add(off).map(|n| IpAddr::V4(Ipv4Addr::from(n)))
        }
        IpAddr::V6(v6) => u128::from(v6)
            .checked_add(offset as u128)
            .map(|n| IpAddr::V6(Ipv6Addr::from(n))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(cidrs: &[&str], bucket: usize) -> CandidateGenerator {
        let opts = ScannerOptions {
            cidr_list: cidrs.iter().map(|c| c.parse().unwrap()).collect(),
            bucket_size: bucket,
            ..Default::default()
        };
        CandidateGenerator::new(&opts)
    }

    fn v4(ip: IpAddr) -> Ipv4Addr {
        match ip {
            IpAddr::V4(v) => v,
            IpAddr::V6(_) => panic!("expected IPv4"),
        }
    }

    #[test]
    fn slash24_samples_one_per_segment() {
        let g = generator(&["192.168.7.0/24"], 5);
        for _ in 0..50 {
            let ips = g.sample_prefix("192.168.7.0/24".parse().unwrap());
            assert_eq!(ips.len(), 5);
            for (i, ip) in ips.iter().enumerate() {
                let o = v4(*ip).octets();
                assert_eq!(&o[..3], &[192, 168, 7]);
                assert!(o[3] != 0 && o[3] != 255);
                let seg_start = i as u8 * 51;
                assert!(o[3] >= seg_start, "{ip} outside segment {i}");
                if i < 4 {
                    assert!(o[3] < seg_start + 51, "{ip} outside segment {i}");
                }
            }
        }
    }

    #[test]
    fn slash30_never_yields_network_or_broadcast() {
        let g = generator(&["10.0.0.0/30"], 5);
        for _ in 0..200 {
            let ips = g.sample_prefix("10.0.0.0/30".parse().unwrap());
            assert_eq!(
                ips,
                vec![
                    IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                    IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))
                ]
            );
        }
    }

    #[test]
    fn host_prefixes() {
        let g = generator(&[], 5);
        assert_eq!(
            g.sample_prefix("10.0.0.5/32".parse().unwrap()),
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))]
        );
        assert!(g.sample_prefix("10.0.0.0/32".parse().unwrap()).is_empty());
        assert_eq!(g.sample_prefix("10.0.0.4/31".parse().unwrap()).len(), 2);
    }

    #[test]
    fn units_cover_parent_exactly_once() {
        let starts = ipv4_unit_starts("10.1.0.0/22".parse().unwrap());
        assert_eq!(
            starts,
            vec![
                Ipv4Addr::new(10, 1, 0, 0),
                Ipv4Addr::new(10, 1, 1, 0),
                Ipv4Addr::new(10, 1, 2, 0),
                Ipv4Addr::new(10, 1, 3, 0),
            ]
        );
    }

    #[test]
    fn units_stop_at_top_of_address_space() {
        let starts = ipv4_unit_starts("255.255.0.0/16".parse().unwrap());
        assert_eq!(starts.len(), 256);
        assert_eq!(starts.last(), Some(&Ipv4Addr::new(255, 255, 255, 0)));
        let starts = ipv4_unit_starts("255.0.0.0/8".parse().unwrap());
        assert_eq!(starts.len(), 65_536);
        assert_eq!(starts.last(), Some(&Ipv4Addr::new(255, 255, 255, 0)));
    }

    #[test]
    fn large_ipv4_prefix_samples_every_unit() {
        let g = generator(&[], 3);
        let net: Ipv4Net = "172.16.0.0/20".parse().unwrap();
        let ips = g.sample_prefix(IpNet::V4(net));
        assert_eq!(ips.len(), 16 * 3);
        for ip in ips {
            assert!(net.contains(&v4(ip)));
            let last = v4(ip).octets()[3];
            assert!(last != 0 && last != 255);
        }
    }

    #[test]
    fn ipv6_small_prefix_is_sampled_directly() {
        let g = generator(&[], 5);
        let net: Ipv6Net = "2606:4700:d0::100/120".parse().unwrap();
        let ips = g.sample_prefix(IpNet::V6(net));
        assert_eq!(ips.len(), 5);
        assert!(ips.iter().all(|ip| matches!(ip, IpAddr::V6(v6) if net.contains(v6))));
    }

    #[test]
    fn ipv6_large_prefix_draws_fixed_number_of_units() {
        let g = generator(&[], 2);
        let net: Ipv6Net = "2606:4700:d0::/64".parse().unwrap();
        let ips = g.sample_prefix(IpNet::V6(net));
        assert_eq!(ips.len(), IPV6_SAMPLED_UNITS * 2);
        assert!(ips.iter().all(|ip| matches!(ip, IpAddr::V6(v6) if net.contains(v6))));
    }

    #[test]
    fn generate_requires_some_input() {
        let g = generator(&[], 5);
        assert!(matches!(g.generate(), Err(ScanError::NoCandidates)));
        let g = generator(&["10.0.0.0/32"], 5);
        assert!(matches!(g.generate(), Err(ScanError::NothingGenerated)));
    }

    #[test]
    fn generate_merges_endpoints_verbatim_and_dedups() {
        let ep: SocketAddr = "10.9.9.9:987".parse().unwrap();
        let opts = ScannerOptions {
            cidr_list: vec!["10.0.0.0/30".parse().unwrap()],
            custom_endpoints: vec![ep, ep],
            ..Default::default()
        };
        let out = CandidateGenerator::new(&opts).generate().unwrap();
        assert_eq!(out.iter().filter(|sa| **sa == ep).count(), 1);
        assert!(out.iter().filter(|sa| **sa != ep).all(|sa| sa.port() == 0));
    }

    #[test]
    fn disabled_family_ranges_are_dropped() {
        let opts = ScannerOptions {
            use_ipv6: false,
            cidr_list: vec![
                "10.0.0.0/24".parse().unwrap(),
                "2606:4700:d0::/64".parse().unwrap(),
            ],
            ..Default::default()
        };
        let g = CandidateGenerator::new(&opts);
        assert_eq!(g.ranges().len(), 1);
        assert!(g.generate().unwrap().iter().all(SocketAddr::is_ipv4));
    }

    #[test]
    fn parse_cidr_list_skips_garbage() {
        let nets = parse_cidr_list(&["10.0.0.0/8", "not-a-cidr", " 2606:4700::/32 "]);
        assert_eq!(nets.len(), 2);
    }

    #[test]
    fn port_scan_targets_flatten() {
        let mut m = BTreeMap::new();
        m.insert("1.1.1.1".parse().unwrap(), vec![1, 2, 2]);
        m.insert("2.2.2.2".parse().unwrap(), vec![3]);
        let t = port_scan_targets(&m);
        assert_eq!(t.len(), 3);
    }
}
