use serde::{Serialize, Serializer};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use time::OffsetDateTime;

/// One measured endpoint: the unit passed between pipeline stages and stored in the result queue.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IpInfo {
    pub addr: SocketAddr,
    #[serde(rename = "rtt_ms", serialize_with = "serialize_rtt_ms")]
    pub rtt: Duration,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl IpInfo {
    pub fn new(addr: SocketAddr, rtt: Duration) -> Self {
        Self {
            addr,
            rtt,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// A not-yet-measured candidate, as produced by the generator.
    pub fn candidate(addr: SocketAddr) -> Self {
        Self::new(addr, Duration::ZERO)
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

fn serialize_rtt_ms<S: Serializer>(rtt: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(rtt.as_secs_f64() * 1000.0)
}

/// Counters and results for one finished scan run.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ScanSummary {
    pub candidates: u64,
    pub icmp_passed: u64,
    pub tcp_passed: u64,
    pub handshake_ok: u64,
    pub handshake_failed: u64,
    pub found: usize,
    pub endpoints: Vec<IpInfo>,
}
