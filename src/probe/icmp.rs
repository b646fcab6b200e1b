//! ICMP / ICMPv6 echo probe.
//!
//! Prefers a raw socket and falls back to an unprivileged datagram ICMP socket
//! (`net.ipv4.ping_group_range` on Linux). Datagram sockets get replies without the IP header and
//! with the identifier rewritten by the kernel, so the identifier is only checked on raw sockets.

use super::{bounded, Probe};
use crate::error::ProbeError;
use crate::types::IpInfo;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;
const HEADER_LEN: usize = 8;
const ECHO_SEQ: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Raw,
    Dgram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub kind: u8,
    pub ident: u16,
    pub seq: u16,
}

#[derive(Debug, Clone)]
pub struct IcmpProbe {
    timeout: Duration,
}

impl IcmpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Probe for IcmpProbe {
    async fn probe(&self, target: SocketAddr, cancel: &CancellationToken) -> Result<IpInfo, ProbeError> {
        let ip = target.ip();
        let ident = (std::process::id() & 0xffff) as u16;
        let rtt = bounded(cancel, self.timeout, echo(ip, ident)).await?;
        Ok(IpInfo::new(target, rtt))
    }
}

/// Send one echo request and wait for the matching reply.
async fn echo(ip: IpAddr, ident: u16) -> Result<Duration, ProbeError> {
    let (sock, kind) = open_socket(ip)?;
    let packet = echo_request(&ip, ident, ECHO_SEQ);
    let start = Instant::now();
    sock.send(&packet).await?;

    let mut buf = [0u8; 1500];
    loop {
        let n = sock.recv(&mut buf).await?;
        let reply = parse_echo_reply(&buf[..n], &ip, kind)?;
        if answers(&reply, &ip, kind, ident) {
            return Ok(start.elapsed());
        }
        // our own request, or another process' echo on a shared raw socket
        if reply.kind == reply_type(&ip) || reply.kind == request_type(&ip) {
            continue;
        }
        return Err(ProbeError::MalformedReply(format!(
            "not an echo reply, type {}",
            reply.kind
        )));
    }
}

/// Whether `reply` answers our request. The identifier is only meaningful on raw sockets.
fn answers(reply: &EchoReply, ip: &IpAddr, kind: SocketKind, ident: u16) -> bool {
    reply.kind == reply_type(ip)
        && reply.seq == ECHO_SEQ
        && (kind == SocketKind::Dgram || reply.ident == ident)
}

fn request_type(ip: &IpAddr) -> u8 {
    if ip.is_ipv4() {
        ECHO_REQUEST_V4
    } else {
        ECHO_REQUEST_V6
    }
}

fn reply_type(ip: &IpAddr) -> u8 {
    if ip.is_ipv4() {
        ECHO_REPLY_V4
    } else {
        ECHO_REPLY_V6
    }
}

fn open_socket(ip: IpAddr) -> io::Result<(UdpSocket, SocketKind)> {
    let (domain, proto) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };
    let (socket, kind) = match Socket::new(domain, Type::RAW, Some(proto)) {
        Ok(s) => (s, SocketKind::Raw),
        Err(_) => (Socket::new(domain, Type::DGRAM, Some(proto))?, SocketKind::Dgram),
    };
    socket.set_nonblocking(true)?;
    socket.connect(&SocketAddr::new(ip, 0).into())?;
    let std_sock: std::net::UdpSocket = socket.into();
    Ok((UdpSocket::from_std(std_sock)?, kind))
}

/// An echo request with an empty payload. The ICMPv6 checksum is recomputed by the kernel.
pub fn echo_request(ip: &IpAddr, ident: u16, seq: u16) -> [u8; HEADER_LEN] {
    let mut packet = [0u8; HEADER_LEN];
    packet[0] = request_type(ip);
    packet[4..6].copy_from_slice(&ident.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());
    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// Internet checksum (RFC 1071).
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for c in &mut chunks {
        sum += u32::from(u16::from_be_bytes([c[0], c[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Decode the ICMP header of a received packet. Raw IPv4 sockets deliver the IP header too.
pub fn parse_echo_reply(buf: &[u8], ip: &IpAddr, kind: SocketKind) -> Result<EchoReply, ProbeError> {
    let icmp = if ip.is_ipv4() && kind == SocketKind::Raw {
        let ihl = usize::from(buf.first().copied().unwrap_or(0) & 0x0f) * 4;
        buf.get(ihl..).unwrap_or(&[])
    } else {
        buf
    };
    if icmp.len() < HEADER_LEN {
        return Err(ProbeError::MalformedReply(format!(
            "icmp packet too short: {} bytes",
            icmp.len()
        )));
    }
    Ok(EchoReply {
        kind: icmp[0],
        ident: u16::from_be_bytes([icmp[4], icmp[5]]),
        seq: u16::from_be_bytes([icmp[6], icmp[7]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const V4: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);
    const V6: IpAddr = IpAddr::V6(std::net::Ipv6Addr::LOCALHOST);

    #[test]
    fn checksum_of_filled_packet_verifies() {
        let pkt = echo_request(&V4, 0x1234, 1);
        assert_eq!(pkt[0], ECHO_REQUEST_V4);
        assert_eq!(u16::from_be_bytes([pkt[2], pkt[3]]), 0xe5ca);
        assert_eq!(checksum(&pkt), 0);
    }

    #[test]
    fn checksum_pads_odd_length() {
        assert_eq!(checksum(&[0x01]), 0xfeff);
        assert_eq!(checksum(&[]), 0xffff);
    }

    #[test]
    fn v6_request_type() {
        let pkt = echo_request(&V6, 7, 1);
        assert_eq!(pkt[0], ECHO_REQUEST_V6);
        assert_eq!(&pkt[4..8], &[0, 7, 0, 1]);
    }

    #[test]
    fn raw_v4_reply_skips_ip_header() {
        let mut buf = vec![0x45u8];
        buf.extend_from_slice(&[0u8; 19]);
        buf.extend_from_slice(&[ECHO_REPLY_V4, 0, 0, 0, 0x12, 0x34, 0, 1]);
        let reply = parse_echo_reply(&buf, &V4, SocketKind::Raw).unwrap();
        assert_eq!(
            reply,
            EchoReply {
                kind: ECHO_REPLY_V4,
                ident: 0x1234,
                seq: 1
            }
        );
    }

    #[test]
    fn dgram_reply_has_no_ip_header() {
        let buf = [ECHO_REPLY_V6, 0, 0, 0, 0, 9, 0, 1];
        let reply = parse_echo_reply(&buf, &V6, SocketKind::Dgram).unwrap();
        assert_eq!(reply.kind, ECHO_REPLY_V6);
        assert_eq!(reply.ident, 9);
    }

    #[test]
    fn reply_matching_checks_sequence_and_raw_identifier() {
        let ours = EchoReply {
            kind: ECHO_REPLY_V4,
            ident: 0x1234,
            seq: ECHO_SEQ,
        };
        assert!(answers(&ours, &V4, SocketKind::Raw, 0x1234));

        let foreign = EchoReply { ident: 0x4321, ..ours };
        assert!(!answers(&foreign, &V4, SocketKind::Raw, 0x1234));
        // the kernel rewrites the identifier on datagram sockets
        assert!(answers(&foreign, &V4, SocketKind::Dgram, 0x1234));

        let stale = EchoReply { seq: 7, ..ours };
        assert!(!answers(&stale, &V4, SocketKind::Raw, 0x1234));
        assert!(!answers(&stale, &V4, SocketKind::Dgram, 0x1234));

        let request = EchoReply {
            kind: ECHO_REQUEST_V4,
            ..ours
        };
        assert!(!answers(&request, &V4, SocketKind::Raw, 0x1234));
        let v6 = EchoReply {
            kind: ECHO_REPLY_V6,
            ..ours
        };
        assert!(answers(&v6, &V6, SocketKind::Dgram, 0));
    }

    #[test]
    fn truncated_reply_is_rejected() {
        assert!(parse_echo_reply(&[0x45, 0, 0], &V4, SocketKind::Raw).is_err());
        assert!(parse_echo_reply(&[0, 0, 0, 0], &V4, SocketKind::Dgram).is_err());
    }
}
