use super::noise::{tai64n_now, HandshakeKeys, Initiation};
use super::{bounded, Probe};
use crate::error::{ProbeError, ScanError};
use crate::options::ScannerOptions;
use crate::types::IpInfo;
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::Rng;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Application-level probe: one WireGuard handshake round trip over UDP.
///
/// The RTT runs from sending the initiation to receiving the response; the response is only
/// accepted once it authenticates against our ephemeral and static keys.
#[derive(Clone)]
pub struct HandshakeProbe {
    keys: HandshakeKeys,
    timeout: Duration,
}

impl HandshakeProbe {
    pub fn new(keys: HandshakeKeys, timeout: Duration) -> Self {
        Self { keys, timeout }
    }

    pub fn from_options(opts: &ScannerOptions) -> Result<Self, ScanError> {
        let creds = opts
            .credentials
            .as_ref()
            .ok_or_else(|| ScanError::Credentials("no handshake credentials configured".into()))?;
        let keys = HandshakeKeys::from_base64(
            &creds.private_key,
            &creds.peer_public_key,
            creds.preshared_key.as_deref(),
        )?;
        Ok(Self::new(keys, opts.handshake_timeout))
    }
}

#[async_trait]
impl Probe for HandshakeProbe {
    async fn probe(&self, target: SocketAddr, cancel: &CancellationToken) -> Result<IpInfo, ProbeError> {
        let init = Initiation::new(&self.keys, OsRng.gen(), tai64n_now())?;
        let (rtt, resp) = bounded(cancel, self.timeout, exchange(target, &init.packet)).await?;
        init.consume_response(&self.keys, &resp)?;
        Ok(IpInfo::new(target, rtt))
    }
}

/// Send `packet` to `target` and wait for one datagram back.
async fn exchange(target: SocketAddr, packet: &[u8]) -> Result<(Duration, Vec<u8>), ProbeError> {
    let bind: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let sock = UdpSocket::bind(bind).await?;
    sock.connect(target).await?;
    let start = Instant::now();
    sock.send(packet).await?;
    let mut buf = [0u8; 512];
    let n = sock.recv(&mut buf).await?;
    Ok((start.elapsed(), buf[..n].to_vec()))
}
