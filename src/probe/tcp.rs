use super::{bounded, Probe};
use crate::error::ProbeError;
use crate::types::IpInfo;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// RTT of a TCP three-way handshake; the connection is dropped as soon as it is established.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, target: SocketAddr, cancel: &CancellationToken) -> Result<IpInfo, ProbeError> {
        let start = Instant::now();
        bounded(cancel, self.timeout, async {
            TcpStream::connect(target)
                .await
                .map(drop)
                .map_err(ProbeError::from)
        })
        .await?;
        Ok(IpInfo::new(target, start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });
        let info = TcpProbe::new(Duration::from_secs(2))
            .probe(addr, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(info.addr, addr);
        assert!(info.rtt < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn closed_port_fails() {
        // bind then drop to get a port nobody listens on
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let res = TcpProbe::new(Duration::from_secs(2))
            .probe(addr, &CancellationToken::new())
            .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = TcpProbe::new(Duration::from_secs(5))
            .probe("192.0.2.1:443".parse().unwrap(), &cancel)
            .await;
        assert!(matches!(res, Err(ProbeError::Cancelled)));
    }
}
