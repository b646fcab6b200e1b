//! Latency probes used by the pipeline stages.
//!
//! Every probe honours the scan's cancellation token and its own timeout, and reports either a
//! measured [`IpInfo`] or a [`ProbeError`] that the engine logs and drops.

pub mod handshake;
pub mod icmp;
pub mod noise;
pub mod tcp;

use crate::error::{ProbeError, ScanError};
use crate::options::ScannerOptions;
use crate::types::IpInfo;
use async_trait::async_trait;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use handshake::HandshakeProbe;
pub use icmp::IcmpProbe;
pub use tcp::TcpProbe;

#[async_trait]
pub trait Probe: Send + Sync {
    /// Measure one target. The returned `IpInfo` carries the measured RTT.
    async fn probe(&self, target: SocketAddr, cancel: &CancellationToken) -> Result<IpInfo, ProbeError>;
}

/// The three probes a scan runs, shared by all workers.
#[derive(Clone)]
pub struct Probes {
    pub icmp: Arc<dyn Probe>,
    pub tcp: Arc<dyn Probe>,
    pub handshake: Arc<dyn Probe>,
}

impl Probes {
    pub fn new(icmp: Arc<dyn Probe>, tcp: Arc<dyn Probe>, handshake: Arc<dyn Probe>) -> Self {
        Self { icmp, tcp, handshake }
    }

    /// Real network probes configured from the scanner options.
    pub fn from_options(opts: &ScannerOptions) -> Result<Self, ScanError> {
        Ok(Self {
            icmp: Arc::new(IcmpProbe::new(opts.connection_timeout)),
            tcp: Arc::new(TcpProbe::new(opts.connection_timeout)),
            handshake: Arc::new(HandshakeProbe::from_options(opts)?),
        })
    }
}

impl std::fmt::Debug for Probes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probes").finish_non_exhaustive()
    }
}

/// Run `fut` until it completes, `limit` elapses, or `cancel` fires.
pub(crate) async fn bounded<T, F>(cancel: &CancellationToken, limit: Duration, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        res = tokio::time::timeout(limit, fut) => res.unwrap_or(Err(ProbeError::Timeout)),
    }
}
