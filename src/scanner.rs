use crate::engine::{cancellation_latency, Engine};
use crate::error::ScanError;
use crate::options::ScannerOptions;
use crate::probe::Probes;
use crate::types::{IpInfo, ScanSummary};
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{info, info_span, Instrument};

/// Caller-facing scanner: start a run with [`IpScanner::run`] and poll
/// [`IpScanner::available_ips`] from anywhere, before, during or after it.
pub struct IpScanner {
    options: Arc<ScannerOptions>,
    probes: Option<Probes>,
    engine: RwLock<Option<Arc<Engine>>>,
}

impl IpScanner {
    /// Scanner using the real network probes, built from `options` when a run starts.
    pub fn new(options: ScannerOptions) -> Self {
        Self {
            options: Arc::new(options),
            probes: None,
            engine: RwLock::new(None),
        }
    }

    /// Scanner using caller-supplied probes.
    pub fn with_probes(options: ScannerOptions, probes: Probes) -> Self {
        Self {
            options: Arc::new(options),
            probes: Some(probes),
            engine: RwLock::new(None),
        }
    }

    pub fn options(&self) -> &ScannerOptions {
        &self.options
    }

    /// Run one scan to completion, cancellation, early stop, or scan timeout.
    ///
    /// Errors only for unusable configuration; a scan that finds nothing returns an empty summary.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ScanSummary, ScanError> {
        self.options.validate()?;
        let probes = match &self.probes {
            Some(p) => p.clone(),
            None => Probes::from_options(&self.options)?,
        };
        let engine = Arc::new(Engine::new(self.options.clone(), probes));
        *self.engine.write().unwrap_or_else(PoisonError::into_inner) = Some(engine.clone());

        let run_token = cancel.child_token();
        let _guard = run_token.clone().drop_guard();
        let span = info_span!("scan", port_scan = self.options.is_port_scan());
        if let Some(limit) = self.options.scan_timeout {
            let token = run_token.clone();
            let drain = cancellation_latency(&self.options);
            tokio::spawn(
                async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(limit) => {
                            info!(timeout = ?limit, drain = ?drain, "scan timeout reached");
                            token.cancel();
                        }
                    }
                }
                .instrument(span.clone())
                .with_current_subscriber(),
            );
        }

        Ok(engine.run(&run_token).instrument(span).await)
    }

    /// Current results ascending by RTT. Empty until a run has started.
    pub fn available_ips(&self) -> Vec<IpInfo> {
        self.current()
            .map(|e| e.queue().available_ips(false))
            .unwrap_or_default()
    }

    /// Live counters and results of the current or last run.
    pub fn stats(&self) -> ScanSummary {
        self.current().map(|e| e.summary()).unwrap_or_default()
    }

    fn current(&self) -> Option<Arc<Engine>> {
        self.engine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_available_before_run() {
        let scanner = IpScanner::new(ScannerOptions::default());
        assert!(scanner.available_ips().is_empty());
        assert_eq!(scanner.stats().found, 0);
    }

    #[tokio::test]
    async fn missing_credentials_is_an_error() {
        let opts = ScannerOptions::builder().build().unwrap();
        let scanner = IpScanner::new(opts);
        let res = scanner.run(CancellationToken::new()).await;
        assert!(matches!(res, Err(ScanError::Credentials(_))));
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let opts = ScannerOptions {
            use_ipv4: false,
            use_ipv6: false,
            ..ScannerOptions::default()
        };
        let res = IpScanner::new(opts).run(CancellationToken::new()).await;
        assert!(matches!(res, Err(ScanError::NoFamilies)));
    }
}
