//! Pipeline engine: generator → [ICMP] → [TCP] → handshake → result queue.
//!
//! Stages are joined by bounded channels of capacity `concurrent_scanners`, each served by that
//! many workers. A stage's outbound channel closes once all of its workers have dropped their
//! senders, which ends the next stage. Disabled filter stages are replaced by a single forwarding
//! task. With explicit port-test targets the pipeline is skipped and every (ip, port) pair gets
//! its own handshake task.

use crate::defaults::DEFAULT_HANDSHAKE_PORT;
use crate::error::ProbeError;
use crate::generator::{self, CandidateGenerator};
use crate::options::ScannerOptions;
use crate::ports;
use crate::probe::Probes;
use crate::queue::ResultQueue;
use crate::types::{IpInfo, ScanSummary};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, Instrument};

/// Optional RTT filter stages ahead of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    Icmp,
    Tcp,
}

impl Filter {
    fn name(self) -> &'static str {
        match self {
            Filter::Icmp => "icmp",
            Filter::Tcp => "tcp",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    candidates: AtomicU64,
    icmp_passed: AtomicU64,
    tcp_passed: AtomicU64,
    handshake_ok: AtomicU64,
    handshake_failed: AtomicU64,
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<IpInfo>>>;

/// One scan run's state: frozen options, probes, counters and the result queue.
pub struct Engine {
    options: Arc<ScannerOptions>,
    probes: Probes,
    queue: ResultQueue,
    counters: Counters,
}

impl Engine {
    pub fn new(options: Arc<ScannerOptions>, probes: Probes) -> Self {
        let queue = ResultQueue::new(options.ip_queue_size);
        Self {
            options,
            probes,
            queue,
            counters: Counters::default(),
        }
    }

    pub fn queue(&self) -> &ResultQueue {
        &self.queue
    }

    /// Counters so far plus the current queue contents, ascending by RTT.
    pub fn summary(&self) -> ScanSummary {
        let endpoints = self.queue.available_ips(false);
        ScanSummary {
            candidates: self.counters.candidates.load(Ordering::Relaxed),
            icmp_passed: self.counters.icmp_passed.load(Ordering::Relaxed),
            tcp_passed: self.counters.tcp_passed.load(Ordering::Relaxed),
            handshake_ok: self.counters.handshake_ok.load(Ordering::Relaxed),
            handshake_failed: self.counters.handshake_failed.load(Ordering::Relaxed),
            found: endpoints.len(),
            endpoints,
        }
    }

    /// Run until all inputs are exhausted or `cancel` fires. Early stop cancels `cancel` itself,
    /// so callers should pass a token they own for this run.
    pub async fn run(self: &Arc<Self>, cancel: &CancellationToken) -> ScanSummary {
        if self.options.is_port_scan() {
            self.run_port_scan(cancel).await;
        } else {
            self.run_pipeline(cancel).await;
        }
        let summary = self.summary();
        info!(
            candidates = summary.candidates,
            handshake_ok = summary.handshake_ok,
            found = summary.found,
            "scan finished"
        );
        summary
    }

    async fn run_pipeline(self: &Arc<Self>, cancel: &CancellationToken) {
        let candidates = match CandidateGenerator::new(&self.options).generate() {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "candidate generation failed");
                return;
            }
        };
        self.counters
            .candidates
            .store(candidates.len() as u64, Ordering::Relaxed);
        info!(count = candidates.len(), "generated candidates");

        let width = self.width();
        let mut tasks = JoinSet::new();
        let (tx, rx) = mpsc::channel(width);
        tasks.spawn(
            feed(candidates, tx, cancel.clone())
                .in_current_span()
                .with_current_subscriber(),
        );

        let rx = if self.options.icmp_ping {
            self.spawn_filter(&mut tasks, rx, Filter::Icmp, cancel)
        } else {
            spawn_bypass(&mut tasks, rx, width, cancel)
        };
        let rx = if self.options.tcp_ping {
            self.spawn_filter(&mut tasks, rx, Filter::Tcp, cancel)
        } else {
            spawn_bypass(&mut tasks, rx, width, cancel)
        };
        self.spawn_handshake(&mut tasks, rx, cancel);

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "pipeline worker panicked");
            }
        }
    }

    async fn run_port_scan(self: &Arc<Self>, cancel: &CancellationToken) {
        let targets = generator::port_scan_targets(&self.options.test_ports_for_ips);
        self.counters
            .candidates
            .store(targets.len() as u64, Ordering::Relaxed);
        info!(count = targets.len(), "port scan targets");

        let mut tasks = JoinSet::new();
        for target in targets {
            if cancel.is_cancelled() {
                break;
            }
            let engine = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(
                async move {
                    if let Some(info) = engine.handshake(target, &cancel).await {
                        engine.accept(info, &cancel);
                    }
                }
                .in_current_span()
                .with_current_subscriber(),
            );
        }
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "port scan task panicked");
            }
        }
    }

    fn width(&self) -> usize {
        self.options.concurrent_scanners.max(1)
    }

    fn spawn_filter(
        self: &Arc<Self>,
        tasks: &mut JoinSet<()>,
        rx: mpsc::Receiver<IpInfo>,
        stage: Filter,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<IpInfo> {
        let width = self.width();
        let (tx, out) = mpsc::channel(width);
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));
        for _ in 0..width {
            let engine = self.clone();
            let rx = rx.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            tasks.spawn(
                async move {
                    while let Some(candidate) = next_item(&rx, &cancel).await {
                        let Some(passed) = engine.filter(stage, candidate, &cancel).await else {
                            continue;
                        };
                        if !forward(&tx, passed, &cancel).await {
                            break;
                        }
                    }
                }
                .in_current_span()
                .with_current_subscriber(),
            );
        }
        out
    }

    fn spawn_handshake(
        self: &Arc<Self>,
        tasks: &mut JoinSet<()>,
        rx: mpsc::Receiver<IpInfo>,
        cancel: &CancellationToken,
    ) {
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));
        for _ in 0..self.width() {
            let engine = self.clone();
            let rx = rx.clone();
            let cancel = cancel.clone();
            tasks.spawn(
                async move {
                    while let Some(candidate) = next_item(&rx, &cancel).await {
                        let target = SocketAddr::new(candidate.ip(), engine.handshake_port(candidate.port()));
                        if let Some(info) = engine.handshake(target, &cancel).await {
                            engine.accept(info, &cancel);
                        }
                    }
                }
                .in_current_span()
                .with_current_subscriber(),
            );
        }
    }

    /// Apply an optional filter stage; passing candidates are forwarded unchanged.
    async fn filter(&self, stage: Filter, candidate: IpInfo, cancel: &CancellationToken) -> Option<IpInfo> {
        let (res, limit, passed) = match stage {
            Filter::Icmp => (
                self.probes.icmp.probe(candidate.addr, cancel).await,
                self.options.icmp_ping_filter_rtt,
                &self.counters.icmp_passed,
            ),
            Filter::Tcp => {
                let target = SocketAddr::new(candidate.ip(), self.options.tcp_ping_port);
                (
                    self.probes.tcp.probe(target, cancel).await,
                    self.options.tcp_ping_filter_rtt,
                    &self.counters.tcp_passed,
                )
            }
        };
        match res {
            Ok(m) if m.rtt <= limit => {
                passed.fetch_add(1, Ordering::Relaxed);
                debug!(stage = stage.name(), addr = %candidate.addr, rtt = ?m.rtt, "passed");
                Some(candidate)
            }
            Ok(m) => {
                debug!(stage = stage.name(), addr = %candidate.addr, rtt = ?m.rtt, limit = ?limit, "rtt above threshold");
                None
            }
            Err(e) => {
                log_probe_error(stage.name(), candidate.addr, &e, cancel);
                None
            }
        }
    }

    async fn handshake(&self, target: SocketAddr, cancel: &CancellationToken) -> Option<IpInfo> {
        match self.probes.handshake.probe(target, cancel).await {
            Ok(info) => {
                self.counters.handshake_ok.fetch_add(1, Ordering::Relaxed);
                debug!(addr = %info.addr, rtt = ?info.rtt, "handshake ok");
                Some(info)
            }
            Err(e) => {
                if !e.is_cancelled() && !cancel.is_cancelled() {
                    self.counters.handshake_failed.fetch_add(1, Ordering::Relaxed);
                }
                log_probe_error("handshake", target, &e, cancel);
                None
            }
        }
    }

    /// Enqueue a handshake success and trigger early stop once enough endpoints are queued.
    fn accept(&self, info: IpInfo, cancel: &CancellationToken) {
        if let Some(evicted) = self.queue.enqueue(info) {
            debug!(addr = %evicted.addr, rtt = ?evicted.rtt, "evicted from full queue");
        }
        let want = self.options.stop_on_first_good_ips;
        if want > 0 && self.queue.len() >= want && !cancel.is_cancelled() {
            info!(found = self.queue.len(), "found enough endpoints, stopping scan");
            cancel.cancel();
        }
    }

    /// Candidate port, else the configured port, else a random default port.
    fn handshake_port(&self, candidate_port: u16) -> u16 {
        if candidate_port != 0 {
            candidate_port
        } else if self.options.port != 0 {
            self.options.port
        } else {
            ports::random_port(&self.options.default_scan_ports, DEFAULT_HANDSHAKE_PORT)
        }
    }
}

/// Errors surfacing after cancellation are shutdown noise and stay out of the logs.
fn log_probe_error(stage: &'static str, addr: SocketAddr, err: &ProbeError, cancel: &CancellationToken) {
    if err.is_cancelled() || cancel.is_cancelled() {
        return;
    }
    debug!(stage, %addr, error = %err, "probe failed");
}

async fn feed(candidates: Vec<SocketAddr>, tx: mpsc::Sender<IpInfo>, cancel: CancellationToken) {
    for addr in candidates {
        if !forward(&tx, IpInfo::candidate(addr), &cancel).await {
            break;
        }
    }
}

/// Transparent stand-in for a disabled filter stage.
fn spawn_bypass(
    tasks: &mut JoinSet<()>,
    mut rx: mpsc::Receiver<IpInfo>,
    width: usize,
    cancel: &CancellationToken,
) -> mpsc::Receiver<IpInfo> {
    let (tx, out) = mpsc::channel(width);
    let cancel = cancel.clone();
    tasks.spawn(
        async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    item = rx.recv() => item,
                };
                let Some(item) = item else { break };
                if !forward(&tx, item, &cancel).await {
                    break;
                }
            }
        }
        .in_current_span()
        .with_current_subscriber(),
    );
    out
}

async fn next_item(rx: &SharedReceiver, cancel: &CancellationToken) -> Option<IpInfo> {
    let mut rx = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        guard = rx.lock() => guard,
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        item = rx.recv() => item,
    }
}

/// Send downstream; false once the run is cancelled or the next stage is gone.
async fn forward(tx: &mpsc::Sender<IpInfo>, item: IpInfo, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        res = tx.send(item) => res.is_ok(),
    }
}

/// Upper bound on how long in-flight probes may keep a cancelled run alive.
pub fn cancellation_latency(opts: &ScannerOptions) -> Duration {
    opts.connection_timeout.max(opts.handshake_timeout)
}
