use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use endpoint_scan_rs::config::ScanConfig;
use endpoint_scan_rs::{generator, netdetect, ports, HandshakeCredentials, IpScanner, ScanSummary, ScannerOptions};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Toggle {
    Auto,
    On,
    Off,
}

/// endpoint-scan-rs: find the lowest-latency reachable WireGuard edges in large IP ranges.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "endpoint-scan-rs",
    version,
    about = "Find the lowest-latency reachable WireGuard edges in large IP ranges.",
    long_about = None
)]
struct Cli {
    /// JSON config file; explicit flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// CIDR range to sample (repeatable or comma-separated). Defaults to the WARP ranges.
    #[arg(long, value_delimiter = ',')]
    cidr: Vec<String>,

    /// Explicit endpoint: ip:port, ip, host:port or host (repeatable).
    #[arg(long)]
    endpoint: Vec<String>,

    /// Dedicated port scan of one host, as HOST=PORTS (e.g. 162.159.192.1=500,2408-2410).
    #[arg(long = "test-ports")]
    test_ports: Vec<String>,

    /// Default handshake ports for sampled candidates: a port list or a path to a ports file.
    #[arg(long)]
    ports: Option<String>,

    /// Handshake port for sampled candidates; 0 picks a random default port per candidate.
    #[arg(long)]
    port: Option<u16>,

    #[arg(long, value_enum, default_value_t = Toggle::Auto)]
    ipv4: Toggle,

    /// `auto` enables IPv6 only when a global IPv6 address is configured locally.
    #[arg(long, value_enum, default_value_t = Toggle::Auto)]
    ipv6: Toggle,

    /// Enable the ICMP filter stage (needs raw or ping socket permissions).
    #[arg(long)]
    icmp: bool,

    /// Disable the TCP filter stage.
    #[arg(long = "no-tcp")]
    no_tcp: bool,

    #[arg(long = "tcp-port")]
    tcp_port: Option<u16>,

    #[arg(long = "icmp-rtt-ms")]
    icmp_rtt_ms: Option<u64>,

    #[arg(long = "tcp-rtt-ms")]
    tcp_rtt_ms: Option<u64>,

    /// ICMP/TCP connect timeout in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    #[arg(long = "handshake-timeout-ms")]
    handshake_timeout_ms: Option<u64>,

    /// Workers per pipeline stage.
    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long = "bucket-size")]
    bucket_size: Option<usize>,

    #[arg(long = "queue-size")]
    queue_size: Option<usize>,

    /// Stop once this many endpoints were found.
    #[arg(long = "stop-after")]
    stop_after: Option<usize>,

    #[arg(long = "scan-timeout-ms")]
    scan_timeout_ms: Option<u64>,

    /// Base64 WireGuard private key.
    #[arg(long = "private-key")]
    private_key: Option<String>,

    /// Base64 public key of the scanned edges.
    #[arg(long = "peer-public-key")]
    peer_public_key: Option<String>,

    #[arg(long = "preshared-key")]
    preshared_key: Option<String>,

    /// Write results as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => ScanConfig::load(path)?,
        None => ScanConfig::default(),
    };
    let options = build_options(&cli, &config)?;

    println!("endpoint-scan-rs configuration:");
    println!("  ipv4 / ipv6  : {} / {}", options.use_ipv4, options.use_ipv6);
    if options.is_port_scan() {
        println!("  mode         : port scan ({} hosts)", options.test_ports_for_ips.len());
    } else {
        println!("  ranges       : {}", options.cidr_list.len());
        println!("  endpoints    : {}", options.custom_endpoints.len());
        println!(
            "  filters      : icmp={} tcp={}",
            options.icmp_ping, options.tcp_ping
        );
    }
    println!("  concurrency  : {}", options.concurrent_scanners);
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );

    let scanner = Arc::new(IpScanner::new(options));
    let cancel = CancellationToken::new();

    // Ctrl-C cancels the scan; results found so far are still printed.
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_ctrlc.cancel();
    });

    let mut handle = {
        let scanner = scanner.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scanner.run(cancel).await })
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut last_found = 0usize;
    let summary = loop {
        tokio::select! {
            res = &mut handle => break res.context("scan task failed")??,
            _ = ticker.tick() => {
                let ips = scanner.available_ips();
                if ips.len() != last_found {
                    last_found = ips.len();
                    if let Some(best) = ips.first() {
                        eprintln!("found {} endpoints, best {} ({:.1} ms)", ips.len(), best.addr, rtt_ms(best.rtt));
                    }
                }
            }
        }
    };

    print_results_table(&summary);
    if let Some(path) = cli.output.as_deref() {
        if let Err(e) = write_results_json(path, &summary) {
            eprintln!("Failed to write JSON to {}: {}", path.display(), e);
        } else {
            println!("Wrote JSON results to {}", path.display());
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_toggle(flag: Toggle, configured: Option<bool>, auto: impl FnOnce() -> bool) -> bool {
    match flag {
        Toggle::On => true,
        Toggle::Off => false,
        Toggle::Auto => configured.unwrap_or_else(auto),
    }
}

fn build_options(cli: &Cli, config: &ScanConfig) -> Result<ScannerOptions> {
    let use_ipv4 = resolve_toggle(cli.ipv4, config.use_ipv4, || true);
    let use_ipv6 = resolve_toggle(cli.ipv6, config.use_ipv6, || match netdetect::detect_families() {
        Ok(f) => f.ipv6,
        Err(e) => {
            tracing::warn!(error = %e, "failed to inspect local interfaces, disabling IPv6");
            false
        }
    });

    let mut b = ScannerOptions::builder().use_ipv4(use_ipv4).use_ipv6(use_ipv6);
    if let Some(port) = cli.port {
        b = b.port(port);
    }
    b = config.apply(b)?;
    if let Some(port) = cli.port {
        b = b.port(port);
    }

    if let Some(spec) = &cli.ports {
        let list = if Path::new(spec).is_file() {
            ports::load_ports_from_path(spec)?
        } else {
            ports::parse_ports_str(spec).with_context(|| format!("invalid --ports: {spec}"))?
        };
        b = b.default_scan_ports(list);
    }
    if !cli.cidr.is_empty() {
        b = b.cidr_list(generator::parse_cidr_list(&cli.cidr));
    }
    for ep in &cli.endpoint {
        b = b.custom_endpoint_str(ep);
    }
    for spec in &cli.test_ports {
        let Some((host, list)) = spec.split_once('=') else {
            bail!("invalid --test-ports {spec}: expected HOST=PORTS");
        };
        let list = ports::parse_ports_str(list).with_context(|| format!("invalid --test-ports: {spec}"))?;
        b = b.test_endpoint_ports(host.trim(), list);
    }

    if cli.icmp {
        b = b.icmp_ping(true);
    }
    if cli.no_tcp {
        b = b.tcp_ping(false);
    }
    if let Some(v) = cli.tcp_port {
        b = b.tcp_ping_port(v);
    }
    if let Some(ms) = cli.icmp_rtt_ms {
        b = b.icmp_ping_filter_rtt(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.tcp_rtt_ms {
        b = b.tcp_ping_filter_rtt(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.timeout_ms {
        b = b.connection_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.handshake_timeout_ms {
        b = b.handshake_timeout(Duration::from_millis(ms));
    }
    if let Some(v) = cli.concurrency {
        b = b.concurrent_scanners(v);
    }
    if let Some(v) = cli.bucket_size {
        b = b.bucket_size(v);
    }
    if let Some(v) = cli.queue_size {
        b = b.ip_queue_size(v);
    }
    if let Some(v) = cli.stop_after {
        b = b.stop_on_first_good_ips(v);
    }
    if let Some(ms) = cli.scan_timeout_ms {
        b = b.scan_timeout(Duration::from_millis(ms));
    }

    let private_key = cli.private_key.clone().or_else(|| config.private_key.clone());
    let peer_public_key = cli.peer_public_key.clone().or_else(|| config.peer_public_key.clone());
    if let (Some(private_key), Some(peer_public_key)) = (private_key, peer_public_key) {
        b = b.credentials(HandshakeCredentials {
            private_key,
            peer_public_key,
            preshared_key: cli.preshared_key.clone().or_else(|| config.preshared_key.clone()),
        });
    }

    Ok(b.build()?)
}

fn rtt_ms(rtt: Duration) -> f64 {
    rtt.as_secs_f64() * 1000.0
}

fn print_results_table(summary: &ScanSummary) {
    let mut addr_w = "endpoint".len();
    for e in &summary.endpoints {
        addr_w = addr_w.max(e.addr.to_string().len());
    }
    let rtt_w = "rtt_ms".len().max(8);

    println!(
        "\nFound: {} (candidates: {}, icmp passed: {}, tcp passed: {}, handshakes ok/failed: {}/{})",
        summary.found,
        summary.candidates,
        summary.icmp_passed,
        summary.tcp_passed,
        summary.handshake_ok,
        summary.handshake_failed
    );
    println!(
        "{:<addr_w$}  {:>rtt_w$}",
        "endpoint",
        "rtt_ms",
        addr_w = addr_w,
        rtt_w = rtt_w
    );
    println!(
        "{:-<addr_w$}  {:-<rtt_w$}",
        "",
        "",
        addr_w = addr_w,
        rtt_w = rtt_w
    );
    for e in &summary.endpoints {
        println!(
            "{:<addr_w$}  {:>rtt_w$.2}",
            e.addr.to_string(),
            rtt_ms(e.rtt),
            addr_w = addr_w,
            rtt_w = rtt_w
        );
    }
}

fn write_results_json(path: &Path, summary: &ScanSummary) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}
