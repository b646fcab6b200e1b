//! Library crate for endpoint-scan-rs: sample large IP ranges, probe candidates through a
//! concurrent ICMP / TCP / handshake pipeline, and keep the lowest-RTT endpoints.
pub mod config;
pub mod defaults;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod generator;
pub mod lcg;
pub mod netdetect;
pub mod options;
pub mod ports;
pub mod probe;
pub mod queue;
pub mod scanner;
pub mod types;

pub use error::{ProbeError, ScanError};
pub use options::{HandshakeCredentials, ScannerOptions, ScannerOptionsBuilder};
pub use scanner::IpScanner;
pub use types::{IpInfo, ScanSummary};
