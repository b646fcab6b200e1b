use std::io;

/// Configuration and candidate-generation failures.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("both IPv4 and IPv6 are disabled, nothing to scan")]
    NoFamilies,

    #[error("no IP ranges or endpoints configured")]
    NoCandidates,

    #[error("no IPs generated from the configured ranges")]
    NothingGenerated,

    #[error("invalid handshake credentials: {0}")]
    Credentials(String),

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Why a single probe did not produce a measurement. Never fatal to a scan.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe cancelled")]
    Cancelled,

    #[error("timed out")]
    Timeout,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl ProbeError {
    /// Cancellation is expected during shutdown and is kept out of the logs.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProbeError::Cancelled)
    }
}
