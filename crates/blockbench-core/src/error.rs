use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("peer {peer}: {reason}{}", status_suffix(.status))]
    Connectivity {
        peer: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("node maintenance failed: {reason}{}", status_suffix(.status))]
    Maintenance { status: Option<u16>, reason: String },

    #[error("fetch of {address} failed: {reason}{}", status_suffix(.status))]
    Fetch {
        address: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("block {address} does not match its digest")]
    Integrity { address: String },

    #[error("corrupt ledger at {path}: {reason}")]
    CorruptLedger { path: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl BenchError {
    /// Lost trials are measurement noise; everything else means the node,
    /// the peer or the results directory is unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Fetch { .. } | Self::Integrity { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Connectivity { status, .. }
            | Self::Maintenance { status, .. }
            | Self::Fetch { status, .. } => *status,
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

pub type BenchResult<T> = Result<T, BenchError>;
