use std::fmt;

/// Broad classification of orchestration failures.
///
/// Callers usually match on the kind rather than the full error: `Timeout`
/// and `Cancelled` both mean "we gave up", while `Network` means "the server
/// said no".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Cancelled,
    Configuration,
    ChannelClosed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Configuration => "configuration",
            ErrorKind::ChannelClosed => "channel closed",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the orchestration layer.
///
/// The error is `Clone` because a single terminal outcome is broadcast to
/// every caller waiting on the same fingerprint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Transport failure or non-2xx response. Not retried automatically.
    #[error("network failure: {0}")]
    Network(String),

    /// The operation exceeded its time budget.
    #[error("request timed out after {0}ms")]
    Timeout(i64),

    /// Explicit `cancel`/`cancel_all`, delivered to every waiter.
    #[error("request cancelled")]
    Cancelled,

    /// Invalid option value, reported at construction time.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The result channel closed before a terminal outcome arrived.
    #[error("result channel closed before completion")]
    ChannelClosed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(_) => ErrorKind::Network,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::ChannelClosed => ErrorKind::ChannelClosed,
        }
    }
}
