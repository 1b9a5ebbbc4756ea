//! Terminal codes a per-connection task can report (§7).

use thiserror::Error;

/// How a connection-handler task ended. Every variant is reachable from
/// normal operation; none of these propagate as a panic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    #[error("clean close, no queued work")]
    NoError,
    #[error("message answered")]
    Answered,
    #[error("message sent, awaiting answer via TTL")]
    Sent,
    #[error("identity frame missing or malformed unit-id")]
    NoUnitId,
    #[error("identity ok but nothing queued for this device")]
    NoMessageToSend,
    #[error("could not acquire device use-lock within 30s")]
    DeviceLockTimeout,
    #[error("no AES key available for this unit-id")]
    MissingAesKey,
    #[error("decrypt or JSON-parse failure on a data frame")]
    ResponseError,
    #[error("socket error: {0}")]
    SocketError(String),
    #[error("unclassified error: {0}")]
    UnknownError(String),
}

impl ConnectionOutcome {
    /// The log level the error-handling design assigns this outcome (§7).
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self {
            ConnectionOutcome::NoError | ConnectionOutcome::NoMessageToSend => Level::DEBUG,
            ConnectionOutcome::Answered | ConnectionOutcome::Sent => Level::INFO,
            ConnectionOutcome::NoUnitId | ConnectionOutcome::DeviceLockTimeout => Level::WARN,
            ConnectionOutcome::MissingAesKey
            | ConnectionOutcome::ResponseError
            | ConnectionOutcome::SocketError(_)
            | ConnectionOutcome::UnknownError(_) => Level::ERROR,
        }
    }
}

impl From<std::io::Error> for ConnectionOutcome {
    fn from(e: std::io::Error) -> Self {
        ConnectionOutcome::SocketError(e.to_string())
    }
}
