use std::time::Duration;

use mavlink::common::MavMessage;

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
#[derive(Debug)]
pub enum Error {
    /// The vehicle link could not be opened or the vehicle never answered. The String contains the reason.
    Connection(String),
    /// A telemetry value needed for a computation is missing or stale. Names the missing value.
    TelemetryUnavailable(&'static str),
    /// A readiness poll (armable, armed, altitude) did not succeed within its bound.
    ReadinessTimeout {
        /// What the poll was waiting for
        what: &'static str,
        /// The bound that was exceeded
        after: Duration,
    },
    /// Unexpected MAVLink protocol error. The String contains the reason.
    ProtocolError(String),
    /// The vehicle link is closed.
    Disconnected,
    /// A configuration value is not usable. The String contains the reason.
    InvalidConfig(String),
    /// Error with the async runtime.
    SystemError(String),
    /// Socket level error.
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Connection(reason) => write!(f, "cannot connect to vehicle: {}", reason),
            Error::TelemetryUnavailable(what) => write!(f, "telemetry unavailable: {}", what),
            Error::ReadinessTimeout { what, after } => {
                write!(f, "gave up waiting for {} after {:?}", what, after)
            }
            Error::ProtocolError(reason) => write!(f, "protocol error: {}", reason),
            Error::Disconnected => write!(f, "vehicle link disconnected"),
            Error::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
            Error::SystemError(reason) => write!(f, "system error: {}", reason),
            Error::IoError(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::IoError(error)
    }
}

impl From<mavlink::error::MessageWriteError> for Error {
    fn from(error: mavlink::error::MessageWriteError) -> Self {
        Self::ProtocolError(format!("{:?}", error))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::SystemError(format!("{}", error))
    }
}

impl From<flume::RecvError> for Error {
    fn from(_: flume::RecvError) -> Self {
        self::Error::Disconnected
    }
}

impl From<flume::SendError<MavMessage>> for Error {
    fn from(_: flume::SendError<MavMessage>) -> Self {
        self::Error::Disconnected
    }
}
