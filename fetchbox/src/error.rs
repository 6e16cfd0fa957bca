//! Error types for reply operations.

use thiserror::Error;

/// Terminal error of a reply.
///
/// Every failed reply surfaces exactly one of these alongside its finish
/// notification. Protocol-usage mistakes (double finish, releasing an
/// unowned key) are not errors of this type; they are logged and recovered
/// in place.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplyError {
    /// The remote host refused the connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// The remote host closed the connection prematurely.
    #[error("remote host closed the connection")]
    RemoteHostClosed,

    /// Host name resolution failed.
    #[error("host not found")]
    HostNotFound,

    /// The operation timed out (reported by the transport).
    #[error("operation timed out")]
    TimeoutError,

    /// The operation was aborted by the caller.
    #[error("operation canceled")]
    OperationCanceled,

    /// The TLS handshake failed.
    #[error("SSL handshake failed")]
    SslHandshakeFailed,

    /// The network path changed and the operation could not be resumed.
    #[error("temporary network failure")]
    TemporaryNetworkFailure,

    /// No network session could be established.
    #[error("network session failed")]
    SessionFailed,

    /// The proxy demanded credentials that were not supplied.
    #[error("proxy authentication required")]
    ProxyAuthenticationRequired,

    /// The origin demanded credentials that were not supplied.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The requested content does not exist.
    #[error("content not found")]
    ContentNotFound,

    /// Access to the requested content was denied.
    #[error("content access denied")]
    ContentAccessDenied,

    /// The transport detected a protocol violation.
    #[error("protocol failure")]
    ProtocolFailure,

    /// The engine itself failed (worker startup, internal channel loss).
    #[error("internal failure: {0}")]
    InternalFailure(String),

    /// Unclassified failure.
    #[error("unknown network error")]
    UnknownError,
}

impl ReplyError {
    /// `true` for conditions that resolve themselves when connectivity
    /// returns; the engine retries these instead of finishing the reply.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TemporaryNetworkFailure)
    }
}

impl From<std::io::Error> for ReplyError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::ContentNotFound,
            ErrorKind::PermissionDenied => Self::ContentAccessDenied,
            ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => Self::RemoteHostClosed,
            ErrorKind::TimedOut => Self::TimeoutError,
            _ => Self::InternalFailure(err.to_string()),
        }
    }
}
