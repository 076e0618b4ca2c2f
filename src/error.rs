//! Error types: one enum per concern, each variant with a stable code.
//!
//! ERROR HANDLING
//! ==============
//! Only exhausted reconnects and a dead session block the consumer; those
//! surface through the published view, not through these types. Everything
//! here is either returned to a caller (`SendError`) or logged and absorbed
//! by the driver (`TransportError`, `CollaboratorError`).

/// Stable machine-readable code and retry hint for an error.
pub trait ErrorCode {
    fn error_code(&self) -> &'static str;
    fn retryable(&self) -> bool;
}

// =============================================================================
// TRANSPORT
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport write failed: {0}")]
    Write(String),
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "E_TRANSPORT_CONNECT",
            Self::Timeout(_) => "E_TRANSPORT_TIMEOUT",
            Self::Write(_) => "E_TRANSPORT_WRITE",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

// =============================================================================
// SEND
// =============================================================================

/// Why an outbound message did not reach the server. The local echo has
/// already been rolled back when the caller sees one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,

    #[error("message body is empty")]
    EmptyBody,

    #[error("send rejected: {0}")]
    Rejected(String),

    #[error("send timed out")]
    Timeout,

    #[error("session has shut down")]
    SessionClosed,
}

impl ErrorCode for SendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotConnected => "E_NOT_CONNECTED",
            Self::EmptyBody => "E_EMPTY_BODY",
            Self::Rejected(_) => "E_SEND_REJECTED",
            Self::Timeout => "E_SEND_TIMEOUT",
            Self::SessionClosed => "E_SESSION_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Rejected(_) | Self::Timeout)
    }
}

// =============================================================================
// COLLABORATORS
// =============================================================================

/// History fetch or liveness probe failure. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status}")]
    Status { status: u16 },

    #[error("response decode failed: {0}")]
    Decode(String),
}

impl ErrorCode for CollaboratorError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "E_COLLAB_REQUEST",
            Self::Status { .. } => "E_COLLAB_STATUS",
            Self::Decode(_) => "E_COLLAB_DECODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Status { status: 429 | 500..=599 })
    }
}
