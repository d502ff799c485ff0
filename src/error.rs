//! Error taxonomy: NET / PROTO / CAL / IO, plus the top-level `DaqError`
//! that carries a stable code and a suggested recovery action (spec.md §7).

use std::fmt;

/// Suggested recovery action surfaced alongside every error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum RecoveryAction {
    Retry,
    Reconnect,
    Fallback,
    ChooseDirectory,
    Manual,
}

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("connection refused to {addr}")]
    ConnectRefused { addr: String },
    #[error("connect timed out after {millis} ms to {addr}")]
    ConnectTimeout { addr: String, millis: u64 },
    #[error("socket error: {0}")]
    Socket(String),
    #[error("disconnected mid-stream")]
    DisconnectedMidStream,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("malformed datagram: {0}")]
    Malformed(String),
    #[error("wrong length: expected {expected}, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("unexpected TCP response: {0}")]
    UnexpectedResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CalError {
    #[error("HTTP calibration request failed: {0}")]
    HttpFailed(String),
    #[error("TCP calibration request failed: {0}")]
    TcpFailed(String),
    #[error("calibration document parse failed: {0}")]
    ParseFailed(String),
    #[error("calibration unavailable from any source")]
    Unavailable,
    #[error("bias operation failed: {0}")]
    BiasFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum IoErrorKind {
    #[error("output directory not writable: {0}")]
    DirectoryNotWritable(String),
    #[error("disk full")]
    DiskFull,
    #[error("rotation failed: {0}")]
    RotationFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("close failed: {0}")]
    CloseFailed(String),
}

/// Top-level error carrying a stable code (e.g. `NET-002`) and a recovery hint.
#[derive(Debug, thiserror::Error)]
pub struct DaqError {
    pub code: &'static str,
    pub recovery: RecoveryAction,
    #[source]
    pub source: DaqErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum DaqErrorKind {
    #[error(transparent)]
    Net(#[from] NetError),
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error(transparent)]
    Cal(#[from] CalError),
    #[error(transparent)]
    Io(#[from] IoErrorKind),
    #[error("configuration error: {0}")]
    Config(String),
}

impl fmt::Display for DaqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (recovery: {})", self.code, self.source, self.recovery)
    }
}

impl DaqError {
    pub fn new(code: &'static str, recovery: RecoveryAction, source: impl Into<DaqErrorKind>) -> Self {
        Self { code, recovery, source: source.into() }
    }

    pub fn net(code: &'static str, recovery: RecoveryAction, e: NetError) -> Self {
        Self::new(code, recovery, e)
    }

    pub fn proto(code: &'static str, e: ProtoError) -> Self {
        // Protocol errors never surface as a blocking error by policy (spec.md §7):
        // the receive loop counts and swallows them. Callers that do propagate a
        // PROTO error (command channel decode failures) default to Retry.
        Self::new(code, RecoveryAction::Retry, e)
    }

    pub fn cal(code: &'static str, recovery: RecoveryAction, e: CalError) -> Self {
        Self::new(code, recovery, e)
    }

    pub fn io(code: &'static str, recovery: RecoveryAction, e: IoErrorKind) -> Self {
        Self::new(code, recovery, e)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new("CFG-001", RecoveryAction::Manual, DaqErrorKind::Config(msg.into()))
    }
}

pub type DaqResult<T> = Result<T, DaqError>;
