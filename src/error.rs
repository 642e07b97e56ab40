//! Typed error kinds for the transport, ADB and Fastboot layers.
use thiserror::Error;

/// Errors produced by a `Transport` impl (USB or TCP bulk pipe).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("read failed: {message}")]
    ReadFailed { message: String, timed_out: bool },
    #[error("write failed: {message}")]
    WriteFailed { message: String, timed_out: bool },
    #[error("timed out after {1}ms: {0}")]
    TcpTimeout(String, u32),
}

impl TransportError {
    /// True if this failure was specifically a timeout, as opposed to some
    /// other I/O failure. Used to re-label the public-key enrollment wait as
    /// `AdbError::DeviceAuthError`.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::TcpTimeout(..)
                | TransportError::ReadFailed { timed_out: true, .. }
                | TransportError::WriteFailed { timed_out: true, .. }
        )
    }
}

/// Errors from the ADB transport multiplexer and filesync sub-protocol.
#[derive(Debug, Error)]
pub enum AdbError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("device authentication failed: {0}")]
    DeviceAuthError(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid checksum: expected {expected:#010x}, got {actual:#010x}")]
    InvalidChecksum { expected: u32, actual: u32 },

    #[error("interleaved stream data detected")]
    InterleavedData,

    #[error("device reported a failure: {0}")]
    AdbCommandFailure(String),

    #[error("push failed: {0}")]
    PushFailed(String),
}

impl AdbError {
    /// Maps a transport failure that occurred while waiting on the
    /// public-key-enrollment read into the distinct `DeviceAuthError` kind
    /// §4.1/§7 require. Non-timeout transport failures pass through
    /// unchanged.
    pub fn from_auth_wait(e: TransportError) -> Self {
        if e.is_timeout() {
            AdbError::DeviceAuthError("accept auth key on device".to_string())
        } else {
            AdbError::Transport(e)
        }
    }
}

/// Errors from the Fastboot bootloader protocol.
#[derive(Debug, Error)]
pub enum FastbootError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("device refused to download {requested} bytes (accepted {accepted})")]
    TransferError { requested: u32, accepted: u32 },

    #[error("FAIL: {0}")]
    RemoteFailure(String),

    #[error("expected {expected} response, got {got}")]
    StateMismatch { expected: &'static str, got: String },

    #[error("got an unknown response header {header:?} ({trailing:?})")]
    InvalidResponse { header: String, trailing: Vec<u8> },
}
