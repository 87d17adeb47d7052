use std::path::PathBuf;
use thiserror::Error;

/// Capture-path failures. These surface immediately to the caller with no
/// retry: the user has to re-grant permission or pick another device.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No usable capture device (missing, busy, or unplugged)
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The platform refused access to the device
    #[error("permission denied for capture device: {0}")]
    PermissionDenied(String),

    /// The shared screen stream carries no audio track
    #[error("shared screen has no audio track")]
    NoAudioTrack,

    /// None of the candidate content types is supported by the encoder
    #[error("no supported mime type among candidates: {0:?}")]
    UnsupportedMimeType(Vec<String>),

    /// The device stream failed after capture had started
    #[error("capture stream failed: {0}")]
    Stream(String),
}

/// Durable chunk store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing directory cannot be opened or created. The caller must
    /// not start capturing: chunks would be unrecoverable after a crash.
    #[error("chunk store unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reconstruction of a session that holds zero chunks
    #[error("session {0} has no chunks")]
    EmptySession(String),

    /// The chunk sequence has a gap; the session cannot be reconstructed
    #[error("session {session_id} is corrupt: {detail}")]
    Corrupt { session_id: String, detail: String },

    #[error("chunk store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Upload-path failures. Transient variants are retried internally up to the
/// documented attempt budgets before being surfaced.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The remote cannot issue a write destination
    #[error("upload ticket unavailable: {0}")]
    TicketUnavailable(String),

    /// Transport-level failure (connection refused, reset, DNS, ...)
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete in time; treated like a network error
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The remote answered with a non-success status on a block or commit
    #[error("remote rejected {operation}: status {status}")]
    RemoteRejected { operation: String, status: u16 },
}
