use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one capture-to-upload attempt.
///
/// Transitions are one-directional except the manual retry edges back into
/// `Uploading`. Nothing may skip `Staged` on the way out of capture:
/// reconstruction always happens between capture end and the first upload
/// attempt, because a session can be resumed in a fresh process that has a
/// populated chunk store but no live capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Chunks are being appended by a live capture source
    Capturing,
    /// Capture ended; the durable copy is complete and reconstructable
    Staged,
    /// An upload coordinator is driving blocks to the remote
    Uploading,
    /// The remote commit succeeded (terminal; the local copy is purged)
    Committed,
    /// Upload attempts exhausted; retained until manually retried or discarded
    Failed,
    /// The capture source failed before a clean stop
    Aborted,
}

impl SessionStatus {
    pub fn can_transition(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Capturing, Staged)
                | (Capturing, Aborted)
                | (Staged, Uploading)
                | (Uploading, Committed)
                | (Uploading, Failed)
                // manual retry edges; a crashed `uploading` session may also
                // be re-driven after restart
                | (Failed, Uploading)
                | (Aborted, Uploading)
                | (Uploading, Uploading)
        )
    }

    /// Whether the session has reached a state no automatic path leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Committed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Capturing => "capturing",
            SessionStatus::Staged => "staged",
            SessionStatus::Uploading => "uploading",
            SessionStatus::Committed => "committed",
            SessionStatus::Failed => "failed",
            SessionStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
