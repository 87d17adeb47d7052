use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::session::SessionStatus;

/// Persisted metadata for one capture session, stored as `session.json`
/// inside the session directory and rewritten atomically on every change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Unique session identifier (uuid v4), generated at first chunk write
    pub session_id: String,
    /// When the first chunk arrived
    pub created_at: DateTime<Utc>,
    /// Content type negotiated at capture start
    pub mime_type: String,
    /// Number of chunks appended so far
    pub chunk_count: u64,
    /// Lifecycle state, used by recovery to skip committed sessions
    pub status: SessionStatus,
}

const META_FILE: &str = "session.json";
const CHUNK_PREFIX: &str = "chunk-";
const CHUNK_SUFFIX: &str = ".bin";

/// Crash-resilient local store of capture chunks, keyed by session id.
///
/// Layout: one directory per session under the root, holding `session.json`
/// plus `chunk-NNNNNN.bin` files named by sequence index. Everything is
/// recoverable by scanning the directory tree; no in-memory index survives
/// or is needed across restarts.
///
/// Appends and purges for the same session id are serialized through a lock
/// registry; different sessions proceed independently. Logical uploads for
/// one session are additionally serialized through an async gate, so a
/// second upload for the same id waits for the in-flight one.
#[derive(Debug)]
pub struct DurableChunkStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    upload_gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DurableChunkStore {
    /// Open the store, creating the root directory if needed. Fails with
    /// `StoreError::Unavailable` if local storage cannot be used at all;
    /// callers must not start capturing in that case.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();

        fs::create_dir_all(&root).map_err(|source| StoreError::Unavailable {
            path: root.clone(),
            source,
        })?;

        // A root we cannot enumerate is as unusable as one we cannot create.
        fs::read_dir(&root).map_err(|source| StoreError::Unavailable {
            path: root.clone(),
            source,
        })?;

        info!("chunk store opened at {}", root.display());

        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
            upload_gates: Mutex::new(HashMap::new()),
        })
    }

    /// Create a fresh session entry and return its metadata.
    pub fn create_session(&self, mime_type: &str) -> Result<SessionMeta, StoreError> {
        let meta = SessionMeta {
            session_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            mime_type: mime_type.to_string(),
            chunk_count: 0,
            status: SessionStatus::Capturing,
        };

        let dir = self.session_dir(&meta.session_id);
        fs::create_dir_all(&dir)?;
        self.write_meta(&meta)?;

        info!("session {} created ({})", meta.session_id, meta.mime_type);
        Ok(meta)
    }

    /// Append one chunk. Idempotent per `(session_id, sequence_index)`: a
    /// chunk that already exists on disk is left untouched.
    pub fn append(
        &self,
        session_id: &str,
        sequence_index: u64,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap();

        let dir = self.session_dir(session_id);
        let chunk_path = dir.join(chunk_file_name(sequence_index));

        if chunk_path.exists() {
            debug!(
                "chunk {} of session {} already stored, skipping",
                sequence_index, session_id
            );
            return Ok(());
        }

        write_atomic(&chunk_path, payload)?;

        let mut meta = self.read_meta(session_id)?;
        if sequence_index + 1 > meta.chunk_count {
            meta.chunk_count = sequence_index + 1;
            self.write_meta(&meta)?;
        }

        debug!(
            "chunk {} of session {} stored ({} bytes)",
            sequence_index,
            session_id,
            payload.len()
        );
        Ok(())
    }

    /// All sessions not yet purged, discovered by scanning the root.
    pub fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let mut sessions = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            if entry.path().join(META_FILE).is_file() {
                sessions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        sessions.sort();
        Ok(sessions)
    }

    /// Load a session's persisted metadata.
    pub fn load_meta(&self, session_id: &str) -> Result<SessionMeta, StoreError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap();
        self.read_meta(session_id)
    }

    /// Persist a status transition.
    pub fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<(), StoreError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap();

        let mut meta = self.read_meta(session_id)?;
        meta.status = status;
        self.write_meta(&meta)
    }

    /// Concatenate all chunks of a session in sequence order.
    ///
    /// Fails with `EmptySession` when no chunks exist and with `Corrupt`
    /// when the sequence has a gap.
    pub fn reconstruct(&self, session_id: &str) -> Result<Vec<u8>, StoreError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap();

        let indices = self.chunk_indices(session_id)?;
        if indices.is_empty() {
            return Err(StoreError::EmptySession(session_id.to_string()));
        }

        // Filenames are unique per index, so duplicates cannot occur; a gap
        // means a lost append and the buffer cannot be trusted.
        for (expected, &actual) in indices.iter().enumerate() {
            if actual != expected as u64 {
                return Err(StoreError::Corrupt {
                    session_id: session_id.to_string(),
                    detail: format!("expected chunk {} but found {}", expected, actual),
                });
            }
        }

        let dir = self.session_dir(session_id);
        let mut buffer = Vec::new();
        for index in indices {
            let bytes = fs::read(dir.join(chunk_file_name(index)))?;
            buffer.extend_from_slice(&bytes);
        }

        info!(
            "session {} reconstructed: {} bytes",
            session_id,
            buffer.len()
        );
        Ok(buffer)
    }

    /// Total payload bytes currently staged for a session.
    pub fn total_bytes(&self, session_id: &str) -> Result<u64, StoreError> {
        let dir = self.session_dir(session_id);
        let mut total = 0;

        for index in self.chunk_indices(session_id)? {
            total += fs::metadata(dir.join(chunk_file_name(index)))?.len();
        }

        Ok(total)
    }

    /// Delete all chunks and metadata for a session. Purging a session that
    /// does not exist is a no-op, not an error.
    pub fn purge(&self, session_id: &str) -> Result<(), StoreError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap();

        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("session {} purged", session_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("purge of absent session {} ignored", session_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn read_meta(&self, session_id: &str) -> Result<SessionMeta, StoreError> {
        let bytes = fs::read(self.session_dir(session_id).join(META_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_meta(&self, meta: &SessionMeta) -> Result<(), StoreError> {
        let path = self.session_dir(&meta.session_id).join(META_FILE);
        write_atomic(&path, &serde_json::to_vec_pretty(meta)?)
    }

    /// Sorted chunk indices found on disk for a session.
    fn chunk_indices(&self, session_id: &str) -> Result<Vec<u64>, StoreError> {
        let dir = self.session_dir(session_id);
        let mut indices = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if let Some(index) = parse_chunk_index(&name) {
                indices.push(index);
            } else if name != META_FILE && !name.ends_with(".tmp") {
                warn!("unexpected file in session {}: {}", session_id, name);
            }
        }

        indices.sort_unstable();
        Ok(indices)
    }

    /// Async gate serializing logical uploads for one session. Holding the
    /// gate across the whole reconstruct-upload-purge drive keeps at most
    /// one upload in flight per session id; a later caller waits here until
    /// the in-flight upload reaches a terminal state.
    pub fn upload_gate(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.upload_gates.lock().unwrap();
        Arc::clone(
            gates
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

fn chunk_file_name(sequence_index: u64) -> String {
    format!("{}{:06}{}", CHUNK_PREFIX, sequence_index, CHUNK_SUFFIX)
}

fn parse_chunk_index(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(CHUNK_PREFIX)?
        .strip_suffix(CHUNK_SUFFIX)?
        .parse()
        .ok()
}

/// Write via a temp file in the same directory plus rename, so a crash
/// mid-write never leaves a half-written chunk or metadata file behind.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
