use anyhow::{bail, Context, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::state::SessionStatus;
use crate::capture::{
    negotiate_mime, CaptureSource, Segmenter, SegmenterConfig, MIME_CANDIDATES,
};
use crate::error::{CaptureError, StoreError};
use crate::store::DurableChunkStore;
use crate::upload::UploadCoordinator;

/// What became of a session once its owner let go of it. A failed or
/// aborted upload is deliberately not an `Err`: the durable copy is intact
/// and the caller must be able to tell "safely staged, needs manual retry"
/// apart from "confirmed delivered".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Remote commit succeeded; the local copy is gone
    Committed {
        session_id: String,
        remote_key: String,
    },
    /// Upload attempts exhausted; staged locally for recovery
    Failed { session_id: String },
    /// The capture source died mid-session; chunks flushed so far are staged
    Aborted { session_id: String },
    /// Capture produced no chunks at all
    Empty,
}

/// Validated status transition, persisted through the chunk store.
pub(crate) fn advance(
    store: &DurableChunkStore,
    session_id: &str,
    to: SessionStatus,
) -> Result<()> {
    let meta = store
        .load_meta(session_id)
        .with_context(|| format!("failed to load session {}", session_id))?;

    if meta.status == to {
        return Ok(());
    }
    if !meta.status.can_transition(to) {
        bail!(
            "illegal session transition for {}: {} -> {}",
            session_id,
            meta.status,
            to
        );
    }

    store.set_status(session_id, to)?;
    info!("session {}: {} -> {}", session_id, meta.status, to);
    Ok(())
}

/// Reconstruct a staged session and drive one logical upload, purging the
/// durable copy only after the remote commit succeeds.
///
/// Shared by the live session path and recovery retries; both always pass
/// through reconstruction, never a cached buffer. At most one logical
/// upload runs per session id: a concurrent caller waits at the gate until
/// the in-flight upload reaches a terminal state, then drives its own.
pub(crate) async fn stage_and_upload(
    store: &DurableChunkStore,
    coordinator: &UploadCoordinator,
    session_id: &str,
) -> Result<SessionOutcome> {
    let gate = store.upload_gate(session_id);
    let _in_flight = gate.lock().await;

    let meta = store
        .load_meta(session_id)
        .with_context(|| format!("failed to load session {}", session_id))?;

    // A session that crashed mid-capture never reached staged; bring it
    // there so reconstruction always sits between capture end and upload.
    if meta.status == SessionStatus::Capturing {
        advance(store, session_id, SessionStatus::Staged)?;
    }

    let buffer = match store.reconstruct(session_id) {
        Ok(buffer) => buffer,
        Err(StoreError::EmptySession(_)) => {
            // Nothing to deliver; deleting the empty entry is the whole job.
            store.purge(session_id)?;
            info!("session {} was empty, removed", session_id);
            return Ok(SessionOutcome::Empty);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to reconstruct session {}", session_id))
        }
    };

    advance(store, session_id, SessionStatus::Uploading)?;

    match coordinator.upload(&buffer, &meta.mime_type).await {
        Ok(remote_key) => {
            advance(store, session_id, SessionStatus::Committed)?;
            store.purge(session_id)?;
            info!(
                "session {} delivered as {} and purged",
                session_id, remote_key
            );
            Ok(SessionOutcome::Committed {
                session_id: session_id.to_string(),
                remote_key,
            })
        }
        Err(e) => {
            error!(
                "upload of session {} failed after all retries: {}",
                session_id, e
            );
            advance(store, session_id, SessionStatus::Failed)?;
            Ok(SessionOutcome::Failed {
                session_id: session_id.to_string(),
            })
        }
    }
}

/// One live capture-to-upload attempt.
///
/// Owns the capture source for its whole lifetime: the device is released on
/// every exit path through `stop`, whatever the upload outcome. At most one
/// upload runs for the session, driven from `stop` after both background
/// tasks have drained, so the final chunk can never be silently lost.
pub struct CaptureSession {
    store: Arc<DurableChunkStore>,
    coordinator: Arc<UploadCoordinator>,
    source: Box<dyn CaptureSource>,
    segmenter_config: SegmenterConfig,
    mime_type: String,
    /// Set by the append task when the first chunk lands
    session_id: Arc<Mutex<Option<String>>>,
    segment_task: Option<JoinHandle<Result<u64, CaptureError>>>,
    append_task: Option<JoinHandle<Result<Option<String>, StoreError>>>,
    started: bool,
}

impl CaptureSession {
    /// Negotiates the content type up front; a candidate set with nothing
    /// supported fails before any device is touched.
    pub fn new(
        store: Arc<DurableChunkStore>,
        coordinator: Arc<UploadCoordinator>,
        source: Box<dyn CaptureSource>,
        segmenter_config: SegmenterConfig,
    ) -> Result<Self, CaptureError> {
        let mime_type = negotiate_mime(MIME_CANDIDATES)?;

        Ok(Self {
            store,
            coordinator,
            source,
            segmenter_config,
            mime_type,
            session_id: Arc::new(Mutex::new(None)),
            segment_task: None,
            append_task: None,
            started: false,
        })
    }

    /// Start capturing. The store session itself is created lazily by the
    /// first segment, so a denied device never leaves an empty entry behind.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            warn!("capture session already started");
            return Ok(());
        }

        let frames = self
            .source
            .start()
            .await
            .context("failed to start capture source")?;

        info!("capture started via {} ({})", self.source.name(), self.mime_type);

        let (segment_tx, mut segment_rx) = mpsc::channel(100);
        let segmenter = Segmenter::new(self.segmenter_config.clone());
        self.segment_task = Some(tokio::spawn(segmenter.run(frames, segment_tx)));

        let store = Arc::clone(&self.store);
        let shared_id = Arc::clone(&self.session_id);
        let mime_type = self.mime_type.clone();

        self.append_task = Some(tokio::spawn(async move {
            while let Some(segment) = segment_rx.recv().await {
                let id = {
                    let mut guard = shared_id.lock().unwrap();
                    match guard.as_ref() {
                        Some(id) => id.clone(),
                        None => {
                            let meta = store.create_session(&mime_type)?;
                            *guard = Some(meta.session_id.clone());
                            meta.session_id
                        }
                    }
                };

                // Each append completes (or fails loudly) before the next
                // segment is taken; nothing is ever dropped silently.
                store.append(&id, segment.sequence_index, &segment.payload)?;
            }

            let id = shared_id.lock().unwrap().clone();
            Ok(id)
        }));

        self.started = true;
        Ok(())
    }

    /// Mute or unmute the capture output without fragmenting the chunk
    /// sequence.
    pub fn set_paused(&self, paused: bool) {
        self.source.set_paused(paused);
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().unwrap().clone()
    }

    /// Stop capturing, drain the pipeline, then stage and upload.
    ///
    /// The device is released before anything else; a failed flush or upload
    /// never leaks the capture stream.
    pub async fn stop(mut self) -> Result<SessionOutcome> {
        if !self.started {
            return Ok(SessionOutcome::Empty);
        }

        // A source that is no longer capturing before we asked it to stop
        // died in flight; its chunks are kept but not uploaded now.
        let stream_died = !self.source.is_capturing();

        let release_result = self.source.stop().await;

        let segment_result = match self.segment_task.take() {
            Some(task) => task.await.context("segmenter task panicked")?,
            None => Ok(0),
        };
        let appended_id = match self.append_task.take() {
            Some(task) => task.await.context("append task panicked")?,
            None => Ok(None),
        };

        release_result.context("failed to release capture device")?;

        let session_id = appended_id
            .context("chunk append failed; session is invalidated, not silently truncated")?;

        let Some(session_id) = session_id else {
            info!("capture ended with no chunks");
            return Ok(SessionOutcome::Empty);
        };

        if stream_died || segment_result.is_err() {
            if let Err(e) = segment_result {
                error!("capture aborted mid-session: {}", e);
            } else {
                error!("capture source died before stop was requested");
            }
            advance(&self.store, &session_id, SessionStatus::Aborted)?;
            return Ok(SessionOutcome::Aborted { session_id });
        }

        advance(&self.store, &session_id, SessionStatus::Staged)?;
        stage_and_upload(&self.store, &self.coordinator, &session_id).await
    }
}
