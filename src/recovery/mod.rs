//! Recovery of sessions that staged locally but never committed
//!
//! Any un-purged session means an earlier upload did not complete; the
//! manager surfaces them and re-drives the upload pipeline on demand.
//! Nothing here runs automatically: discarding a session is always an
//! explicit caller action.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::session::{stage_and_upload, SessionOutcome, SessionStatus};
use crate::store::DurableChunkStore;
use crate::upload::UploadCoordinator;

/// Summary of one recoverable session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub mime_type: String,
    pub chunk_count: u64,
    /// Approximate staged size (sum of chunk payloads)
    pub total_bytes: u64,
    pub status: SessionStatus,
}

pub struct RecoveryManager {
    store: Arc<DurableChunkStore>,
    coordinator: Arc<UploadCoordinator>,
}

impl RecoveryManager {
    pub fn new(store: Arc<DurableChunkStore>, coordinator: Arc<UploadCoordinator>) -> Self {
        Self { store, coordinator }
    }

    /// All un-purged sessions that are not committed, oldest first.
    pub fn list_recoverable(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();

        for session_id in self.store.list_sessions()? {
            let meta = match self.store.load_meta(&session_id) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("skipping unreadable session {}: {}", session_id, e);
                    continue;
                }
            };

            if meta.status == SessionStatus::Committed {
                continue;
            }

            let total_bytes = self.store.total_bytes(&session_id).unwrap_or(0);

            summaries.push(SessionSummary {
                session_id: meta.session_id,
                created_at: meta.created_at,
                mime_type: meta.mime_type,
                chunk_count: meta.chunk_count,
                total_bytes,
                status: meta.status,
            });
        }

        summaries.sort_by_key(|s| s.created_at);
        Ok(summaries)
    }

    /// Re-drive reconstruct + upload for a staged session; purges on
    /// success, leaves the entry in place on failure. If an upload for the
    /// same session is already in flight, this waits for it to finish
    /// before driving its own.
    pub async fn retry(&self, session_id: &str) -> Result<SessionOutcome> {
        info!("retrying upload for session {}", session_id);

        self.store
            .load_meta(session_id)
            .with_context(|| format!("no recoverable session {}", session_id))?;

        stage_and_upload(&self.store, &self.coordinator, session_id).await
    }

    /// Drop a staged session without uploading it.
    pub fn discard(&self, session_id: &str) -> Result<()> {
        info!("discarding session {} without upload", session_id);
        self.store
            .purge(session_id)
            .with_context(|| format!("failed to discard session {}", session_id))
    }
}
