use std::sync::Arc;

use tracing::{debug, info};

use super::block::{block_id, partition, DEFAULT_BLOCK_SIZE};
use super::remote::{file_extension, RemoteStore};
use super::retry::RetryPolicy;
use crate::error::UploadError;

/// Observer for byte-level progress, called with 0..=100 after each block.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Clone, Copy)]
pub struct UploadConfig {
    pub block_size: usize,
    pub ticket_retry: RetryPolicy,
    pub upload_retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            ticket_retry: RetryPolicy::ticket(),
            upload_retry: RetryPolicy::upload(),
        }
    }
}

/// Drives one logical upload: ticket, blocks in order, blocklist commit.
///
/// The ticket is fetched once per logical upload and reused across the
/// internal retries of that upload; the block+commit sequence retries as a
/// unit. The caller purges the durable copy only after `upload` returns a
/// remote key.
pub struct UploadCoordinator {
    remote: Arc<dyn RemoteStore>,
    config: UploadConfig,
    on_progress: Option<ProgressFn>,
}

impl UploadCoordinator {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            config: UploadConfig::default(),
            on_progress: None,
        }
    }

    pub fn with_config(mut self, config: UploadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, observer: ProgressFn) -> Self {
        self.on_progress = Some(observer);
        self
    }

    /// Upload a reconstructed buffer; returns the remote key the
    /// transcription service will use to find the object.
    pub async fn upload(&self, buffer: &[u8], mime_type: &str) -> Result<String, UploadError> {
        let extension = file_extension(mime_type);

        // Ticket issuance is idempotent on the remote, so it retries on its
        // own budget, outside the block+commit unit.
        let ticket = self
            .config
            .ticket_retry
            .run("ticket issuance", |_| self.remote.issue_ticket(extension))
            .await?;

        let blocks = partition(buffer, self.config.block_size);
        let ids: Vec<String> = (0..blocks.len()).map(block_id).collect();

        info!(
            "uploading {} bytes as {} blocks (key {})",
            buffer.len(),
            blocks.len(),
            ticket.remote_key
        );

        self.config
            .upload_retry
            .run("block upload", |attempt| {
                let ticket = &ticket;
                let blocks = &blocks;
                let ids = &ids;
                async move {
                    debug!("block upload attempt {}", attempt);

                    for (ordinal, (block, id)) in blocks.iter().zip(ids.iter()).enumerate() {
                        self.remote.put_block(ticket, id, block.to_vec()).await?;
                        self.report_progress(ordinal + 1, blocks.len());
                    }

                    // Commit lists ids in ascending ordinal order; the
                    // remote assembles the final object atomically.
                    self.remote.commit(ticket, ids).await
                }
            })
            .await?;

        Ok(ticket.remote_key)
    }

    fn report_progress(&self, completed: usize, total: usize) {
        if let Some(observer) = &self.on_progress {
            let percent = (completed * 100 / total.max(1)) as u8;
            observer(percent);
        }
    }
}
