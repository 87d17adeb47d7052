use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::UploadError;

/// Single-use write destination handed out by the transcription service.
/// One ticket serves one logical upload, including that upload's internal
/// retries; a new logical upload fetches a fresh ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTicket {
    /// Opaque URL-shaped write target
    pub destination: String,
    /// Identifier the remote uses to find the object once committed
    pub remote_key: String,
}

/// File extension the ticket endpoint expects for a content type.
pub fn file_extension(mime_type: &str) -> &str {
    let essence = mime_type.split(';').next().unwrap_or(mime_type).trim();
    match essence {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/webm" => "webm",
        "audio/mp4" => "mp4",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        other => other.split('/').next_back().unwrap_or("bin"),
    }
}

/// The remote side of the block upload protocol.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Obtain a fresh single-use upload destination
    async fn issue_ticket(&self, file_extension: &str) -> Result<UploadTicket, UploadError>;

    /// PUT one block to the ticket's destination
    async fn put_block(
        &self,
        ticket: &UploadTicket,
        block_id: &str,
        payload: Vec<u8>,
    ) -> Result<(), UploadError>;

    /// Atomically assemble previously uploaded blocks into the final object
    async fn commit(&self, ticket: &UploadTicket, block_ids: &[String]) -> Result<(), UploadError>;
}

#[derive(Debug, Deserialize)]
struct TicketResponse {
    destination: String,
    remote_key: String,
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    blocks: &'a [String],
}

/// HTTP implementation of the block upload protocol.
///
/// Blocks go out as independent PUTs tagged with their block id, so a
/// network blip only costs one block, not the whole object; the blocklist
/// commit assembles them atomically on the remote.
pub struct HttpRemoteStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn map_transport(e: reqwest::Error) -> UploadError {
        if e.is_timeout() {
            UploadError::Timeout(e.to_string())
        } else {
            UploadError::Network(e.to_string())
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn issue_ticket(&self, file_extension: &str) -> Result<UploadTicket, UploadError> {
        let url = format!("{}/v1/uploads/ticket", self.base_url);
        debug!("requesting upload ticket for .{}", file_extension);

        let response = self
            .client
            .get(&url)
            .query(&[("extension", file_extension)])
            .send()
            .await
            .map_err(|e| UploadError::TicketUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UploadError::TicketUnavailable(format!(
                "status {}",
                response.status().as_u16()
            )));
        }

        let ticket: TicketResponse = response
            .json()
            .await
            .map_err(|e| UploadError::TicketUnavailable(e.to_string()))?;

        info!("upload ticket issued: key {}", ticket.remote_key);
        Ok(UploadTicket {
            destination: ticket.destination,
            remote_key: ticket.remote_key,
        })
    }

    async fn put_block(
        &self,
        ticket: &UploadTicket,
        block_id: &str,
        payload: Vec<u8>,
    ) -> Result<(), UploadError> {
        let response = self
            .client
            .put(&ticket.destination)
            .query(&[("comp", "block"), ("blockid", block_id)])
            .body(payload)
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            return Err(UploadError::RemoteRejected {
                operation: format!("block {}", block_id),
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    async fn commit(&self, ticket: &UploadTicket, block_ids: &[String]) -> Result<(), UploadError> {
        let response = self
            .client
            .put(&ticket.destination)
            .query(&[("comp", "blocklist")])
            .json(&CommitRequest { blocks: block_ids })
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            return Err(UploadError::RemoteRejected {
                operation: "commit".to_string(),
                status: response.status().as_u16(),
            });
        }

        info!(
            "upload committed: key {} ({} blocks)",
            ticket.remote_key,
            block_ids.len()
        );
        Ok(())
    }
}
