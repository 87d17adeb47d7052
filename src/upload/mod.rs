//! Block-oriented upload to the transcription service
//!
//! A reconstructed session buffer goes out as a sequence of independently
//! retryable block PUTs; a final blocklist commit assembles them into one
//! object on the remote.

mod block;
mod coordinator;
mod remote;
mod retry;

pub use block::{block_id, partition, DEFAULT_BLOCK_SIZE};
pub use coordinator::{ProgressFn, UploadConfig, UploadCoordinator};
pub use remote::{file_extension, HttpRemoteStore, RemoteStore, UploadTicket};
pub use retry::RetryPolicy;
