//! Session lifecycle orchestration
//!
//! Ties the pipeline together: capture source -> segmenter -> durable chunk
//! store while live, then staged -> uploading -> committed (or failed, with
//! the durable copy retained for recovery).

mod session;
mod state;

pub use session::{CaptureSession, SessionOutcome};
pub use state::SessionStatus;

pub(crate) use session::stage_and_upload;
