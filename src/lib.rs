pub mod capture;
pub mod config;
pub mod error;
pub mod recovery;
pub mod session;
pub mod store;
pub mod upload;

pub use capture::{
    create_source, AudioFrame, AudioStreamSource, CaptureKind, CaptureSource, DeviceSelector,
    GainControl, MixedSource, Segment, Segmenter, SegmenterConfig,
};
pub use config::Config;
pub use error::{CaptureError, StoreError, UploadError};
pub use recovery::{RecoveryManager, SessionSummary};
pub use session::{CaptureSession, SessionOutcome, SessionStatus};
pub use store::{DurableChunkStore, SessionMeta};
pub use upload::{HttpRemoteStore, RemoteStore, RetryPolicy, UploadConfig, UploadCoordinator, UploadTicket};
