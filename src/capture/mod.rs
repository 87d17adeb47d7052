pub mod cpal_source;
pub mod mixer;
pub mod segmenter;
pub mod source;

pub use cpal_source::CpalSource;
pub use mixer::{GainControl, MixedSource};
pub use segmenter::{encode_wav, negotiate_mime, Segment, Segmenter, SegmenterConfig, MIME_CANDIDATES};
pub use source::{
    create_source, AudioFrame, AudioStreamSource, CaptureKind, CaptureSource, DeviceSelector,
};
