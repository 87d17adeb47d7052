use tokio::sync::mpsc;

use crate::error::CaptureError;

/// Which input graph a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioStreamSource {
    /// Microphone input
    Microphone,
    /// Shared-screen system audio (loopback/monitor device)
    SystemAudio,
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Which input graph produced this frame
    pub source: AudioStreamSource,
}

/// What kind of capture pipeline to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// One microphone device
    Microphone,
    /// Microphone mixed with shared-screen audio through a gain stage
    ScreenMixed,
}

/// Device selection for a capture session. `None` means the platform
/// default input device.
#[derive(Debug, Clone, Default)]
pub struct DeviceSelector {
    /// Microphone device name
    pub microphone: Option<String>,
    /// Loopback/monitor device carrying shared-screen audio
    /// (required for `CaptureKind::ScreenMixed`)
    pub system_audio: Option<String>,
}

/// A running or startable capture device graph.
///
/// `start` hands back a channel of timed frames; `stop` finalizes the stream
/// and releases the underlying device unconditionally. Pausing mutes the
/// output without stopping capture, so the frame sequence never fragments.
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Start capturing; frames arrive on the returned channel
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError>;

    /// Stop capturing and release the device
    async fn stop(&mut self) -> Result<(), CaptureError>;

    /// Mute (gain -> 0) or unmute the output without stopping capture
    fn set_paused(&self, paused: bool);

    /// Whether the source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Source name for logging
    fn name(&self) -> &str;
}

/// Build a capture source for the requested kind.
///
/// Both kinds share one pipeline; `ScreenMixed` wraps two device sources in
/// a gain-controlled mixing stage instead of duplicating the call tree.
pub fn create_source(
    kind: CaptureKind,
    selector: &DeviceSelector,
) -> Result<Box<dyn CaptureSource>, CaptureError> {
    use super::cpal_source::CpalSource;
    use super::mixer::MixedSource;

    match kind {
        CaptureKind::Microphone => {
            let mic = CpalSource::new(
                selector.microphone.clone(),
                AudioStreamSource::Microphone,
            );
            Ok(Box::new(mic))
        }

        CaptureKind::ScreenMixed => {
            // A screen share without a system-audio device has no audio
            // track to mix; refuse before acquiring anything.
            let system_device = selector
                .system_audio
                .clone()
                .ok_or(CaptureError::NoAudioTrack)?;

            let mic = CpalSource::new(
                selector.microphone.clone(),
                AudioStreamSource::Microphone,
            );
            let system = CpalSource::new(Some(system_device), AudioStreamSource::SystemAudio);

            Ok(Box::new(MixedSource::new(Box::new(mic), Box::new(system))))
        }
    }
}
