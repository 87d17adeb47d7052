use std::io::Cursor;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::source::AudioFrame;
use crate::error::CaptureError;

/// Content types offered at capture start, in preference order. The first
/// one the encoder supports wins.
pub const MIME_CANDIDATES: &[&str] = &[
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/mp4",
    "audio/wav",
];

/// Whether the built-in encoder can produce the given content type.
pub fn encoder_supports(mime_type: &str) -> bool {
    matches!(mime_type, "audio/wav" | "audio/x-wav" | "audio/wave")
}

/// Pick the first supported candidate.
pub fn negotiate_mime(candidates: &[&str]) -> Result<String, CaptureError> {
    candidates
        .iter()
        .find(|m| encoder_supports(m))
        .map(|m| m.to_string())
        .ok_or_else(|| {
            CaptureError::UnsupportedMimeType(candidates.iter().map(|m| m.to_string()).collect())
        })
}

/// One encoded segment of a capture session, ready for the chunk store.
#[derive(Debug, Clone)]
pub struct Segment {
    /// 0-based position in the session's chunk sequence
    pub sequence_index: u64,
    /// Encoded bytes (opaque to everything downstream)
    pub payload: Vec<u8>,
    /// Start of the segment in milliseconds since capture started
    pub start_ms: u64,
    /// Timestamp of the last frame folded into the segment
    pub end_ms: u64,
}

/// Configuration for the segmenter
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Wall-clock length of one segment in milliseconds (default: 1000)
    pub interval_ms: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// Folds the capture frame stream into fixed-interval encoded segments.
///
/// Rotation is driven by frame timestamps, not a timer, so a paused (muted)
/// stream still produces a continuous segment sequence. The final partial
/// segment is flushed when the frame channel closes.
pub struct Segmenter {
    config: SegmenterConfig,
    pending: Vec<AudioFrame>,
    segment_start_ms: u64,
    next_index: u64,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
            segment_start_ms: 0,
            next_index: 0,
        }
    }

    /// Consume frames until the channel closes, emitting each finished
    /// segment on `segment_tx`. Returns the number of segments produced.
    pub async fn run(
        mut self,
        mut audio_rx: mpsc::Receiver<AudioFrame>,
        segment_tx: mpsc::Sender<Segment>,
    ) -> Result<u64, CaptureError> {
        info!(
            "segmenter started ({}ms per segment)",
            self.config.interval_ms
        );

        while let Some(frame) = audio_rx.recv().await {
            if self.pending.is_empty() {
                self.segment_start_ms = frame.timestamp_ms;
            }

            let rotate = frame.timestamp_ms.saturating_sub(self.segment_start_ms)
                >= self.config.interval_ms;

            if rotate && !self.pending.is_empty() {
                let segment = self.cut_segment()?;
                debug!(
                    "segment {} ready ({} bytes, {}..{}ms)",
                    segment.sequence_index,
                    segment.payload.len(),
                    segment.start_ms,
                    segment.end_ms
                );
                if segment_tx.send(segment).await.is_err() {
                    return Err(CaptureError::Stream(
                        "segment consumer dropped mid-capture".to_string(),
                    ));
                }
                self.segment_start_ms = frame.timestamp_ms;
            }

            self.pending.push(frame);
        }

        // One last flush for the partial segment, then let the channel
        // close to signal the stop.
        if !self.pending.is_empty() {
            let segment = self.cut_segment()?;
            debug!(
                "final segment {} ready ({} bytes)",
                segment.sequence_index,
                segment.payload.len()
            );
            if segment_tx.send(segment).await.is_err() {
                return Err(CaptureError::Stream(
                    "segment consumer dropped during final flush".to_string(),
                ));
            }
        }

        info!("segmenter finished: {} segments", self.next_index);
        Ok(self.next_index)
    }

    fn cut_segment(&mut self) -> Result<Segment, CaptureError> {
        let frames = std::mem::take(&mut self.pending);
        let end_ms = frames.last().map(|f| f.timestamp_ms).unwrap_or(0);
        let payload = encode_wav(&frames)?;

        let segment = Segment {
            sequence_index: self.next_index,
            payload,
            start_ms: self.segment_start_ms,
            end_ms,
        };
        self.next_index += 1;
        Ok(segment)
    }
}

/// Encode a run of frames as a standalone in-memory WAV segment.
pub fn encode_wav(frames: &[AudioFrame]) -> Result<Vec<u8>, CaptureError> {
    let first = frames
        .first()
        .ok_or_else(|| CaptureError::Stream("cannot encode an empty segment".to_string()))?;

    let spec = hound::WavSpec {
        channels: first.channels,
        sample_rate: first.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| CaptureError::Stream(format!("wav writer: {}", e)))?;

        for frame in frames {
            for &sample in &frame.samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| CaptureError::Stream(format!("wav sample: {}", e)))?;
            }
        }

        writer
            .finalize()
            .map_err(|e| CaptureError::Stream(format!("wav finalize: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::AudioStreamSource;

    fn frame(timestamp_ms: u64, samples: Vec<i16>) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 16000,
            channels: 1,
            timestamp_ms,
            source: AudioStreamSource::Microphone,
        }
    }

    #[test]
    fn negotiation_picks_first_supported_candidate() {
        let mime = negotiate_mime(MIME_CANDIDATES).unwrap();
        assert_eq!(mime, "audio/wav");
    }

    #[test]
    fn negotiation_fails_when_nothing_is_supported() {
        let err = negotiate_mime(&["audio/webm", "audio/mp4"]).unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedMimeType(_)));
    }

    #[test]
    fn encode_wav_produces_riff_header() {
        let bytes = encode_wav(&[frame(0, vec![0i16; 160])]).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }

    #[tokio::test]
    async fn segments_rotate_on_interval_and_flush_on_close() {
        let (audio_tx, audio_rx) = mpsc::channel(16);
        let (segment_tx, mut segment_rx) = mpsc::channel(16);

        let segmenter = Segmenter::new(SegmenterConfig { interval_ms: 1000 });
        let handle = tokio::spawn(segmenter.run(audio_rx, segment_tx));

        // 2.5 seconds of frames at 100ms spacing -> 2 full + 1 partial
        for i in 0..25u64 {
            audio_tx.send(frame(i * 100, vec![1i16; 160])).await.unwrap();
        }
        drop(audio_tx);

        let count = handle.await.unwrap().unwrap();
        assert_eq!(count, 3);

        let mut segments = Vec::new();
        while let Some(s) = segment_rx.recv().await {
            segments.push(s);
        }
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].sequence_index, 0);
        assert_eq!(segments[1].sequence_index, 1);
        assert_eq!(segments[2].sequence_index, 2);
        assert_eq!(segments[0].start_ms, 0);
        assert!(segments[2].end_ms >= 2400);
    }
}
