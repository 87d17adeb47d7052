// Gain-controlled mixing of microphone and shared-screen audio
//
// Two input graphs feed one output stream. Frames are buffered per source,
// aligned by arrival, and summed with clipping; a gain stage sits after the
// sum so pausing (gain -> 0) mutes the mix without stopping either device,
// and the downstream chunk sequence never fragments.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::source::{AudioFrame, AudioStreamSource, CaptureSource};
use crate::error::CaptureError;

/// Shared handle to the mix gain. Stored as f32 bits for lock-free reads
/// from the mixing task.
#[derive(Debug, Clone)]
pub struct GainControl(Arc<AtomicU32>);

impl GainControl {
    pub fn new(gain: f32) -> Self {
        Self(Arc::new(AtomicU32::new(gain.to_bits())))
    }

    pub fn set(&self, gain: f32) {
        self.0.store(gain.to_bits(), Ordering::SeqCst);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::SeqCst))
    }
}

/// Sum two interleaved i16 buffers with clipping, padding the shorter one
/// with silence, then apply the gain.
pub fn mix_samples(a: &[i16], b: &[i16], gain: f32) -> Vec<i16> {
    let len = a.len().max(b.len());
    let mut out = Vec::with_capacity(len);

    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0) as i32;
        let right = b.get(i).copied().unwrap_or(0) as i32;
        let sum = (left + right).clamp(i16::MIN as i32, i16::MAX as i32);
        out.push((sum as f32 * gain) as i16);
    }

    out
}

/// Apply the gain to a single passthrough frame.
fn scale_samples(samples: &[i16], gain: f32) -> Vec<i16> {
    samples.iter().map(|&s| (s as f32 * gain) as i16).collect()
}

/// Capture source composing a microphone and a system-audio source into one
/// mixed output stream.
pub struct MixedSource {
    microphone: Box<dyn CaptureSource>,
    system: Box<dyn CaptureSource>,
    gain: GainControl,
    is_capturing: Arc<AtomicBool>,
    mix_task: Option<JoinHandle<()>>,
}

impl MixedSource {
    pub fn new(microphone: Box<dyn CaptureSource>, system: Box<dyn CaptureSource>) -> Self {
        Self {
            microphone,
            system,
            gain: GainControl::new(1.0),
            is_capturing: Arc::new(AtomicBool::new(false)),
            mix_task: None,
        }
    }

    /// Handle to the gain stage, usable while the mix is running.
    pub fn gain(&self) -> GainControl {
        self.gain.clone()
    }
}

#[async_trait::async_trait]
impl CaptureSource for MixedSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        let mic_rx = self.microphone.start().await?;

        // If the system-audio side cannot start, every already-acquired
        // track must be released before surfacing the error.
        let system_rx = match self.system.start().await {
            Ok(rx) => rx,
            Err(e) => {
                if let Err(stop_err) = self.microphone.stop().await {
                    warn!("failed to release microphone after mix setup error: {}", stop_err);
                }
                return Err(e);
            }
        };

        self.is_capturing.store(true, Ordering::SeqCst);

        let (out_tx, out_rx) = mpsc::channel::<AudioFrame>(100);
        let gain = self.gain.clone();

        let task = tokio::spawn(async move {
            info!("audio mix task started");
            run_mix_loop(mic_rx, system_rx, out_tx, gain).await;
            info!("audio mix task stopped");
        });

        self.mix_task = Some(task);
        Ok(out_rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.is_capturing.store(false, Ordering::SeqCst);

        // Release both devices unconditionally; report the first failure
        // only after both teardown attempts ran.
        let mic_result = self.microphone.stop().await;
        let system_result = self.system.stop().await;

        if let Some(task) = self.mix_task.take() {
            if let Err(e) = task.await {
                warn!("mix task panicked: {}", e);
            }
        }

        mic_result?;
        system_result?;
        Ok(())
    }

    fn set_paused(&self, paused: bool) {
        self.gain.set(if paused { 0.0 } else { 1.0 });
    }

    fn is_capturing(&self) -> bool {
        // A dead leg means the composite is no longer delivering the mix
        // it promised, even while the other device keeps running.
        self.is_capturing.load(Ordering::SeqCst)
            && self.microphone.is_capturing()
            && self.system.is_capturing()
    }

    fn name(&self) -> &str {
        "mixed-screen-audio"
    }
}

/// How long a lone frame may wait for a partner from the other source
/// before being passed through unmixed.
const MAX_BUFFER_FRAMES: usize = 4;

async fn run_mix_loop(
    mut mic_rx: mpsc::Receiver<AudioFrame>,
    mut system_rx: mpsc::Receiver<AudioFrame>,
    out_tx: mpsc::Sender<AudioFrame>,
    gain: GainControl,
) {
    let mut mic_buf: VecDeque<AudioFrame> = VecDeque::new();
    let mut system_buf: VecDeque<AudioFrame> = VecDeque::new();
    let mut mic_open = true;
    let mut system_open = true;

    while mic_open || system_open {
        tokio::select! {
            frame = mic_rx.recv(), if mic_open => match frame {
                Some(f) => mic_buf.push_back(f),
                None => mic_open = false,
            },
            frame = system_rx.recv(), if system_open => match frame {
                Some(f) => system_buf.push_back(f),
                None => system_open = false,
            },
        }

        while let Some(frame) = next_mixed(&mut mic_buf, &mut system_buf, &gain) {
            if out_tx.send(frame).await.is_err() {
                return; // consumer gone
            }
        }
    }

    // Flush whatever is still buffered on either side.
    for frame in mic_buf.drain(..).chain(system_buf.drain(..)) {
        let scaled = AudioFrame {
            samples: scale_samples(&frame.samples, gain.get()),
            ..frame
        };
        if out_tx.send(scaled).await.is_err() {
            return;
        }
    }
}

/// Produce the next output frame, if any is due.
///
/// When both sources have a frame queued they are summed pairwise; when one
/// side falls behind by more than `MAX_BUFFER_FRAMES` the head of the longer
/// queue passes through alone so buffering stays bounded.
fn next_mixed(
    mic_buf: &mut VecDeque<AudioFrame>,
    system_buf: &mut VecDeque<AudioFrame>,
    gain: &GainControl,
) -> Option<AudioFrame> {
    let g = gain.get();

    if !mic_buf.is_empty() && !system_buf.is_empty() {
        let compatible = mic_buf[0].sample_rate == system_buf[0].sample_rate
            && mic_buf[0].channels == system_buf[0].channels;

        // Mismatched legs cannot be summed; the microphone frame passes
        // through now and the system frame stays queued for its own
        // passthrough, so neither side loses audio.
        if !compatible {
            let mic = mic_buf.pop_front()?;
            warn!(
                "format mismatch between mix inputs ({}Hz/{}ch vs {}Hz/{}ch), passing frames through unmixed",
                mic.sample_rate, mic.channels, system_buf[0].sample_rate, system_buf[0].channels
            );
            return Some(AudioFrame {
                samples: scale_samples(&mic.samples, g),
                ..mic
            });
        }

        let mic = mic_buf.pop_front()?;
        let system = system_buf.pop_front()?;
        let samples = mix_samples(&mic.samples, &system.samples, g);
        return Some(AudioFrame {
            samples,
            source: AudioStreamSource::Microphone,
            ..mic
        });
    }

    if mic_buf.len() > MAX_BUFFER_FRAMES {
        let frame = mic_buf.pop_front()?;
        return Some(AudioFrame {
            samples: scale_samples(&frame.samples, g),
            ..frame
        });
    }

    if system_buf.len() > MAX_BUFFER_FRAMES {
        let frame = system_buf.pop_front()?;
        return Some(AudioFrame {
            samples: scale_samples(&frame.samples, g),
            ..frame
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_sums_with_clipping() {
        let mixed = mix_samples(&[100, i16::MAX], &[50, 10], 1.0);
        assert_eq!(mixed, vec![150, i16::MAX]);
    }

    #[test]
    fn mix_pads_shorter_input_with_silence() {
        let mixed = mix_samples(&[10, 20, 30], &[1], 1.0);
        assert_eq!(mixed, vec![11, 20, 30]);
    }

    #[test]
    fn zero_gain_mutes_the_mix() {
        let mixed = mix_samples(&[100, -200], &[50, 50], 0.0);
        assert_eq!(mixed, vec![0, 0]);
    }

    #[test]
    fn gain_control_round_trips() {
        let gain = GainControl::new(1.0);
        assert_eq!(gain.get(), 1.0);
        gain.set(0.0);
        assert_eq!(gain.get(), 0.0);
    }

    fn frame(sample_rate: u32, channels: u16, samples: Vec<i16>) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms: 0,
            source: AudioStreamSource::Microphone,
        }
    }

    #[test]
    fn format_mismatch_keeps_the_system_frame_queued() {
        let mut mic_buf = VecDeque::from([frame(16000, 1, vec![5; 4])]);
        let mut system_buf = VecDeque::from([frame(48000, 2, vec![9; 4])]);
        let gain = GainControl::new(1.0);

        let out = next_mixed(&mut mic_buf, &mut system_buf, &gain).unwrap();
        assert_eq!(out.samples, vec![5; 4]);

        // The unmatched system frame is retained for its own passthrough,
        // not dropped.
        assert!(mic_buf.is_empty());
        assert_eq!(system_buf.len(), 1);
        assert_eq!(system_buf[0].samples, vec![9; 4]);
    }

    #[test]
    fn matching_heads_are_summed_pairwise() {
        let mut mic_buf = VecDeque::from([frame(16000, 1, vec![100; 4])]);
        let mut system_buf = VecDeque::from([frame(16000, 1, vec![10; 4])]);
        let gain = GainControl::new(1.0);

        let out = next_mixed(&mut mic_buf, &mut system_buf, &gain).unwrap();
        assert_eq!(out.samples, vec![110; 4]);
        assert!(mic_buf.is_empty());
        assert!(system_buf.is_empty());
    }
}
