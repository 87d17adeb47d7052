use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::source::{AudioFrame, AudioStreamSource, CaptureSource};
use crate::error::CaptureError;

/// Capture source backed by one cpal input device.
///
/// The `cpal::Stream` is not `Send`, so the stream lives on a dedicated
/// thread; the thread exits (and releases the device) when the stop flag
/// drops or the stream errors out.
pub struct CpalSource {
    device_name: Option<String>,
    role: AudioStreamSource,
    label: String,
    is_capturing: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalSource {
    pub fn new(device_name: Option<String>, role: AudioStreamSource) -> Self {
        let label = match role {
            AudioStreamSource::Microphone => "cpal-microphone".to_string(),
            AudioStreamSource::SystemAudio => "cpal-system-audio".to_string(),
        };

        Self {
            device_name,
            role,
            label,
            is_capturing: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Resolve the input device: by name if given, otherwise the default.
    fn find_device(name: &Option<String>) -> Result<cpal::Device, CaptureError> {
        let host = cpal::default_host();

        match name {
            Some(wanted) => {
                let mut devices = host
                    .input_devices()
                    .map_err(|e| CaptureError::PermissionDenied(e.to_string()))?;

                devices
                    .find(|d| d.name().map(|n| &n == wanted).unwrap_or(false))
                    .ok_or_else(|| CaptureError::DeviceUnavailable(wanted.clone()))
            }
            None => host
                .default_input_device()
                .ok_or_else(|| CaptureError::DeviceUnavailable("default input".to_string())),
        }
    }

    fn pick_config(device: &cpal::Device) -> Result<(StreamConfig, SampleFormat), CaptureError> {
        let default = device
            .default_input_config()
            .map_err(|e| CaptureError::PermissionDenied(e.to_string()))?;

        let format = default.sample_format();
        Ok((default.into(), format))
    }
}

#[async_trait::async_trait]
impl CaptureSource for CpalSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.is_capturing.load(Ordering::SeqCst) {
            return Err(CaptureError::Stream("already capturing".to_string()));
        }

        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(100);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();

        let device_name = self.device_name.clone();
        let role = self.role;
        let label = self.label.clone();
        let is_capturing = Arc::clone(&self.is_capturing);
        let paused = Arc::clone(&self.paused);

        self.is_capturing.store(true, Ordering::SeqCst);

        let thread = std::thread::spawn(move || {
            let setup = (|| {
                let device = CpalSource::find_device(&device_name)?;
                let (config, format) = CpalSource::pick_config(&device)?;
                Ok::<_, CaptureError>((device, config, format))
            })();

            let (device, config, format) = match setup {
                Ok(parts) => parts,
                Err(e) => {
                    is_capturing.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let sample_rate = config.sample_rate.0;
            let channels = config.channels;
            let started = Instant::now();

            let capturing = Arc::clone(&is_capturing);
            let muted = Arc::clone(&paused);
            let tx = frame_tx.clone();
            let stream_label = label.clone();

            let emit = move |mut samples: Vec<i16>| {
                if !capturing.load(Ordering::SeqCst) {
                    return;
                }
                if muted.load(Ordering::SeqCst) {
                    samples.iter_mut().for_each(|s| *s = 0);
                }
                let frame = AudioFrame {
                    samples,
                    sample_rate,
                    channels,
                    timestamp_ms: started.elapsed().as_millis() as u64,
                    source: role,
                };
                // Never block the audio callback; a full channel means the
                // consumer is stalled and the frame is dropped.
                if tx.try_send(frame).is_err() {
                    warn!("{}: frame channel full, dropping frame", stream_label);
                }
            };

            let err_capturing = Arc::clone(&is_capturing);
            let err_label = label.clone();
            let on_error = move |e: cpal::StreamError| {
                error!("{}: stream error: {}", err_label, e);
                err_capturing.store(false, Ordering::SeqCst);
            };

            let stream = match format {
                SampleFormat::I16 => {
                    let emit = emit.clone();
                    device.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| emit(data.to_vec()),
                        on_error.clone(),
                        None,
                    )
                }
                SampleFormat::F32 => {
                    let emit = emit.clone();
                    device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            let converted: Vec<i16> =
                                data.iter().map(|&s| (s * 32767.0) as i16).collect();
                            emit(converted)
                        },
                        on_error.clone(),
                        None,
                    )
                }
                other => {
                    is_capturing.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(CaptureError::DeviceUnavailable(format!(
                        "unsupported sample format {:?}",
                        other
                    ))));
                    return;
                }
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    is_capturing.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(CaptureError::DeviceUnavailable(e.to_string())));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                is_capturing.store(false, Ordering::SeqCst);
                let _ = ready_tx.send(Err(CaptureError::PermissionDenied(e.to_string())));
                return;
            }

            info!(
                "{}: capturing at {}Hz, {} channels",
                label, sample_rate, channels
            );
            let _ = ready_tx.send(Ok(()));

            // Hold the stream open until stopped or errored; dropping it
            // releases the device.
            while is_capturing.load(Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }

            drop(stream);
            info!("{}: device released", label);
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.thread = Some(thread);
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                self.is_capturing.store(false, Ordering::SeqCst);
                let _ = thread.join();
                Err(CaptureError::Stream(
                    "capture thread exited during startup".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.is_capturing.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread.take() {
            tokio::task::spawn_blocking(move || {
                if handle.join().is_err() {
                    error!("capture thread panicked during shutdown");
                }
            })
            .await
            .map_err(|e| CaptureError::Stream(e.to_string()))?;
        }

        Ok(())
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.is_capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.label
    }
}
