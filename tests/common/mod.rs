// Deterministic test doubles shared by the integration tests: a scripted
// capture source instead of a live device, and an in-memory remote instead
// of the network.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use capture_uplink::error::{CaptureError, UploadError};
use capture_uplink::{AudioFrame, AudioStreamSource, CaptureSource, RemoteStore, UploadTicket};
use tokio::sync::mpsc;

/// Capture source that replays a fixed list of frames.
///
/// The frame channel stays open until `stop` is called, mirroring a real
/// device: the consumer sees the channel close only when capture ends.
pub struct ScriptedSource {
    frames: Vec<AudioFrame>,
    tx: Mutex<Option<mpsc::Sender<AudioFrame>>>,
    capturing: AtomicBool,
    paused: AtomicBool,
    /// When set, the source reports itself dead before stop is requested
    death: Arc<AtomicBool>,
    /// Set once `stop` has released the (pretend) device
    released: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<AudioFrame>) -> Self {
        Self {
            frames,
            tx: Mutex::new(None),
            capturing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            death: Arc::new(AtomicBool::new(false)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `count` frames of 100ms-spaced mono audio.
    pub fn with_tone(count: u64) -> Self {
        let frames = (0..count)
            .map(|i| AudioFrame {
                samples: vec![(i % 100) as i16; 1600],
                sample_rate: 16000,
                channels: 1,
                timestamp_ms: i * 100,
                source: AudioStreamSource::Microphone,
            })
            .collect();
        Self::new(frames)
    }

    /// Flag that makes the source report itself dead, as if the device
    /// stream errored out mid-capture.
    pub fn death_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.death)
    }

    /// Observes whether `stop` ran, i.e. the device was released.
    pub fn release_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

#[async_trait::async_trait]
impl CaptureSource for ScriptedSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        let (tx, rx) = mpsc::channel(4096);

        for frame in &self.frames {
            tx.send(frame.clone())
                .await
                .map_err(|_| CaptureError::Stream("script channel closed".to_string()))?;
        }

        *self.tx.lock().unwrap() = Some(tx);
        self.capturing.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.capturing.store(false, Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);
        self.tx.lock().unwrap().take();
        Ok(())
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        !self.death.load(Ordering::SeqCst) && self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Capture source whose device cannot be acquired at all.
pub struct UnavailableSource;

#[async_trait::async_trait]
impl CaptureSource for UnavailableSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        Err(CaptureError::DeviceUnavailable(
            "scripted acquisition failure".to_string(),
        ))
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn set_paused(&self, _paused: bool) {}

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

#[derive(Debug, Clone)]
pub struct PutCall {
    pub destination: String,
    pub block_id: String,
    pub payload: Vec<u8>,
}

/// In-memory remote store with scriptable failures and full call recording.
#[derive(Default)]
pub struct FakeRemote {
    /// Fail this many ticket requests before succeeding
    pub fail_tickets: AtomicU32,
    /// Fail this many block PUTs (network error) before succeeding
    pub fail_blocks: AtomicU32,
    /// Fail this many commits (remote rejection) before succeeding
    pub fail_commits: AtomicU32,
    /// Every block PUT fails when set
    pub always_fail_blocks: AtomicBool,

    pub tickets_issued: AtomicU32,
    /// Every put_block call, including ones that failed
    pub put_attempts: AtomicU32,
    pub puts: Mutex<Vec<PutCall>>,
    pub commits: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_commits(n: u32) -> Self {
        let remote = Self::default();
        remote.fail_commits.store(n, Ordering::SeqCst);
        remote
    }

    pub fn failing_blocks(n: u32) -> Self {
        let remote = Self::default();
        remote.fail_blocks.store(n, Ordering::SeqCst);
        remote
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.lock().unwrap().len()
    }

    /// The reassembled object: payloads of the last committed blocklist in
    /// list order.
    pub fn committed_bytes(&self) -> Option<Vec<u8>> {
        let commits = self.commits.lock().unwrap();
        let (destination, block_ids) = commits.last()?;
        let puts = self.puts.lock().unwrap();

        let mut bytes = Vec::new();
        for id in block_ids {
            let block = puts
                .iter()
                .rev()
                .find(|p| &p.destination == destination && &p.block_id == id)?;
            bytes.extend_from_slice(&block.payload);
        }
        Some(bytes)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl RemoteStore for FakeRemote {
    async fn issue_ticket(&self, file_extension: &str) -> Result<UploadTicket, UploadError> {
        if Self::take_failure(&self.fail_tickets) {
            return Err(UploadError::TicketUnavailable("simulated outage".to_string()));
        }

        let n = self.tickets_issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(UploadTicket {
            destination: format!("mem://uploads/{}.{}", n, file_extension),
            remote_key: format!("remote-key-{}", n),
        })
    }

    async fn put_block(
        &self,
        ticket: &UploadTicket,
        block_id: &str,
        payload: Vec<u8>,
    ) -> Result<(), UploadError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);

        if self.always_fail_blocks.load(Ordering::SeqCst)
            || Self::take_failure(&self.fail_blocks)
        {
            return Err(UploadError::Network("simulated blip".to_string()));
        }

        self.puts.lock().unwrap().push(PutCall {
            destination: ticket.destination.clone(),
            block_id: block_id.to_string(),
            payload,
        });
        Ok(())
    }

    async fn commit(&self, ticket: &UploadTicket, block_ids: &[String]) -> Result<(), UploadError> {
        if Self::take_failure(&self.fail_commits) {
            return Err(UploadError::RemoteRejected {
                operation: "commit".to_string(),
                status: 500,
            });
        }

        self.commits
            .lock()
            .unwrap()
            .push((ticket.destination.clone(), block_ids.to_vec()));
        Ok(())
    }
}

/// Fast retry schedules so tests do not sit in real backoff sleeps.
pub fn fast_upload_config(block_size: usize) -> capture_uplink::UploadConfig {
    use capture_uplink::RetryPolicy;
    use std::time::Duration;

    capture_uplink::UploadConfig {
        block_size,
        ticket_retry: RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        },
        upload_retry: RetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(10),
        },
    }
}
