use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use capture_uplink::{
    create_source, CaptureKind, CaptureSession, Config, DeviceSelector, DurableChunkStore,
    HttpRemoteStore, RecoveryManager, SegmenterConfig, SessionOutcome, UploadConfig,
    UploadCoordinator,
};

#[derive(Parser)]
#[command(name = "capture-uplink", about = "Capture audio, stage it durably, ship it for transcription")]
struct Cli {
    /// Path to the config file (without extension)
    #[arg(long, default_value = "config/capture-uplink")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record until Ctrl-C (or for a fixed duration), then upload
    Record {
        /// Stop automatically after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Mix shared-screen audio into the microphone capture
        #[arg(long)]
        screen: bool,

        /// Microphone device name (platform default if omitted)
        #[arg(long)]
        mic_device: Option<String>,

        /// Loopback/monitor device carrying the shared-screen audio
        #[arg(long)]
        system_device: Option<String>,
    },

    /// List sessions that staged locally but never committed
    Sessions,

    /// Re-drive the upload for a staged session
    Retry { session_id: String },

    /// Delete a staged session without uploading it
    Discard { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    let store = Arc::new(DurableChunkStore::open(&cfg.storage.path)?);
    let remote = Arc::new(HttpRemoteStore::new(cfg.upload.base_url.clone()));
    let coordinator = Arc::new(
        UploadCoordinator::new(remote)
            .with_config(UploadConfig {
                block_size: cfg.upload.block_size_bytes,
                ..UploadConfig::default()
            })
            .with_progress(Arc::new(|percent| info!("upload progress: {}%", percent))),
    );

    match cli.command {
        Command::Record {
            duration_secs,
            screen,
            mic_device,
            system_device,
        } => {
            let kind = if screen {
                CaptureKind::ScreenMixed
            } else {
                CaptureKind::Microphone
            };
            let selector = DeviceSelector {
                microphone: mic_device,
                system_audio: system_device,
            };

            let source = create_source(kind, &selector)?;
            let mut session = CaptureSession::new(
                store,
                coordinator,
                source,
                SegmenterConfig {
                    interval_ms: cfg.capture.segment_interval_ms,
                },
            )?;

            session.start().await?;

            match duration_secs {
                Some(secs) => {
                    tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
                }
                None => {
                    info!("recording; press Ctrl-C to stop and upload");
                    tokio::signal::ctrl_c().await?;
                }
            }

            report_outcome(session.stop().await?);
        }

        Command::Sessions => {
            let recovery = RecoveryManager::new(store, coordinator);
            let sessions = recovery.list_recoverable()?;

            if sessions.is_empty() {
                println!("no recoverable sessions");
            }
            for s in sessions {
                println!(
                    "{}  {}  {} chunks  {} bytes  [{}]",
                    s.session_id, s.created_at, s.chunk_count, s.total_bytes, s.status
                );
            }
        }

        Command::Retry { session_id } => {
            let recovery = RecoveryManager::new(store, coordinator);
            report_outcome(recovery.retry(&session_id).await?);
        }

        Command::Discard { session_id } => {
            let recovery = RecoveryManager::new(store, coordinator);
            recovery.discard(&session_id)?;
            println!("session {} discarded", session_id);
        }
    }

    Ok(())
}

fn report_outcome(outcome: SessionOutcome) {
    match outcome {
        SessionOutcome::Committed {
            session_id,
            remote_key,
        } => println!("session {} delivered (remote key {})", session_id, remote_key),
        SessionOutcome::Failed { session_id } => println!(
            "session {} staged locally but NOT delivered; run `retry {}` later",
            session_id, session_id
        ),
        SessionOutcome::Aborted { session_id } => println!(
            "capture aborted; partial session {} staged locally, run `retry {}` to upload it",
            session_id, session_id
        ),
        SessionOutcome::Empty => println!("nothing captured"),
    }
}
