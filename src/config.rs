use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    pub upload: UploadApiConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the durable chunk store
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Wall-clock length of one capture segment in milliseconds
    pub segment_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadApiConfig {
    /// Base URL of the transcription service upload API
    pub base_url: String,
    /// Size of one upload block in bytes
    pub block_size_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            segment_interval_ms: 1000,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .set_default("service.name", "capture-uplink")?
            .set_default("capture.segment_interval_ms", 1000i64)?
            .set_default("upload.block_size_bytes", (1024 * 1024) as i64)?
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
