use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Where direct uploads are kept while they are being classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageMode {
    /// Write each upload to a uniquely named file under the image directory
    #[value(alias = "1")]
    Disk,
    /// Keep each upload in an in-memory buffer
    #[value(alias = "2")]
    Memory,
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// How uploaded images are held during classification
    #[arg(long, env = "FILE_PROCESSING_MODE", value_enum, default_value = "disk")]
    pub file_processing_mode: StorageMode,

    /// Directory for disk-backed uploads, created on demand
    #[arg(long, env = "IMAGE_DIR", default_value = "/opt/web/images")]
    pub image_dir: PathBuf,

    /// Model ID from Hugging Face Hub
    #[arg(long, env = "MODEL_ID")]
    pub model_id: Option<String>,

    /// Local path to model directory
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Model revision/branch on Hugging Face
    #[arg(long, env = "MODEL_REVISION", default_value = "main")]
    pub model_revision: String,

    /// Run on CPU instead of GPU
    #[arg(long, env = "CPU_ONLY")]
    pub cpu_only: bool,

    /// Maximum number of images scored in one forward pass
    #[arg(long, env = "BATCH_SIZE", default_value = "8")]
    pub batch_size: usize,

    /// Tick duration in milliseconds for flushing partial inference batches
    #[arg(long, env = "TICK_DURATION_MS", default_value = "20")]
    pub tick_duration_ms: u64,

    /// Batch items fetched and scored ahead of emission (1 = sequential)
    #[arg(long, env = "BATCH_CONCURRENCY", default_value = "1")]
    pub batch_concurrency: usize,

    /// Timeout for remote image retrieval, unbounded when unset
    #[arg(long, env = "FETCH_TIMEOUT_SECS")]
    pub fetch_timeout_secs: Option<u64>,

    /// Timeout for a single inference call, unbounded when unset
    #[arg(long, env = "INFERENCE_TIMEOUT_SECS")]
    pub inference_timeout_secs: Option<u64>,

    /// Maximum size of a remote image body, unbounded when unset
    #[arg(long, env = "MAX_IMAGE_BYTES")]
    pub max_image_bytes: Option<usize>,

    /// Request body limit for uploads
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "33554432")]
    pub max_upload_bytes: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub tick_duration: Duration,
}

impl From<&Config> for BatchConfig {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            tick_duration: Duration::from_millis(config.tick_duration_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchConfig {
    pub timeout: Option<Duration>,
    pub max_bytes: Option<usize>,
}

impl From<&Config> for FetchConfig {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.fetch_timeout_secs.map(Duration::from_secs),
            max_bytes: config.max_image_bytes,
        }
    }
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_secs.map(Duration::from_secs)
    }
}
