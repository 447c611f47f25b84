use std::env;
use std::path::PathBuf;

/// Runtime configuration for the compression pipeline
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Directory holding transient uploaded/compressed artifacts
    pub staging_dir: PathBuf,

    /// Maximum size of a single uploaded file in bytes (default: 50 MB)
    pub max_file_size: usize,

    /// Admission ceiling for images per batch request (default: 20)
    pub max_batch_images: usize,

    /// Admission ceiling for documents per batch request (default: 10)
    pub max_batch_documents: usize,

    /// Ghostscript binary used for document rewrites (default: "gs")
    pub ghostscript_bin: String,

    /// Hard wall-clock limit for one document rewrite (default: 60 s)
    pub document_timeout_secs: u64,

    /// Cap on concurrently running document rewrites (default: 4)
    pub max_concurrent_documents: usize,

    /// Interval between orphan sweeps (default: 3600 s)
    pub sweep_interval_secs: u64,

    /// Staged files older than this are reaped by the sweep (default: 3600 s)
    pub retention_secs: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            staging_dir: env::temp_dir().join("compress-staging"),
            max_file_size: 50 * 1024 * 1024, // 50 MB
            max_batch_images: 20,
            max_batch_documents: 10,
            ghostscript_bin: "gs".to_string(),
            document_timeout_secs: 60,
            max_concurrent_documents: 4,
            sweep_interval_secs: 3600,
            retention_secs: 3600,
        }
    }
}

impl CompressionConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            max_batch_images: env::var("MAX_BATCH_IMAGES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_batch_images),

            max_batch_documents: env::var("MAX_BATCH_DOCUMENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_batch_documents),

            ghostscript_bin: env::var("GHOSTSCRIPT_BIN").unwrap_or(default.ghostscript_bin),

            document_timeout_secs: env::var("DOCUMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.document_timeout_secs),

            max_concurrent_documents: env::var("MAX_CONCURRENT_DOCUMENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_concurrent_documents),

            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.sweep_interval_secs),

            retention_secs: env::var("RETENTION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.retention_secs),
        }
    }

    /// Create config for development and tests (short timeouts, temp staging)
    pub fn development() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            document_timeout_secs: 10,
            ..Self::default()
        }
    }

    /// Same config pointed at a caller-owned staging directory. Used by tests
    /// so each one gets an isolated, disposable staging area.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }
}
