//! Configuration types for transfers, runtime and output settings

use std::time::Duration;

/// Ceiling for a single file transfer and default budget of a whole push.
pub const IO_TIMEOUT: Duration = Duration::from_secs(4 * 60);
/// A single file is never given less time than this, however little budget is left.
pub const MIN_ITEM_TIMEOUT: Duration = Duration::from_secs(60);
/// Device storage is NAND-backed and does not benefit from deeper parallelism.
pub const MAX_IO_WIDTH: usize = 8;

/// Settings shared by the pull and push engines
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Maximum number of concurrently outstanding file transfers
    pub max_width: usize,
    /// Ceiling for a single pulled file
    pub io_timeout: Duration,
    /// Lower bound of the per-file ceiling when pushing against a shared budget
    pub min_item_timeout: Duration,
    /// Parent directory for pull scratch directories (None = system temp dir)
    pub scratch_dir: Option<std::path::PathBuf>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_width: MAX_IO_WIDTH,
            io_timeout: IO_TIMEOUT,
            min_item_timeout: MIN_ITEM_TIMEOUT,
            scratch_dir: None,
        }
    }
}

impl TransferSettings {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.max_width == 0 {
            return Err("max_width must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Options of a single file push
#[derive(Debug, Clone, Copy)]
pub struct PushFileOptions {
    pub timeout: Duration,
}

impl Default for PushFileOptions {
    fn default() -> Self {
        Self {
            timeout: IO_TIMEOUT,
        }
    }
}

/// Options of a folder push
#[derive(Debug, Clone, Copy)]
pub struct PushFolderOptions {
    /// Budget shared by every file of the folder
    pub timeout: Duration,
    /// Push through the bounded window instead of one file at a time
    pub enable_parallel_push: bool,
}

impl Default for PushFolderOptions {
    fn default() -> Self {
        Self {
            timeout: IO_TIMEOUT,
            enable_parallel_push: false,
        }
    }
}

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}
