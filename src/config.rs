// ⚙️ Pipeline Configuration - JSON file + CLI overrides

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_INPUT: &str = "raw_data/pp-complete.csv";
pub const DEFAULT_OUTPUT_DIR: &str = "public/data/prices";
pub const DEFAULT_BATCH_SIZE: usize = 500_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Headerless Price Paid CSV
    pub input: PathBuf,

    /// Directory receiving <year>.json artifacts
    pub output_dir: PathBuf,

    /// Rows per batch handed to a worker
    pub batch_size: usize,

    /// Batches buffered between the reader and the workers
    pub queue_capacity: usize,

    /// Extraction workers
    pub workers: usize,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input: PathBuf::from(DEFAULT_INPUT),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: default_workers(),
        }
    }
}

impl PipelineConfig {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output_dir: Q) -> Self {
        PipelineConfig {
            input: input.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            PipelineError::Config(format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: PipelineConfig = serde_json::from_str(&content).map_err(|e| {
            PipelineError::Config(format!(
                "failed to parse config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(PipelineError::Config("workers must be at least 1".to_string()));
        }
        Ok(())
    }
}
