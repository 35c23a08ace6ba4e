//! Scheduler configuration.
//!
//! Layered loading: defaults -> `<config dir>/sift/config.toml` -> explicit
//! file -> `SIFT_*` environment variables.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::SchedulerError;

const MAX_PARALLEL_WORKERS: usize = 1024;

/// Configuration for the indexing scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of workers draining the parallel lane. Zero is allowed:
    /// parallel jobs then stay queued.
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,

    /// Whether to run the single worker draining the serial lane.
    /// When disabled, serial submissions go to the parallel lane.
    #[serde(default)]
    pub serial_lane: bool,

    /// Time in seconds given to workers to finish their current job on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_parallel_workers() -> usize {
    10
}

fn default_shutdown_timeout() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel_workers: default_parallel_workers(),
            serial_lane: false,
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl SchedulerConfig {
    /// Set the number of parallel workers.
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers;
        self
    }

    /// Enable or disable the serial lane worker.
    pub fn with_serial_lane(mut self, enabled: bool) -> Self {
        self.serial_lane = enabled;
        self
    }

    /// Set the shutdown timeout in seconds.
    pub fn with_shutdown_timeout(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.parallel_workers > MAX_PARALLEL_WORKERS {
            return Err(SchedulerError::Config(format!(
                "parallel_workers must be <= {}, got {}",
                MAX_PARALLEL_WORKERS, self.parallel_workers
            )));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(SchedulerError::Config(
                "shutdown_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Default config file location (`~/.config/sift/config.toml` on Linux).
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "sift").map(|p| p.config_dir().join("config.toml"))
    }

    /// Load configuration from defaults, config files and environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. Built-in defaults
    /// 2. Default config file (optional)
    /// 3. `path`, when given (required)
    /// 4. Environment variables (`SIFT_PARALLEL_WORKERS`, `SIFT_SERIAL_LANE`, ...)
    pub fn load(path: Option<&str>) -> Result<Self, SchedulerError> {
        let mut builder = Config::builder()
            .set_default("parallel_workers", default_parallel_workers() as i64)?
            .set_default("serial_lane", false)?
            .set_default("shutdown_timeout_secs", default_shutdown_timeout() as i64)?;

        if let Some(default_path) = Self::default_config_path() {
            builder = builder.add_source(File::from(default_path).required(false));
        }

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix("SIFT").try_parsing(true));

        let config: SchedulerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
