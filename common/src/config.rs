// Configuration management with layered configuration (defaults, file, env)

use crate::errors::ConfigurationError;
use crate::scheduler::DispatcherConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Logical name used when the configuration does not provide one
pub const DEFAULT_SCHEDULER_NAME: &str = "minute-scheduler";

/// Environment prefix for host settings (`APP__SCHEDULER__WORKER=...`)
pub const HOST_ENV_PREFIX: &str = "APP";

/// Environment prefix for worker process settings (`WORKER__COMMAND=...`)
pub const WORKER_ENV_PREFIX: &str = "WORKER";

/// Main settings structure for the scheduler host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
}

/// Options consumed when provisioning a dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Path or handle of the worker to signal. Required.
    pub worker: Option<String>,
    /// Logical identifier for logging and registry bookkeeping
    pub name: Option<String>,
    /// Requested parallelism; always normalized to exactly one
    pub num_threads: i64,
    pub tick_interval_seconds: u64,
    pub dispatch_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker: None,
            name: None,
            num_threads: 1,
            tick_interval_seconds: 60,
            dispatch_timeout_seconds: 65,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: Option<u16>,
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
            tracing_endpoint: None,
        }
    }
}

/// Validated parameters handed to the worker launcher and the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerBinding {
    pub worker: String,
    pub name: String,
    pub num_threads: u32,
}

/// Settings for the reference worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Shell command executed once per tick
    pub command: String,
    /// Signals served before the process exits to be recycled
    pub max_requests: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            command: "true".to_string(),
            max_requests: 60,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigurationError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigurationError> {
        Self::load_with_env_prefix(config_dir, HOST_ENV_PREFIX)
    }

    pub fn load_with_env_prefix<P: AsRef<Path>>(
        config_dir: P,
        env_prefix: &str,
    ) -> Result<Self, ConfigurationError> {
        let config_dir = config_dir.as_ref();

        let config = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate value ranges. A missing worker is reported by `SchedulerConfig::bind`
    /// so that a host can load settings before the worker is known.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.scheduler.dispatcher_config().map(|_| ())
    }
}

impl SchedulerConfig {
    /// Validate and normalize the options into a `WorkerBinding`
    pub fn bind(&self) -> Result<WorkerBinding, ConfigurationError> {
        let worker = self
            .worker
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .ok_or(ConfigurationError::MissingWorker)?
            .to_string();

        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_SCHEDULER_NAME)
            .to_string();

        let num_threads = normalize_num_threads(self.num_threads, &name);

        Ok(WorkerBinding {
            worker,
            name,
            num_threads,
        })
    }

    /// Timing parameters for the dispatcher loop
    pub fn dispatcher_config(&self) -> Result<DispatcherConfig, ConfigurationError> {
        if self.tick_interval_seconds == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "scheduler.tick_interval_seconds".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.dispatch_timeout_seconds <= self.tick_interval_seconds {
            return Err(ConfigurationError::InvalidValue {
                field: "scheduler.dispatch_timeout_seconds".to_string(),
                reason: format!(
                    "must be greater than tick_interval_seconds ({})",
                    self.tick_interval_seconds
                ),
            });
        }

        Ok(DispatcherConfig {
            tick_interval: Duration::from_secs(self.tick_interval_seconds),
            dispatch_timeout: Duration::from_secs(self.dispatch_timeout_seconds),
            ..DispatcherConfig::default()
        })
    }
}

/// Concurrent scheduler instances are unsupported: anything above one is
/// forced down with a warning, anything at or below zero becomes one.
pub fn normalize_num_threads(requested: i64, name: &str) -> u32 {
    if requested > 1 {
        warn!(
            scheduler = name,
            requested, "num_threads > 1 is not supported for the scheduler, enforcing 1"
        );
    }
    1
}

impl WorkerSettings {
    pub fn load() -> Result<Self, ConfigurationError> {
        Self::load_with_env_prefix(WORKER_ENV_PREFIX)
    }

    pub fn load_with_env_prefix(env_prefix: &str) -> Result<Self, ConfigurationError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: WorkerSettings = config.try_deserialize()?;
        if settings.max_requests == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "max_requests".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(settings)
    }
}
