// Error handling framework for the minute scheduler

use std::time::Duration;
use thiserror::Error;

/// Errors raised while binding configuration and provisioning a dispatcher.
///
/// These are fatal to the provisioning attempt: no dispatcher is created or
/// registered when one of them is returned.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("scheduler worker path is required")]
    MissingWorker,

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to launch worker: {0}")]
    WorkerLaunch(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Errors from a single dispatch to the worker.
///
/// Always recovered by the tick loop: logged, counted, never retried.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Worker dropped the request without replying")]
    NoReply,

    #[error("Worker reported failure: {0}")]
    Worker(String),

    #[error("Malformed worker message: {0}")]
    Protocol(String),

    #[error("Worker I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Stable label used as the `reason` metric dimension
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Timeout(_) => "timeout",
            DispatchError::WorkerUnavailable(_) => "unavailable",
            DispatchError::NoReply => "no_reply",
            DispatchError::Worker(_) => "worker",
            DispatchError::Protocol(_) => "protocol",
            DispatchError::Io(_) => "io",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Timeout(_))
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Protocol(err.to_string())
    }
}
