// Worker gateway: the capability used to signal a worker, bounded by a deadline

pub mod channel;
pub mod process;
pub mod protocol;

pub use channel::{ChannelWorkerGateway, WorkerInbox, WorkerRequest};
pub use process::{ProcessWorkerGateway, ProcessWorkerLauncher};

use crate::config::WorkerBinding;
use crate::errors::{ConfigurationError, DispatchError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Message sent to a worker.
///
/// `Tick` carries no data: receiving it is the whole message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerSignal {
    Tick,
}

/// Acknowledgement returned by a worker after handling a signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkerReply {
    Ok,
    Error { message: String },
}

impl WorkerReply {
    pub fn error(message: impl Into<String>) -> Self {
        WorkerReply::Error {
            message: message.into(),
        }
    }

    /// Treat a worker-reported failure as a dispatch failure
    pub fn into_result(self) -> Result<(), DispatchError> {
        match self {
            WorkerReply::Ok => Ok(()),
            WorkerReply::Error { message } => Err(DispatchError::Worker(message)),
        }
    }
}

/// Delivers signals to a worker.
///
/// Implementations must stop waiting once `deadline` has elapsed and return
/// `DispatchError::Timeout` instead of blocking past it.
#[async_trait]
pub trait WorkerGateway: Send + Sync {
    async fn send(
        &self,
        deadline: Duration,
        signal: WorkerSignal,
    ) -> Result<WorkerReply, DispatchError>;
}

/// Turns a validated binding into a live gateway (the host's worker registration)
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, binding: &WorkerBinding)
        -> Result<Arc<dyn WorkerGateway>, ConfigurationError>;
}

impl<F> WorkerLauncher for F
where
    F: Fn(&WorkerBinding) -> Result<Arc<dyn WorkerGateway>, ConfigurationError> + Send + Sync,
{
    fn launch(
        &self,
        binding: &WorkerBinding,
    ) -> Result<Arc<dyn WorkerGateway>, ConfigurationError> {
        self(binding)
    }
}
