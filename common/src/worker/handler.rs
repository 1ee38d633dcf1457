// Scheduled work executed by the worker on every tick

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, instrument, warn};

/// Runs the scheduled work for one tick.
///
/// Failures are returned as a message for the reply; they never end the
/// worker loop.
#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn on_tick(&self) -> Result<(), String>;
}

/// Runs a shell command once per tick
#[derive(Debug, Clone)]
pub struct CommandTickHandler {
    command: String,
}

impl CommandTickHandler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TickHandler for CommandTickHandler {
    #[instrument(skip(self), fields(command = %self.command))]
    async fn on_tick(&self) -> Result<(), String> {
        // stdout belongs to the protocol, so the command's output is captured
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to run scheduled command: {}", e))?;

        if output.status.success() {
            info!("Scheduled command finished");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.lines().rev().find(|l| !l.trim().is_empty());
        let message = match detail {
            Some(line) => format!("scheduled command failed ({}): {}", output.status, line.trim()),
            None => format!("scheduled command failed ({})", output.status),
        };
        warn!(message = %message, "Scheduled command failed");
        Err(message)
    }
}
