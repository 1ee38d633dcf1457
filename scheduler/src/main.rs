// Scheduler host entry point: owns the registry and applies configuration

use anyhow::Result;
use common::config::Settings;
use common::gateway::ProcessWorkerLauncher;
use common::scheduler::{DispatcherRegistry, SchedulerModule};
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!("Starting minute scheduler");

    let registry = Arc::new(DispatcherRegistry::new());
    let launcher = ProcessWorkerLauncher::new();

    let mut module = SchedulerModule::start(&settings.scheduler, &launcher, registry.clone())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to provision scheduler");
            e
        })?;

    let mut signals = HostSignals::new()?;

    loop {
        match signals.next().await {
            HostSignal::Shutdown => {
                info!("Shutdown signal received, stopping scheduler");
                break;
            }
            HostSignal::Reload => {
                info!("Reload signal received, reapplying configuration");
                match reload(&launcher, registry.clone()).await {
                    Ok(replacement) => {
                        // The new dispatcher is already active; cleanup must leave it alone
                        let previous = std::mem::replace(&mut module, replacement);
                        previous.stop().await;
                    }
                    Err(e) => {
                        error!(error = %e, "Reload failed, keeping current scheduler");
                    }
                }
            }
        }
    }

    module.stop().await;
    telemetry::shutdown_tracer();

    info!("Scheduler stopped");
    Ok(())
}

async fn reload(
    launcher: &ProcessWorkerLauncher,
    registry: Arc<DispatcherRegistry>,
) -> Result<SchedulerModule> {
    let settings = Settings::load()?;
    let module = SchedulerModule::start(&settings.scheduler, launcher, registry).await?;
    Ok(module)
}

enum HostSignal {
    Shutdown,
    Reload,
}

#[cfg(unix)]
struct HostSignals {
    hangup: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl HostSignals {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn next(&mut self) -> HostSignal {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => HostSignal::Shutdown,
            _ = self.terminate.recv() => HostSignal::Shutdown,
            _ = self.hangup.recv() => HostSignal::Reload,
        }
    }
}

#[cfg(not(unix))]
struct HostSignals;

#[cfg(not(unix))]
impl HostSignals {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> HostSignal {
        let _ = tokio::signal::ctrl_c().await;
        HostSignal::Shutdown
    }
}
