// Host lifecycle integration: start on configure, stop on teardown

use super::clock::{Clock, SystemClock};
use super::dispatcher::Dispatcher;
use super::registry::DispatcherRegistry;
use crate::config::{SchedulerConfig, WorkerBinding};
use crate::errors::ConfigurationError;
use crate::gateway::WorkerLauncher;
use std::sync::Arc;
use tracing::{info, instrument};

/// One applied scheduler configuration and the dispatcher it owns
#[derive(Debug)]
pub struct SchedulerModule {
    binding: WorkerBinding,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<DispatcherRegistry>,
}

impl SchedulerModule {
    /// Validate `config`, launch the worker, and publish a new dispatcher.
    ///
    /// Any dispatcher previously active in `registry` is retired in the
    /// background. On error nothing is started or registered.
    pub async fn start(
        config: &SchedulerConfig,
        launcher: &dyn WorkerLauncher,
        registry: Arc<DispatcherRegistry>,
    ) -> Result<Self, ConfigurationError> {
        Self::start_with_clock(config, launcher, registry, Arc::new(SystemClock)).await
    }

    #[instrument(skip_all, fields(worker = ?config.worker, name = ?config.name))]
    pub async fn start_with_clock(
        config: &SchedulerConfig,
        launcher: &dyn WorkerLauncher,
        registry: Arc<DispatcherRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigurationError> {
        let binding = config.bind()?;
        let dispatcher_config = config.dispatcher_config()?;
        let worker = launcher.launch(&binding)?;

        let dispatcher =
            Dispatcher::start_with_clock(binding.name.clone(), worker, dispatcher_config, clock);
        registry.install(dispatcher.clone()).await;

        info!(
            scheduler = %binding.name,
            worker = %binding.worker,
            dispatcher_id = %dispatcher.id(),
            "Scheduler provisioned"
        );

        Ok(Self {
            binding,
            dispatcher,
            registry,
        })
    }

    /// Shut down the owned dispatcher and deregister it if it is still active.
    ///
    /// A dispatcher installed by a newer configuration is left in place.
    #[instrument(skip(self), fields(scheduler = %self.binding.name))]
    pub async fn stop(&self) {
        self.dispatcher.shutdown().await;
        let removed = self.registry.remove_if_current(&self.dispatcher).await;
        info!(removed_from_registry = removed, "Scheduler cleaned up");
    }

    pub fn binding(&self) -> &WorkerBinding {
        &self.binding
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}
