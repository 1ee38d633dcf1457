// Registry holding the single active dispatcher

use super::dispatcher::Dispatcher;
use crate::telemetry;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Holds at most one active dispatcher.
///
/// The lock guards only the active pointer. Replacing a dispatcher retires
/// the old one on a background task so the swap never waits for its loop.
#[derive(Debug, Default)]
pub struct DispatcherRegistry {
    active: RwLock<Option<Arc<Dispatcher>>>,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently active dispatcher, if any
    pub async fn active(&self) -> Option<Arc<Dispatcher>> {
        self.active.read().await.clone()
    }

    /// Publish `dispatcher` as active.
    ///
    /// Returns the retirement task of the displaced dispatcher, if one was
    /// active. Awaiting it is optional: the old loop stops either way.
    pub async fn install(&self, dispatcher: Arc<Dispatcher>) -> Option<JoinHandle<()>> {
        let mut active = self.active.write().await;

        info!(
            dispatcher = %dispatcher.name(),
            dispatcher_id = %dispatcher.id(),
            "Installing active dispatcher"
        );

        let previous = active.replace(dispatcher)?;
        if let Some(current) = active.as_ref() {
            if Arc::ptr_eq(&previous, current) {
                // Re-installing the same instance retires nothing
                return None;
            }
        }
        drop(active);

        info!(
            dispatcher = %previous.name(),
            dispatcher_id = %previous.id(),
            "Retiring replaced dispatcher"
        );

        Some(tokio::spawn(async move {
            previous.shutdown().await;
            telemetry::record_dispatcher_retired(previous.name());
            debug!(dispatcher_id = %previous.id(), "Replaced dispatcher retired");
        }))
    }

    /// Clear the active pointer only if it still refers to `dispatcher`.
    ///
    /// Returns whether it was removed; a newer dispatcher is left untouched.
    pub async fn remove_if_current(&self, dispatcher: &Arc<Dispatcher>) -> bool {
        let mut active = self.active.write().await;

        match active.as_ref() {
            Some(current) if Arc::ptr_eq(current, dispatcher) => {
                *active = None;
                info!(dispatcher_id = %dispatcher.id(), "Removed active dispatcher");
                true
            }
            _ => {
                debug!(
                    dispatcher_id = %dispatcher.id(),
                    "Dispatcher no longer active, leaving registry unchanged"
                );
                false
            }
        }
    }
}
