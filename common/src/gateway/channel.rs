// In-process worker gateway backed by a bounded channel

use super::{WorkerGateway, WorkerReply, WorkerSignal};
use crate::errors::DispatchError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

/// A signal waiting to be handled by an in-process worker
#[derive(Debug)]
pub struct WorkerRequest {
    pub signal: WorkerSignal,
    reply_tx: oneshot::Sender<WorkerReply>,
}

impl WorkerRequest {
    /// Acknowledge the signal. Ignored if the sender already gave up waiting.
    pub fn respond(self, reply: WorkerReply) {
        let _ = self.reply_tx.send(reply);
    }
}

/// Receiving side drained by the in-process worker
#[derive(Debug)]
pub struct WorkerInbox {
    rx: mpsc::Receiver<WorkerRequest>,
}

impl WorkerInbox {
    /// Next pending request, or `None` once every gateway handle is dropped
    pub async fn recv(&mut self) -> Option<WorkerRequest> {
        self.rx.recv().await
    }
}

/// Gateway for a worker that lives inside the host process
#[derive(Debug, Clone)]
pub struct ChannelWorkerGateway {
    tx: mpsc::Sender<WorkerRequest>,
}

impl ChannelWorkerGateway {
    pub fn new(capacity: usize) -> (Self, WorkerInbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, WorkerInbox { rx })
    }
}

#[async_trait]
impl WorkerGateway for ChannelWorkerGateway {
    async fn send(
        &self,
        deadline: Duration,
        signal: WorkerSignal,
    ) -> Result<WorkerReply, DispatchError> {
        let exchange = async {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.tx
                .send(WorkerRequest { signal, reply_tx })
                .await
                .map_err(|_| DispatchError::WorkerUnavailable("worker inbox closed".to_string()))?;
            reply_rx.await.map_err(|_| DispatchError::NoReply)
        };

        timeout(deadline, exchange)
            .await
            .map_err(|_| DispatchError::Timeout(deadline))?
    }
}
