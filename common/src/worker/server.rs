// Request loop of a persistent worker process

use super::handler::TickHandler;
use crate::errors::DispatchError;
use crate::gateway::protocol::{decode_signal, encode_reply};
use crate::gateway::{WorkerReply, WorkerSignal};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Why the serve loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// `max_requests` reached; the host respawns the worker on the next tick
    Recycle { served: u32 },
    /// The host closed the input stream
    HostClosed { served: u32 },
}

/// Answer signals read from `reader` until `max_requests` have been served.
///
/// Every signal gets exactly one reply line, including ones that fail to
/// decode or whose handler fails.
pub async fn serve<R, W>(
    reader: R,
    mut writer: W,
    handler: &dyn TickHandler,
    max_requests: u32,
) -> Result<ServeOutcome, DispatchError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut served = 0;

    while served < max_requests {
        let Some(line) = lines.next_line().await? else {
            info!(served, "Host closed the request stream");
            return Ok(ServeOutcome::HostClosed { served });
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match decode_signal(&line) {
            Ok(WorkerSignal::Tick) => {
                debug!("Tick received");
                match handler.on_tick().await {
                    Ok(()) => WorkerReply::Ok,
                    Err(message) => WorkerReply::Error { message },
                }
            }
            Err(e) => {
                warn!(error = %e, "Unreadable request from host");
                WorkerReply::error(e.to_string())
            }
        };

        writer.write_all(encode_reply(&reply)?.as_bytes()).await?;
        writer.flush().await?;
        served += 1;
    }

    info!(served, "Request limit reached, exiting for recycling");
    Ok(ServeOutcome::Recycle { served })
}
