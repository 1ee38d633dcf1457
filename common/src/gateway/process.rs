// Gateway for a persistent worker process speaking the line protocol on stdio

use super::protocol::{decode_reply, encode_signal};
use super::{WorkerGateway, WorkerLauncher, WorkerReply, WorkerSignal};
use crate::config::WorkerBinding;
use crate::errors::{ConfigurationError, DispatchError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Keeps one worker process alive and exchanges one line per signal.
///
/// The process is spawned lazily and respawned whenever it has exited, so a
/// worker may recycle itself after a number of requests. A process that
/// misses its deadline or breaks the protocol is killed and replaced on the
/// next signal.
pub struct ProcessWorkerGateway {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    process: Mutex<Option<WorkerProcess>>,
    spawn_count: AtomicU64,
}

impl ProcessWorkerGateway {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            process: Mutex::new(None),
            spawn_count: AtomicU64::new(0),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// How many times a worker process has been started
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count.load(Ordering::Relaxed)
    }

    fn spawn(&self) -> Result<WorkerProcess, DispatchError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DispatchError::WorkerUnavailable(format!(
                    "failed to spawn {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            DispatchError::WorkerUnavailable("worker stdin not captured".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            DispatchError::WorkerUnavailable("worker stdout not captured".to_string())
        })?;

        let spawned = self.spawn_count.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            worker = %self.name,
            program = %self.program.display(),
            pid = child.id(),
            spawned,
            "Worker process started"
        );

        Ok(WorkerProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn discard(&self, slot: &mut Option<WorkerProcess>) {
        if let Some(mut process) = slot.take() {
            warn!(worker = %self.name, pid = process.child.id(), "Discarding worker process");
            let _ = process.child.start_kill();
        }
    }

    async fn exchange(
        &self,
        slot: &mut Option<WorkerProcess>,
        signal: WorkerSignal,
    ) -> Result<WorkerReply, DispatchError> {
        if let Some(process) = slot.as_mut() {
            if let Ok(Some(status)) = process.child.try_wait() {
                info!(worker = %self.name, %status, "Worker process exited, respawning");
                *slot = None;
            }
        }

        let process = match slot.take() {
            Some(process) => slot.insert(process),
            None => slot.insert(self.spawn()?),
        };

        let line = encode_signal(&signal)?;
        process.stdin.write_all(line.as_bytes()).await?;
        process.stdin.flush().await?;

        let mut reply = String::new();
        let read = process.stdout.read_line(&mut reply).await?;
        if read == 0 {
            return Err(DispatchError::WorkerUnavailable(
                "worker closed its output".to_string(),
            ));
        }

        decode_reply(&reply)
    }
}

/// Holds the process slot for one exchange.
///
/// Unless the exchange completes, the process is discarded on drop. This also
/// covers a caller that cancels `send` (e.g. an enclosing timeout) while the
/// worker still owes a reply, so a late reply is never read by the next signal.
struct ExchangeGuard<'a> {
    gateway: &'a ProcessWorkerGateway,
    slot: MutexGuard<'a, Option<WorkerProcess>>,
    completed: bool,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.gateway.discard(&mut self.slot);
        }
    }
}

#[async_trait]
impl WorkerGateway for ProcessWorkerGateway {
    #[instrument(skip(self), fields(worker = %self.name))]
    async fn send(
        &self,
        deadline: Duration,
        signal: WorkerSignal,
    ) -> Result<WorkerReply, DispatchError> {
        let attempt = timeout(deadline, async {
            let mut guard = ExchangeGuard {
                gateway: self,
                slot: self.process.lock().await,
                completed: false,
            };
            let result = self.exchange(&mut guard.slot, signal).await;
            guard.completed = result.is_ok();
            result
        })
        .await;

        match attempt {
            Ok(result) => {
                debug!(ok = result.is_ok(), "Worker exchange finished");
                result
            }
            Err(_) => Err(DispatchError::Timeout(deadline)),
        }
    }
}

/// Registers workers as persistent child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessWorkerLauncher {
    args: Vec<String>,
}

impl ProcessWorkerLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl WorkerLauncher for ProcessWorkerLauncher {
    fn launch(
        &self,
        binding: &WorkerBinding,
    ) -> Result<Arc<dyn WorkerGateway>, ConfigurationError> {
        let program = Path::new(&binding.worker);

        // Bare program names are resolved through PATH at spawn time
        if program.components().count() > 1 && !program.exists() {
            return Err(ConfigurationError::WorkerLaunch(format!(
                "worker not found at {}",
                program.display()
            )));
        }

        let gateway = ProcessWorkerGateway::new(binding.name.clone(), program)
            .with_args(self.args.iter().cloned());
        Ok(Arc::new(gateway))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn script_gateway(dir: &TempDir, name: &str, body: &str) -> ProcessWorkerGateway {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        ProcessWorkerGateway::new("test", "/bin/sh").with_args([path.display().to_string()])
    }

    const ECHO_OK: &str = "while read line; do echo '{\"status\":\"ok\"}'; done\n";

    #[tokio::test]
    async fn test_persistent_worker_serves_multiple_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = script_gateway(&dir, "worker.sh", ECHO_OK);

        for _ in 0..3 {
            let reply = gateway
                .send(Duration::from_secs(5), WorkerSignal::Tick)
                .await
                .unwrap();
            assert_eq!(reply, WorkerReply::Ok);
        }
        assert_eq!(gateway.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_recycled_worker_is_respawned() {
        let dir = tempfile::tempdir().unwrap();
        // Serves one request, then exits like a worker hitting max_requests
        let gateway = script_gateway(&dir, "once.sh", "read line\necho '{\"status\":\"ok\"}'\n");

        gateway
            .send(Duration::from_secs(5), WorkerSignal::Tick)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        gateway
            .send(Duration::from_secs(5), WorkerSignal::Tick)
            .await
            .unwrap();
        assert_eq!(gateway.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_hung_worker_times_out_and_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = script_gateway(&dir, "hang.sh", "read line\nsleep 30\n");

        let err = gateway
            .send(Duration::from_millis(300), WorkerSignal::Tick)
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let _ = gateway
            .send(Duration::from_millis(300), WorkerSignal::Tick)
            .await;
        assert_eq!(gateway.spawn_count(), 2);
    }

    /// Hangs on every request in its first incarnation, answers in later ones
    const HANG_ONCE: &str = "\
if [ -e \"$1\" ]; then
  while read line; do echo '{\"status\":\"ok\"}'; done
else
  touch \"$1\"
  while read line; do sleep 30; echo '{\"status\":\"ok\"}'; done
fi
";

    fn hang_once_gateway(dir: &TempDir) -> ProcessWorkerGateway {
        let script = dir.path().join("hang_once.sh");
        std::fs::write(&script, HANG_ONCE).unwrap();
        let marker = dir.path().join("started");
        ProcessWorkerGateway::new("test", "/bin/sh")
            .with_args([script.display().to_string(), marker.display().to_string()])
    }

    #[tokio::test]
    async fn test_cancelled_exchange_discards_process() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = hang_once_gateway(&dir);

        // The caller gives up before the gateway's own deadline
        let cancelled = timeout(
            Duration::from_millis(200),
            gateway.send(Duration::from_secs(5), WorkerSignal::Tick),
        )
        .await;
        assert!(cancelled.is_err());

        let reply = gateway
            .send(Duration::from_secs(5), WorkerSignal::Tick)
            .await
            .unwrap();
        assert_eq!(reply, WorkerReply::Ok);
        assert_eq!(gateway.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_same_deadline_race_never_reuses_hung_process() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hang.sh");
        std::fs::write(&script, "while read line; do sleep 30; done\n").unwrap();
        let gateway = ProcessWorkerGateway::new("test", "/bin/sh")
            .with_args([script.display().to_string()]);

        // Same shape as the dispatcher: whichever timeout wins, the process goes
        let deadline = Duration::from_millis(20);
        for _ in 0..20 {
            let _ = timeout(deadline, gateway.send(deadline, WorkerSignal::Tick)).await;
        }
        assert_eq!(gateway.spawn_count(), 20);
    }

    #[tokio::test]
    async fn test_garbage_reply_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = script_gateway(&dir, "garbage.sh", "while read line; do echo done; done\n");

        let err = gateway
            .send(Duration::from_secs(5), WorkerSignal::Tick)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let gateway = ProcessWorkerGateway::new("test", "/nonexistent/worker-binary");
        let err = gateway
            .send(Duration::from_secs(1), WorkerSignal::Tick)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::WorkerUnavailable(_)));
    }

    #[test]
    fn test_launcher_rejects_missing_path() {
        let binding = WorkerBinding {
            worker: "/nonexistent/worker.sh".to_string(),
            name: "test".to_string(),
            num_threads: 1,
        };
        let result = ProcessWorkerLauncher::new().launch(&binding);
        assert!(matches!(result, Err(ConfigurationError::WorkerLaunch(_))));
    }

    #[test]
    fn test_launcher_accepts_bare_program_name() {
        let binding = WorkerBinding {
            worker: "worker".to_string(),
            name: "test".to_string(),
            num_threads: 1,
        };
        assert!(ProcessWorkerLauncher::new().launch(&binding).is_ok());
    }
}
