//! Debugger Process Adapter (component A).
//!
//! Owns exactly one CDB child process and its stdio. CDB has no structured
//! protocol: to know where a command's output ends, every submission is
//! wrapped as `.echo <START>; <user-input>; .echo <END>` and the adapter
//! reads stdout until it sees the echoed `<END>` line. `<START>`/`<END>` are
//! generated once per adapter instance (process-unique for its lifetime) and
//! survive internal restarts.
//!
//! Concurrency contract: only the Queue Processor (component D) calls
//! [`DebuggerAdapter::execute`], one command/batch at a time, so the stdout
//! side needs no additional serialization. `stdin` is guarded by its own
//! lock so [`DebuggerAdapter::signal_break`] can interrupt a stuck
//! `execute` concurrently, without fighting over the same mutex.

use crate::cancel::{CancelReason, CancelToken};
use crate::error::{CoreError, CoreResult};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

/// Grace window allowed for CDB to honor a break before the adapter declares
/// the process `Unresponsive`.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Bounded ring of the child's most recent stderr lines, attached to fault errors.
const STDERR_RING_CAPACITY: usize = 200;

/// Control byte sent to stdin to request a soft interrupt (CTRL-BREAK equivalent).
const BREAK_BYTE: u8 = 0x03;

/// Outcome of [`DebuggerAdapter::execute`] that failed to produce output.
#[derive(Debug)]
pub enum ExecuteError {
    /// The cancellation token fired and CDB honored the break within the grace window.
    Cancelled(CancelReason),
    /// The break was ignored within the grace window; the caller should escalate to recovery.
    Unresponsive,
    /// Any other I/O fault: premature EOF, write error, or the adapter not being active.
    Fault(CoreError),
}

impl From<CoreError> for ExecuteError {
    fn from(err: CoreError) -> Self {
        ExecuteError::Fault(err)
    }
}

struct ChildHandles {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

/// Owns one CDB child process plus its stdio.
pub struct DebuggerAdapter {
    cdb_path: String,
    startup_timeout: Duration,
    start_sentinel: String,
    end_sentinel: String,
    stdin: Mutex<Option<ChildStdin>>,
    handles: Mutex<Option<ChildHandles>>,
    stderr_ring: Arc<Mutex<VecDeque<String>>>,
    active: AtomicBool,
    restart_count: AtomicU32,
}

impl DebuggerAdapter {
    #[must_use]
    pub fn new(cdb_path: impl Into<String>, startup_timeout: Duration) -> Self {
        let unique = std::process::id();
        Self {
            cdb_path: cdb_path.into(),
            startup_timeout,
            start_sentinel: format!("MCP_NEXUS_START_{unique}"),
            end_sentinel: format!("MCP_NEXUS_END_{unique}"),
            stdin: Mutex::new(None),
            handles: Mutex::new(None),
            stderr_ring: Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_RING_CAPACITY))),
            active: AtomicBool::new(false),
            restart_count: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::SeqCst)
    }

    /// Spawn the child process, issue initial setup commands, and wait for
    /// the first prompt. `target` is a dump file path (empty when restarting
    /// without reloading a specific dump).
    pub async fn start(&self, target: &str, symbol_path: &str) -> CoreResult<()> {
        if self.is_active() {
            return Ok(());
        }

        let mut cmd = tokio::process::Command::new(&self.cdb_path);
        if !target.is_empty() {
            cmd.arg("-z").arg(target);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| CoreError::StartupFailed { stderr_tail: e.to_string() })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let ring = self.stderr_ring.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut buf = ring.lock().await;
                if buf.len() >= STDERR_RING_CAPACITY {
                    buf.pop_front();
                }
                buf.push_back(line);
            }
        });

        *self.stdin.lock().await = Some(stdin);
        *self.handles.lock().await = Some(ChildHandles {
            child,
            stdout: BufReader::new(stdout),
        });

        // Bootstrap command: confirms the prompt is alive and sets the symbol path.
        let bootstrap = format!(".sympath {symbol_path}");
        let result = tokio::time::timeout(self.startup_timeout, self.raw_execute(&bootstrap)).await;

        match result {
            Ok(Ok(_)) => {
                self.active.store(true, Ordering::SeqCst);
                tracing::info!(cdb_path = %self.cdb_path, target, "adapter started");
                Ok(())
            }
            Ok(Err(e)) => {
                let tail = self.stderr_tail().await;
                *self.handles.lock().await = None;
                *self.stdin.lock().await = None;
                tracing::error!(error = %e, "adapter failed to start");
                Err(CoreError::StartupFailed {
                    stderr_tail: format!("{e}: {tail}"),
                })
            }
            Err(_) => {
                let tail = self.stderr_tail().await;
                *self.handles.lock().await = None;
                *self.stdin.lock().await = None;
                tracing::error!("adapter startup timed out");
                Err(CoreError::StartupFailed { stderr_tail: tail })
            }
        }
    }

    /// Ask CDB to quit; force-terminate if it doesn't exit promptly.
    pub async fn stop(&self) -> CoreResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        tracing::info!("adapter stopping");
        self.active.store(false, Ordering::SeqCst);

        if let Some(stdin) = self.stdin.lock().await.as_mut() {
            let _ = stdin.write_all(b"q\n").await;
            let _ = stdin.flush().await;
        }

        let mut handles = self.handles.lock().await;
        if let Some(mut h) = handles.take() {
            let exited = tokio::time::timeout(Duration::from_secs(3), h.child.wait()).await;
            if exited.is_err() {
                let _ = h.child.kill().await;
            }
        }
        *self.stdin.lock().await = None;
        Ok(())
    }

    /// Write the CTRL-BREAK-equivalent byte to stdin, independent of any
    /// in-flight `execute` call (uses the stdin lock only, not stdout's).
    pub async fn signal_break(&self) {
        if let Some(stdin) = self.stdin.lock().await.as_mut() {
            let _ = stdin.write_all(&[BREAK_BYTE]).await;
            let _ = stdin.flush().await;
        }
    }

    /// Execute one pre-composed line of CDB input (already wrapped with the
    /// outer `.echo` START/END markers are added here) and return the text
    /// strictly between the two sentinel lines.
    pub async fn execute(&self, raw_input: &str, cancel: CancelToken) -> Result<String, ExecuteError> {
        if !self.is_active() {
            return Err(CoreError::AdapterFault("adapter is not active".to_string()).into());
        }

        let read = self.raw_execute(raw_input);
        tokio::pin!(read);

        tokio::select! {
            biased;
            result = &mut read => result.map_err(ExecuteError::from),
            () = cancel.cancelled() => {
                self.signal_break().await;
                match tokio::time::timeout(CANCEL_GRACE, &mut read).await {
                    Ok(_) => {
                        let reason = cancel.reason().unwrap_or(CancelReason::User);
                        Err(ExecuteError::Cancelled(reason))
                    }
                    Err(_) => Err(ExecuteError::Unresponsive),
                }
            }
        }
    }

    /// Write the framed command and read until the end sentinel, with no
    /// cancellation awareness (used both by `execute` and by `start`'s
    /// bootstrap probe).
    async fn raw_execute(&self, raw_input: &str) -> CoreResult<String> {
        let line = format!(
            ".echo {start}; {raw_input}; .echo {end}\n",
            start = self.start_sentinel,
            end = self.end_sentinel
        );

        {
            let mut guard = self.stdin.lock().await;
            let stdin = guard
                .as_mut()
                .ok_or_else(|| CoreError::AdapterFault("adapter stdin unavailable".to_string()))?;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(CoreError::adapter_fault)?;
            stdin.flush().await.map_err(CoreError::adapter_fault)?;
        }

        let mut guard = self.handles.lock().await;
        let handles = guard
            .as_mut()
            .ok_or_else(|| CoreError::AdapterFault("adapter stdout unavailable".to_string()))?;

        let mut output = String::new();
        let mut seen_start = false;
        let mut buf = String::new();
        loop {
            buf.clear();
            let bytes = handles
                .stdout
                .read_line(&mut buf)
                .await
                .map_err(CoreError::adapter_fault)?;
            if bytes == 0 {
                return Err(CoreError::AdapterFault("premature EOF on adapter stdout".to_string()));
            }
            let trimmed = buf.trim_end_matches(['\n', '\r']);
            if !seen_start {
                if trimmed == self.start_sentinel {
                    seen_start = true;
                }
                continue;
            }
            if trimmed == self.end_sentinel {
                break;
            }
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(trimmed);
        }
        Ok(output)
    }

    async fn stderr_tail(&self) -> String {
        self.stderr_ring
            .lock()
            .await
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Snapshot of the stderr ring buffer, attached to fault diagnostics.
    pub async fn stderr_snapshot(&self) -> Vec<String> {
        self.stderr_ring.lock().await.iter().cloned().collect()
    }

    pub fn note_restart(&self) {
        let count = self.restart_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(restart_count = count, "adapter restarted");
    }
}
