//! One supervised OS process per shell command.
//!
//! Two reader tasks forward raw pipe chunks to a single supervisor task,
//! which owns decoding, binary detection and accumulation. Because only the
//! supervisor emits [`OutputEvent`]s, the binary flag flips in exactly one
//! place and no `Data` event follows it on either stream.

mod decode;
mod kill;

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use decode::strip_ansi;
pub use kill::KILL_GRACE_PERIOD;

use decode::StreamDecoder;

/// Capacity of the per-run event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Cap on each accumulated buffer (stdout, stderr, combined, raw).
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 16 * 1024 * 1024;
/// How long output is still collected after the shell itself exited.
pub const DRAIN_WINDOW: Duration = Duration::from_millis(250);

const READ_CHUNK_BYTES: usize = 8192;
const BINARY_SNIFF_BYTES: usize = 512;
const BINARY_SNIFF_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Streamed output of a running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Data { stream: OutputStream, chunk: String },
    BinaryDetected,
    BinaryProgress { bytes_received: u64 },
}

/// Final state of a finished (or failed to start) process.
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// Set whenever cancellation was requested, even if the process had
    /// already exited on its own.
    pub aborted: bool,
    /// Spawn or wait failure.
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
    /// Decoded stdout and stderr in arrival order.
    pub output: String,
    pub raw_output: Vec<u8>,
    pub binary_detected: bool,
    /// At least one buffer hit its cap.
    pub truncated: bool,
}

impl ProcessResult {
    fn spawn_failed(message: String) -> Self {
        Self {
            error: Some(message),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.error.is_none() && !self.aborted && self.exit_code == Some(0)
    }
}

/// Handle to a spawned process.
///
/// Drain `events` until it closes, then await `result`; or call
/// [`RunningProcess::wait`] to discard events.
#[derive(Debug)]
pub struct RunningProcess {
    pub pid: Option<u32>,
    pub events: mpsc::Receiver<OutputEvent>,
    pub result: JoinHandle<ProcessResult>,
}

impl RunningProcess {
    /// Forward every event to `on_event`, then return the final result.
    pub async fn collect(mut self, mut on_event: impl FnMut(OutputEvent)) -> ProcessResult {
        while let Some(event) = self.events.recv().await {
            on_event(event);
        }
        Self::join(self.pid, self.result).await
    }

    /// Ignore streamed events and wait for the final result.
    pub async fn wait(self) -> ProcessResult {
        drop(self.events);
        Self::join(self.pid, self.result).await
    }

    async fn join(pid: Option<u32>, handle: JoinHandle<ProcessResult>) -> ProcessResult {
        handle.await.unwrap_or_else(|e| ProcessResult {
            pid,
            error: Some(format!("process supervisor failed: {e}")),
            ..ProcessResult::default()
        })
    }
}

/// Spawns commands through the platform shell.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_buffer_bytes: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
        }
    }
}

impl ProcessRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    /// Spawn `command` in `cwd`. Must be called inside a Tokio runtime.
    ///
    /// Cancelling `cancel` terminates the whole process tree. Spawn
    /// failures are reported through the result, never as a panic.
    #[must_use]
    pub fn execute(&self, command: &str, cwd: &Path, cancel: CancellationToken) -> RunningProcess {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut child = match shell_command(command, cwd).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command, error = %e, "failed to spawn shell");
                let message = format!("failed to spawn shell: {e}");
                return RunningProcess {
                    pid: None,
                    events: event_rx,
                    result: tokio::spawn(async move { ProcessResult::spawn_failed(message) }),
                };
            }
        };

        let pid = child.id();
        tracing::debug!(pid, command, "spawned shell");

        let (raw_tx, raw_rx) = mpsc::channel(64);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, OutputStream::Stdout, raw_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, OutputStream::Stderr, raw_tx));
        }

        let supervisor = Supervisor {
            child,
            pid,
            raw_rx,
            readers,
            events: event_tx,
            cancel,
            acc: Accumulator::new(self.max_buffer_bytes),
        };

        RunningProcess {
            pid,
            events: event_rx,
            result: tokio::spawn(supervisor.run()),
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(command).process_group(0);
    configure(&mut cmd, cwd);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/c").arg(command);
    configure(&mut cmd, cwd);
    cmd
}

fn configure(cmd: &mut Command, cwd: &Path) {
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
}

type RawChunk = (OutputStream, Vec<u8>);

fn spawn_reader<R>(
    mut reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<RawChunk>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(?stream, error = %e, "pipe read failed");
                    break;
                }
            }
        }
    })
}

struct Supervisor {
    child: Child,
    pid: Option<u32>,
    raw_rx: mpsc::Receiver<RawChunk>,
    readers: Vec<JoinHandle<()>>,
    events: mpsc::Sender<OutputEvent>,
    cancel: CancellationToken,
    acc: Accumulator,
}

impl Supervisor {
    async fn run(mut self) -> ProcessResult {
        let mut kill_requested = false;
        let status = loop {
            tokio::select! {
                Some((stream, chunk)) = self.raw_rx.recv() => {
                    self.acc.ingest(stream, &chunk, &self.events).await;
                }
                status = self.child.wait() => break status,
                () = self.cancel.cancelled(), if !kill_requested => {
                    kill_requested = true;
                    self.request_kill();
                }
            }
        };

        self.drain().await;
        for reader in &self.readers {
            reader.abort();
        }
        self.acc.finish(&self.events).await;

        let aborted = self.cancel.is_cancelled();
        let mut result = self.acc.into_result(self.pid, aborted);
        match status {
            Ok(status) => {
                result.exit_code = status.code();
                result.signal = exit_signal(status);
            }
            Err(e) => result.error = Some(format!("failed to wait for process: {e}")),
        }
        tracing::debug!(
            pid = self.pid,
            exit_code = result.exit_code,
            signal = result.signal,
            aborted,
            "process finished"
        );
        result
    }

    fn request_kill(&mut self) {
        match self.pid {
            Some(pid) => {
                tracing::debug!(pid, "cancellation requested, terminating process tree");
                tokio::spawn(kill::terminate_tree(pid));
            }
            None => {
                if let Err(e) = self.child.start_kill() {
                    tracing::debug!(error = %e, "failed to kill child");
                }
            }
        }
    }

    /// Background children may hold the pipes open after the shell exits;
    /// collect what is already there for a bounded time.
    async fn drain(&mut self) {
        let deadline = tokio::time::sleep(DRAIN_WINDOW);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                chunk = self.raw_rx.recv() => match chunk {
                    Some((stream, bytes)) => self.acc.ingest(stream, &bytes, &self.events).await,
                    None => break,
                },
                () = &mut deadline => {
                    tracing::debug!(pid = self.pid, "output drain window elapsed");
                    break;
                }
            }
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// Decoding, binary detection and capped accumulation for one run.
struct Accumulator {
    stdout_decoder: StreamDecoder,
    stderr_decoder: StreamDecoder,
    binary: bool,
    sniffed: usize,
    bytes_received: u64,
    max_bytes: usize,
    stdout: String,
    stderr: String,
    output: String,
    raw: Vec<u8>,
    truncated: bool,
}

impl Accumulator {
    fn new(max_bytes: usize) -> Self {
        Self {
            stdout_decoder: StreamDecoder::new(),
            stderr_decoder: StreamDecoder::new(),
            binary: false,
            sniffed: 0,
            bytes_received: 0,
            max_bytes,
            stdout: String::new(),
            stderr: String::new(),
            output: String::new(),
            raw: Vec::new(),
            truncated: false,
        }
    }

    async fn ingest(
        &mut self,
        stream: OutputStream,
        chunk: &[u8],
        events: &mpsc::Sender<OutputEvent>,
    ) {
        self.bytes_received += chunk.len() as u64;
        let room = self.max_bytes.saturating_sub(self.raw.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.raw.extend_from_slice(&chunk[..chunk.len().min(room)]);

        if !self.binary && self.sniffed < BINARY_SNIFF_LIMIT {
            self.sniffed += chunk.len();
            if looks_binary(chunk) {
                self.binary = true;
                tracing::debug!("binary output detected");
                let _ = events.send(OutputEvent::BinaryDetected).await;
            }
        }

        if self.binary {
            let _ = events
                .send(OutputEvent::BinaryProgress {
                    bytes_received: self.bytes_received,
                })
                .await;
            return;
        }

        let text = match stream {
            OutputStream::Stdout => self.stdout_decoder.decode(chunk),
            OutputStream::Stderr => self.stderr_decoder.decode(chunk),
        };
        self.push_text(stream, text, events).await;
    }

    async fn finish(&mut self, events: &mpsc::Sender<OutputEvent>) {
        if self.binary {
            return;
        }
        let out = self.stdout_decoder.finish();
        self.push_text(OutputStream::Stdout, out, events).await;
        let err = self.stderr_decoder.finish();
        self.push_text(OutputStream::Stderr, err, events).await;
    }

    async fn push_text(
        &mut self,
        stream: OutputStream,
        text: String,
        events: &mpsc::Sender<OutputEvent>,
    ) {
        if text.is_empty() {
            return;
        }
        let target = match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        self.truncated |= !append_capped(target, &text, self.max_bytes);
        self.truncated |= !append_capped(&mut self.output, &text, self.max_bytes);
        let _ = events.send(OutputEvent::Data { stream, chunk: text }).await;
    }

    fn into_result(self, pid: Option<u32>, aborted: bool) -> ProcessResult {
        ProcessResult {
            pid,
            aborted,
            stdout: self.stdout,
            stderr: self.stderr,
            output: self.output,
            raw_output: self.raw,
            binary_detected: self.binary,
            truncated: self.truncated,
            ..ProcessResult::default()
        }
    }
}

fn looks_binary(chunk: &[u8]) -> bool {
    chunk[..chunk.len().min(BINARY_SNIFF_BYTES)].contains(&0)
}

/// Append as much of `text` as fits under `cap`; false if anything was dropped.
fn append_capped(target: &mut String, text: &str, cap: usize) -> bool {
    let room = cap.saturating_sub(target.len());
    if text.len() <= room {
        target.push_str(text);
        return true;
    }
    let end = crate::executor::floor_char_boundary(text, room);
    target.push_str(&text[..end]);
    false
}
