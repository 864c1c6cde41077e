//! ffmpeg process management.
//!
//! Each encoder gets two background tasks: a stderr reader that publishes
//! progress through a watch channel, and a waiter that owns the `Child`,
//! reaps it and handles stop requests (`q` on stdin, then kill).

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::args::build_args;
use super::ffmpeg_parser::{is_error_line, parse_progress};
use super::{
    EncodeJob, EncoderLauncher, EncoderProcess, ExitInfo, ProgressSample, TerminationOutcome,
};
use crate::destination::{redact_endpoint, redact_endpoint_in};
use crate::{Error, Result};

/// Time allowed for the stderr reader to drain after the process exited.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Number of stderr error lines kept for failure reasons.
const ERROR_TAIL_LINES: usize = 8;

/// Launches ffmpeg encoders.
#[derive(Debug, Clone, Default)]
pub struct FfmpegLauncher;

impl FfmpegLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Detect the ffmpeg version, `None` when the binary is not runnable.
    pub fn detect_version(binary_path: &str) -> Option<String> {
        process_utils::std_command(binary_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| {
                String::from_utf8(output.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.to_string()))
            })
    }
}

#[async_trait]
impl EncoderLauncher for FfmpegLauncher {
    async fn launch(&self, job: &EncodeJob) -> Result<Box<dyn EncoderProcess>> {
        let args = build_args(job);
        let binary_path = &job.profile.encoder.binary_path;

        info!(
            destination = %job.destination_id,
            input = %job.input.describe(),
            endpoint = %redact_endpoint(&job.endpoint_url),
            "Starting ffmpeg"
        );
        trace!(destination = %job.destination_id, args = ?redacted_args(&args, &job.endpoint_url), "ffmpeg arguments");

        let mut cmd = process_utils::tokio_command(binary_path);
        cmd.args(&args)
            .env("LC_ALL", "C") // Force consistent output
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn_failure(&job.destination_id, format!("{binary_path}: {e}")))?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stderr = child.stderr.take().ok_or_else(|| {
            Error::spawn_failure(&job.destination_id, "failed to capture ffmpeg stderr")
        })?;

        let (progress_tx, progress_rx) = watch::channel(ProgressSample::default());
        let (exit_tx, exit_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();
        let error_tail = Arc::new(Mutex::new(VecDeque::with_capacity(ERROR_TAIL_LINES)));

        let reader = tokio::spawn(read_stderr(
            stderr,
            progress_tx,
            error_tail.clone(),
            job.destination_id.clone(),
            job.endpoint_url.clone(),
        ));

        let waiter = tokio::spawn(wait_child(
            child,
            stdin,
            stop_rx,
            exit_tx,
            WaiterContext {
                destination_id: job.destination_id.clone(),
                reader,
                error_tail,
            },
        ));

        debug!(destination = %job.destination_id, pid = ?pid, "ffmpeg spawned");

        Ok(Box::new(FfmpegProcess {
            pid,
            progress_rx,
            exit_rx,
            stop_tx: Some(stop_tx),
            waiter: Some(waiter),
        }))
    }
}

fn redacted_args(args: &[String], endpoint_url: &str) -> Vec<String> {
    args.iter()
        .map(|a| {
            if a == endpoint_url {
                redact_endpoint(a)
            } else {
                a.clone()
            }
        })
        .collect()
}

/// Stop request sent to the waiter task.
struct StopRequest {
    grace: Duration,
    reply: oneshot::Sender<TerminationOutcome>,
}

struct WaiterContext {
    destination_id: String,
    reader: JoinHandle<()>,
    error_tail: Arc<Mutex<VecDeque<String>>>,
}

async fn read_stderr(
    stderr: ChildStderr,
    progress_tx: watch::Sender<ProgressSample>,
    error_tail: Arc<Mutex<VecDeque<String>>>,
    destination_id: String,
    endpoint_url: String,
) {
    // Stats lines end with '\r', log lines with '\n'.
    let mut segments = BufReader::new(stderr).split(b'\r');

    loop {
        match segments.next_segment().await {
            Ok(Some(segment)) => {
                let text = String::from_utf8_lossy(&segment);
                for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
                    if let Some(progress) = parse_progress(line) {
                        let now = Instant::now();
                        progress_tx.send_modify(|sample| sample.record(progress, now));
                        continue;
                    }

                    // ffmpeg echoes the output URL in its messages.
                    let line = redact_endpoint_in(line, &endpoint_url);
                    if is_error_line(&line) {
                        debug!(destination = %destination_id, "ffmpeg: {}", line);
                        let mut tail = error_tail.lock();
                        if tail.len() == ERROR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    } else {
                        trace!(destination = %destination_id, "ffmpeg: {}", line);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(destination = %destination_id, "Error reading ffmpeg output: {}", e);
                break;
            }
        }
    }
}

async fn wait_child(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    stop_rx: oneshot::Receiver<StopRequest>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    ctx: WaiterContext,
) {
    let destination_id = ctx.destination_id.as_str();
    let mut reply = None;

    let status = tokio::select! {
        status = child.wait() => status,
        request = stop_rx => {
            match request {
                Ok(StopRequest { grace, reply: reply_tx }) => {
                    let (status, outcome) = stop_child(&mut child, stdin.take(), grace, destination_id).await;
                    reply = Some((reply_tx, outcome));
                    status
                }
                // The owning handle is gone.
                Err(_) => {
                    let _ = child.kill().await;
                    child.wait().await
                }
            }
        }
    };
    drop(stdin);

    let mut reader = ctx.reader;
    if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut reader).await.is_err() {
        reader.abort();
    }

    let last_error = ctx.error_tail.lock().back().cloned();
    let info = match status {
        Ok(status) => ExitInfo {
            code: status.code(),
            detail: last_error.unwrap_or_else(|| status.to_string()),
        },
        Err(e) => ExitInfo {
            code: None,
            detail: format!("failed to wait for ffmpeg: {e}"),
        },
    };

    debug!(destination = %destination_id, code = ?info.code, "ffmpeg exited");
    exit_tx.send_replace(Some(info));

    if let Some((reply_tx, outcome)) = reply {
        let _ = reply_tx.send(outcome);
    }
}

async fn stop_child(
    child: &mut Child,
    stdin: Option<ChildStdin>,
    grace: Duration,
    destination_id: &str,
) -> (std::io::Result<std::process::ExitStatus>, TerminationOutcome) {
    // ffmpeg finishes the output cleanly on 'q'.
    if let Some(mut stdin) = stdin {
        let _ = stdin.write_all(b"q").await;
        let _ = stdin.flush().await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => (status, TerminationOutcome::Graceful),
        Err(_) => {
            let err = Error::TerminationTimeout {
                destination: destination_id.to_string(),
                grace,
            };
            warn!(destination = %destination_id, "{}, killing", err);
            let _ = child.kill().await;
            (child.wait().await, TerminationOutcome::Forced)
        }
    }
}

/// A running ffmpeg process.
pub struct FfmpegProcess {
    pid: Option<u32>,
    progress_rx: watch::Receiver<ProgressSample>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    stop_tx: Option<oneshot::Sender<StopRequest>>,
    waiter: Option<JoinHandle<()>>,
}

impl FfmpegProcess {
    async fn join_waiter(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.await;
        }
    }
}

#[async_trait]
impl EncoderProcess for FfmpegProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn progress(&self) -> ProgressSample {
        self.progress_rx.borrow().clone()
    }

    fn exit_status(&self) -> Option<ExitInfo> {
        self.exit_rx.borrow().clone()
    }

    async fn wait(&mut self) -> ExitInfo {
        self.join_waiter().await;
        self.exit_rx.borrow().clone().unwrap_or_else(|| ExitInfo {
            code: None,
            detail: "ffmpeg waiter task ended unexpectedly".to_string(),
        })
    }

    async fn terminate(&mut self, grace: Duration) -> TerminationOutcome {
        if self.exit_rx.borrow().is_some() {
            self.join_waiter().await;
            return TerminationOutcome::AlreadyExited;
        }

        let outcome = match self.stop_tx.take() {
            Some(stop_tx) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                match stop_tx.send(StopRequest {
                    grace,
                    reply: reply_tx,
                }) {
                    // Dropped reply: the process exited before the request arrived.
                    Ok(()) => reply_rx.await.unwrap_or(TerminationOutcome::AlreadyExited),
                    Err(_) => TerminationOutcome::AlreadyExited,
                }
            }
            None => TerminationOutcome::AlreadyExited,
        };

        self.join_waiter().await;
        outcome
    }
}
