//! Command transport against an interactive shell child process.
//!
//! One child process per transport, driven over piped stdin/stdout. A
//! dedicated reader thread forwards stdout lines over a channel so the
//! caller can enforce a wall-clock deadline with `recv_timeout` instead of
//! blocking on the pipe.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::script::{self, BEGIN_MARKER, END_MARKER, FAILURE_TOKEN, SUCCESS_TOKEN};

/// Raw captured output of one framed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Lines between the begin and end markers, joined with `\n`.
    pub text: String,
    /// Success token from the end-marker line.
    pub success: bool,
}

/// Runs sentinel-framed commands against one shell process.
///
/// The seam for tests: sessions and the pool are exercised with scripted
/// mock transports instead of a live child process.
pub trait CommandTransport: Send {
    /// Execute `command`, serializing its result with the `render` pipeline
    /// fragment, and capture everything between the output markers.
    fn execute(&mut self, command: &str, render: &str) -> Result<Capture, TransportError>;

    /// Ask the shell to exit, then kill it if it lingers. Idempotent.
    fn terminate(&mut self);
}

/// How long `terminate` waits for a voluntary exit before killing.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Real transport speaking to a PowerShell-style interactive shell.
pub struct PowerShellTransport {
    child: Child,
    stdin: ChildStdin,
    lines: mpsc::Receiver<String>,
    timeout: Duration,
    terminated: bool,
}

impl PowerShellTransport {
    /// Spawn the shell child process and wire up the reader thread.
    pub fn start(bin: &str, args: &[String], timeout: Duration) -> Result<Self, TransportError> {
        let mut child = Command::new(bin)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(TransportError::Spawn)?;
        let stdin = child.stdin.take().ok_or(TransportError::StreamClosed)?;
        let stdout = child.stdout.take().ok_or(TransportError::StreamClosed)?;

        let (tx, rx) = mpsc::channel();
        // Never joined: the thread exits on its own when the child's stdout
        // closes or the receiver is dropped.
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        tracing::debug!(bin, "shell process started");
        Ok(Self {
            child,
            stdin,
            lines: rx,
            timeout,
            terminated: false,
        })
    }

    /// Receive one stdout line, honoring the per-command deadline.
    fn recv_line(&self, deadline: Instant) -> Result<String, TransportError> {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or(TransportError::Timeout(self.timeout))?;
        match self.lines.recv_timeout(remaining) {
            Ok(line) => Ok(line),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(TransportError::Timeout(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(TransportError::StreamClosed),
        }
    }
}

impl CommandTransport for PowerShellTransport {
    fn execute(&mut self, command: &str, render: &str) -> Result<Capture, TransportError> {
        let framed = script::frame_command(command, render);
        tracing::debug!(command, "executing framed command");
        writeln!(self.stdin, "{framed}")?;
        self.stdin.flush()?;

        let deadline = Instant::now() + self.timeout;

        // Everything before the begin marker is prompt echo and banner
        // noise; drop it.
        loop {
            if self.recv_line(deadline)?.trim_end() == BEGIN_MARKER {
                break;
            }
        }

        let mut captured: Vec<String> = Vec::new();
        loop {
            let line = self.recv_line(deadline)?;
            let trimmed = line.trim_end();
            if let Some(rest) = trimmed.strip_prefix(END_MARKER) {
                let success = match rest.trim() {
                    SUCCESS_TOKEN => true,
                    FAILURE_TOKEN => false,
                    _ => return Err(TransportError::Framing(trimmed.to_owned())),
                };
                return Ok(Capture {
                    text: captured.join("\n"),
                    success,
                });
            }
            captured.push(line);
        }
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        // Ask politely first. The shell may be mid-command and never see
        // the exit, so a kill backstops the grace period.
        let _ = writeln!(self.stdin, "Exit");
        let _ = self.stdin.flush();

        let deadline = Instant::now() + EXIT_GRACE;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(%status, "shell process exited");
                    return;
                }
                Ok(None) => thread::sleep(Duration::from_millis(50)),
                Err(_) => break,
            }
        }
        tracing::warn!("shell process ignored exit request, killing");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for PowerShellTransport {
    /// Drop must not block, so no grace period here.
    fn drop(&mut self) {
        if !self.terminated {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
