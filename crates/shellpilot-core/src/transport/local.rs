//! Local shell transport.
//!
//! Runs commands through `sh -c` on the host itself. Useful without any
//! reachable server, and as the reference implementation the SSH
//! transport's directory tracking mirrors. Output is drained on reader
//! threads so a chatty command cannot deadlock on a full pipe.

use super::{CancelToken, ExecResult, SessionTransport, TransportError};
use crate::safety::split_segments;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct LocalTransport {
    current_dir: Option<String>,
    closed: bool,
    established_at: chrono::DateTime<chrono::Utc>,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTransport {
    pub fn new() -> Self {
        let current_dir = std::env::current_dir()
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        Self {
            current_dir,
            closed: false,
            established_at: chrono::Utc::now(),
        }
    }

    fn run(
        &self,
        script: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecResult, TransportError> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| TransportError::Transport(format!("spawning shell: {e}")))?;

        let stdout_reader = child.stdout.take().map(drain_thread);
        let stderr_reader = child.stderr.take().map(drain_thread);

        let started = Instant::now();
        let status = loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransportError::Cancelled);
            }
            if started.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransportError::ExecutionTimeout(timeout));
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(TransportError::Transport(e.to_string())),
            }
        };

        let stdout = stdout_reader.map(join_drain).unwrap_or_default();
        let stderr = stderr_reader.map(join_drain).unwrap_or_default();

        Ok(ExecResult {
            stdout,
            stderr,
            // Killed-by-signal processes have no code; report failure.
            exit_code: status.code().unwrap_or(-1),
            duration: started.elapsed(),
        })
    }

    fn resolve_dir(
        &self,
        target: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecResult, TransportError> {
        let probe = if target.is_empty() {
            "cd && pwd".to_string()
        } else {
            format!("cd {target} && pwd")
        };
        self.run(&probe, timeout, cancel)
    }
}

impl SessionTransport for LocalTransport {
    fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecResult, TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        log::debug!("executing locally: {command}");

        let segments = split_segments(command);
        let trailing_cd = segments.last().and_then(|s| super::ssh::cd_target(s));

        if segments.len() == 1 {
            if let Some(target) = &trailing_cd {
                let started = Instant::now();
                let probe = self.resolve_dir(target, timeout, cancel)?;
                if probe.exit_code == 0 {
                    let dir = probe.stdout.trim().to_string();
                    self.current_dir = Some(dir.clone());
                    return Ok(ExecResult {
                        stdout: format!("{dir}\n"),
                        stderr: String::new(),
                        exit_code: 0,
                        duration: started.elapsed(),
                    });
                }
                return Ok(probe);
            }
        }

        let result = self.run(command, timeout, cancel)?;

        if result.exit_code == 0 {
            if let Some(target) = &trailing_cd {
                if let Ok(probe) = self.resolve_dir(target, timeout, cancel) {
                    if probe.exit_code == 0 {
                        let dir = probe.stdout.trim();
                        if !dir.is_empty() {
                            self.current_dir = Some(dir.to_string());
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    fn session(&self) -> super::Session {
        super::Session {
            host: "localhost".to_string(),
            port: 0,
            username: std::env::var("USER").unwrap_or_else(|_| "local".to_string()),
            connected: !self.closed,
            established_at: self.established_at,
        }
    }

    fn current_dir(&self) -> Option<&str> {
        self.current_dir.as_deref()
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Drain a child pipe to completion on a background thread.
fn drain_thread<R: Read + Send + 'static>(mut reader: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_drain(handle: std::thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}
