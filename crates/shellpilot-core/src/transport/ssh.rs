//! SSH session transport.
//!
//! Each exec request runs on a fresh channel of one authenticated session.
//! The remote shell has no memory between channels, so the working
//! directory is tracked client-side: every command is prefixed with
//! `cd <tracked dir> && `, and commands that change directory update the
//! tracked value by resolving the target with a follow-up `pwd`.

use super::{CancelToken, ExecResult, SessionTransport, TransportError};
use crate::safety::split_segments;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// How often the read loop wakes up to check cancellation and deadlines.
const POLL_INTERVAL_MS: u32 = 200;

/// How a session authenticates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Credential {
    Password(String),
    KeyFile(PathBuf),
}

/// Connection parameters for one SSH target.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub connect_timeout: Duration,
}

pub struct SshTransport {
    session: Option<ssh2::Session>,
    current_dir: Option<String>,
    host: String,
    port: u16,
    username: String,
    established_at: chrono::DateTime<chrono::Utc>,
}

impl SshTransport {
    /// Connect and authenticate. On success the initial remote working
    /// directory is resolved so relative paths behave as in a login shell.
    pub fn connect(config: &SshConfig) -> Result<Self, TransportError> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Network(format!("resolving {}: {e}", config.host)))?
            .next()
            .ok_or_else(|| {
                TransportError::Network(format!("no addresses found for {}", config.host))
            })?;

        log::info!("connecting to {}@{}:{}", config.username, config.host, config.port);
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                TransportError::Timeout(format!("{}:{}", config.host, config.port))
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let mut session =
            ssh2::Session::new().map_err(|e| TransportError::Transport(e.to_string()))?;
        session.set_tcp_stream(stream);
        session
            .handshake()
            .map_err(|e| TransportError::Network(format!("handshake failed: {e}")))?;

        match &config.credential {
            Credential::Password(password) => session
                .userauth_password(&config.username, password)
                .map_err(|e| TransportError::Auth(e.to_string()))?,
            Credential::KeyFile(path) => session
                .userauth_pubkey_file(&config.username, None, path, None)
                .map_err(|e| TransportError::Auth(e.to_string()))?,
        }
        if !session.authenticated() {
            return Err(TransportError::Auth(format!(
                "server rejected credentials for {}",
                config.username
            )));
        }

        let mut transport = Self {
            session: Some(session),
            current_dir: None,
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            established_at: chrono::Utc::now(),
        };

        // Best effort: an unresolvable home directory is not fatal.
        let cancel = CancelToken::new();
        if let Ok(result) = transport.run_raw("pwd", Duration::from_secs(10), &cancel) {
            if result.exit_code == 0 {
                let dir = result.stdout.trim();
                if !dir.is_empty() {
                    transport.current_dir = Some(dir.to_string());
                }
            }
        }

        log::info!("session established with {}", config.host);
        Ok(transport)
    }

    /// Run `script` verbatim on a fresh channel, streaming stdout and
    /// stderr until the channel reaches EOF, the deadline passes, or the
    /// token is cancelled.
    fn run_raw(
        &self,
        script: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecResult, TransportError> {
        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;

        let mut channel = session
            .channel_session()
            .map_err(|e| TransportError::Transport(e.to_string()))?;
        channel
            .exec(script)
            .map_err(|e| TransportError::Transport(e.to_string()))?;

        // Short read timeouts turn the blocking reads into a poll loop.
        session.set_timeout(POLL_INTERVAL_MS);
        let started = Instant::now();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut buf = [0u8; 8192];

        let outcome = loop {
            if cancel.is_cancelled() {
                let _ = channel.close();
                break Err(TransportError::Cancelled);
            }
            if started.elapsed() >= timeout {
                let _ = channel.close();
                break Err(TransportError::ExecutionTimeout(timeout));
            }

            let mut progressed = false;
            match channel.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    stdout.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if is_poll_tick(&e) => {}
                Err(e) => break Err(TransportError::Transport(e.to_string())),
            }
            match channel.stderr().read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    stderr.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if is_poll_tick(&e) => {}
                Err(e) => break Err(TransportError::Transport(e.to_string())),
            }

            if channel.eof() && !progressed {
                break Ok(());
            }
        };

        // wait_close gets its own bounded timeout so a wedged channel
        // cannot hang the session forever.
        session.set_timeout(5_000);
        let _ = channel.wait_close();
        let close_result = outcome.and_then(|()| {
            channel
                .exit_status()
                .map_err(|e| TransportError::Transport(e.to_string()))
        });
        session.set_timeout(0);

        let exit_code = close_result?;
        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            duration: started.elapsed(),
        })
    }

    /// Prefix `command` with a `cd` into the tracked directory.
    fn contextualize(&self, command: &str) -> Result<String, TransportError> {
        match &self.current_dir {
            Some(dir) => Ok(format!("cd {} && {}", quote_path(dir)?, command)),
            None => Ok(command.to_string()),
        }
    }

    /// Resolve where `cd <target>` lands from the tracked directory,
    /// without running anything else.
    fn resolve_dir(
        &self,
        target: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecResult, TransportError> {
        // The target is left unquoted so `~` and `$HOME` expand remotely.
        let probe = if target.is_empty() {
            "cd && pwd".to_string()
        } else {
            format!("cd {target} && pwd")
        };
        let script = match &self.current_dir {
            Some(dir) => format!("cd {} && {}", quote_path(dir)?, probe),
            None => probe,
        };
        self.run_raw(&script, timeout, cancel)
    }
}

impl SessionTransport for SshTransport {
    fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecResult, TransportError> {
        if self.session.is_none() {
            return Err(TransportError::NotConnected);
        }
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        log::debug!("executing on {}: {}", self.host, command);

        let segments = split_segments(command);
        let trailing_cd = segments.last().and_then(|s| cd_target(s));

        // A lone `cd` only moves the tracked directory.
        if segments.len() == 1 {
            if let Some(target) = &trailing_cd {
                let started = Instant::now();
                let probe = self.resolve_dir(target, timeout, cancel)?;
                if probe.exit_code == 0 {
                    let dir = probe.stdout.trim().to_string();
                    log::debug!("working directory is now {dir}");
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

        let script = self.contextualize(command)?;
        let result = self.run_raw(&script, timeout, cancel)?;

        // A chain ending in `cd` moves the directory only if it succeeded.
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
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            connected: self.session.is_some(),
            established_at: self.established_at,
        }
    }

    fn current_dir(&self) -> Option<&str> {
        self.current_dir.as_deref()
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            log::info!("closing session with {}", self.host);
            let _ = session.disconnect(None, "session closed", None);
        }
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Extract the target of a `cd` segment, if the segment is one.
/// Returns an empty string for a bare `cd`.
pub(super) fn cd_target(segment: &str) -> Option<String> {
    let trimmed = segment.trim();
    if trimmed == "cd" {
        return Some(String::new());
    }
    trimmed.strip_prefix("cd ").map(|t| t.trim().to_string())
}

fn quote_path(path: &str) -> Result<std::borrow::Cow<'_, str>, TransportError> {
    shlex::try_quote(path)
        .map_err(|_| TransportError::Transport("tracked directory contains a NUL byte".to_string()))
}

/// Reads against a session timeout surface as TimedOut; a non-blocking
/// tick surfaces as WouldBlock. Both just mean "nothing yet".
fn is_poll_tick(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}
