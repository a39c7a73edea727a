//! Remote and local shell execution.
//!
//! A transport owns one live shell session and runs exactly one command
//! per call. It never reconnects on its own: a broken session surfaces
//! [`TransportError::NotConnected`] and the decision to reconnect belongs
//! to the caller, so recorded history always reflects what actually ran.

pub mod local;
pub mod ssh;

pub use local::LocalTransport;
pub use ssh::{Credential, SshConfig, SshTransport};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Metadata describing one shell session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub connected: bool,
    pub established_at: DateTime<Utc>,
}

/// Outcome of one executed command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl ExecResult {
    /// stdout and stderr combined for display, stdout first.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}{}", self.stdout, self.stderr)
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection timed out: {0}")]
    Timeout(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Command execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    #[error("Command cancelled")]
    Cancelled,

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Shared cancellation flag checked at suspension points.
///
/// Cancellation is best-effort: the in-flight read loop stops and the
/// channel is torn down, but anything already dispatched to the remote
/// host has happened and is not rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Re-arm the token for a new turn. Clones share the flag, so handles
    /// held by a front end stay valid across turns.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// One authenticated shell session.
pub trait SessionTransport: Send {
    /// Execute one command. No implicit chaining: callers submit exactly
    /// the command to run, and get its captured output and exit status.
    fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecResult, TransportError>;

    /// Metadata for the session this transport owns.
    fn session(&self) -> Session;

    /// The tracked remote working directory, if known.
    fn current_dir(&self) -> Option<&str>;

    fn is_connected(&self) -> bool;

    /// Release held resources. Idempotent.
    fn close(&mut self);
}
