//! Remote shell + file transfer transport.
//!
//! A [`RemoteSession`] bundles a command channel and a file-transfer channel
//! to one host under one authenticated identity. Both are opened together by
//! a [`Dialer`] and released together by [`RemoteSession::close`]. The
//! production implementation is [`ssh::SshSession`] (SSH + SFTP via `ssh2`).
//!
//! The transport knows nothing about bundles or repositories.

pub mod auth;
pub mod progress;
pub mod ssh;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use auth::{AuthChain, AuthMethod, Authenticator};
pub use progress::{ProgressFn, copy_with_progress};
pub use ssh::{SshDialer, SshSession, kill_command, split_pid_line, wrap_command};

/// Errors from the transport layer.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {reason}")]
    Dial { addr: String, reason: String },

    #[error("authentication failed for {user}@{host}: {}", .attempts.join("; "))]
    Auth {
        user: String,
        host: String,
        /// One entry per method tried, in order.
        attempts: Vec<String>,
    },

    #[error("session channel error: {0}")]
    Channel(String),

    #[error("remote command exited with status {status}")]
    RemoteCommand { status: i32, output: String },

    #[error("remote command cancelled")]
    Cancelled,

    #[error("transfer of {path} failed: {source}")]
    Transfer {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("errors closing session: {}", .0.join("; "))]
    Close(Vec<String>),
}

/// Where to connect and as whom. Read-only for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Explicitly configured private key, tried first.
    pub key_path: Option<PathBuf>,
    /// Remote root directory; may start with `~`.
    pub remote_root: String,
}

impl Endpoint {
    /// `host:port` socket address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `user@host` for display.
    pub fn display_target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// One authenticated connection to a remote host.
///
/// Sessions are owned by a single pipeline run and never shared.
#[allow(async_fn_in_trait)]
pub trait RemoteSession {
    /// Run `command` on the remote host and return its combined stdout/stderr.
    ///
    /// If `cancel` fires first, the remote process is killed and
    /// [`TransportError::Cancelled`] is returned. A non-zero exit maps to
    /// [`TransportError::RemoteCommand`] with the captured output attached.
    async fn run(
        &mut self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<String, TransportError>;

    /// Copy a local file to `remote`, creating missing remote directories.
    ///
    /// Returns bytes written. On failure the remote file must be treated as invalid.
    fn upload(
        &mut self,
        local: &Path,
        remote: &str,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, TransportError>;

    /// Copy a remote file to `local`, creating missing local directories.
    fn download(
        &mut self,
        remote: &str,
        local: &Path,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, TransportError>;

    /// Resolve a leading `~` against the remote home directory.
    fn expand_remote_path(&mut self, path: &str) -> Result<String, TransportError>;

    fn remove_remote_file(&mut self, path: &str) -> Result<(), TransportError>;

    /// Release both channels, aggregating any close-time errors.
    fn close(self) -> Result<(), TransportError>;
}

/// Opens sessions. The orchestrator is generic over this seam.
pub trait Dialer {
    type Session: RemoteSession;

    fn dial(&self, endpoint: &Endpoint) -> Result<Self::Session, TransportError>;
}

/// Expand `~` in a remote path using the provided home directory.
///
/// If `remote_home` is None, returns the path unchanged. `~user/...` is not expanded.
pub fn expand_tilde_with_home(path: &str, remote_home: Option<&str>) -> String {
    if !path.starts_with('~') {
        return path.to_string();
    }

    let Some(home) = remote_home else {
        return path.to_string();
    };

    if path == "~" {
        home.to_string()
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("{}/{}", home.trim_end_matches('/'), rest)
    } else {
        path.to_string()
    }
}

/// Join a remote directory and a child name with `/`.
pub fn remote_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}
