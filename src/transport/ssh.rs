//! SSH + SFTP session backed by `ssh2`.
//!
//! `ssh2` is blocking. Remote commands run on a blocking worker thread that
//! polls the channel in non-blocking mode, so the async side can race the
//! command against a cancellation token and ask the worker to kill the
//! remote process. Transfers are plain blocking calls.
//!
//! Host keys are not verified (no known_hosts / trust-on-first-use check).
//! The SHA-256 fingerprint is logged so it can be audited.

use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use ssh2::{Channel, ExtendedData, HashType, Session, Sftp};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::auth::AuthChain;
use super::progress::{ProgressFn, copy_with_progress};
use super::{Dialer, Endpoint, RemoteSession, TransportError, expand_tilde_with_home};

/// Marker printed before the remote shell's PID on the first output line.
const PID_MARKER: &str = "__gitsynq_pid=";
/// Sleep between non-blocking channel polls.
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long `run` waits for the worker after requesting a kill.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Dials SSH sessions.
#[derive(Debug, Clone)]
pub struct SshDialer {
    connect_timeout: Duration,
    home: Option<PathBuf>,
}

impl Default for SshDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl SshDialer {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            home: dirs::home_dir(),
        }
    }

    /// Set the TCP connect / handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn connect_tcp(&self, addr: &str) -> Result<TcpStream, TransportError> {
        let dial_err = |reason: String| TransportError::Dial {
            addr: addr.to_string(),
            reason,
        };
        let candidates: Vec<_> = addr
            .to_socket_addrs()
            .map_err(|e| dial_err(format!("failed to resolve: {e}")))?
            .collect();

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!(addr = %candidate, error = %e, "tcp connect failed");
                    last_error = Some(e);
                }
            }
        }
        Err(dial_err(match last_error {
            Some(e) => e.to_string(),
            None => "no addresses resolved".to_string(),
        }))
    }
}

impl Dialer for SshDialer {
    type Session = SshSession;

    fn dial(&self, endpoint: &Endpoint) -> Result<SshSession, TransportError> {
        let addr = endpoint.address();
        let dial_err = |reason: String| TransportError::Dial {
            addr: addr.clone(),
            reason,
        };

        let tcp = self.connect_tcp(&addr)?;
        let mut session = Session::new().map_err(|e| dial_err(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.connect_timeout.as_millis().min(u32::MAX as u128) as u32);
        session
            .handshake()
            .map_err(|e| dial_err(format!("ssh handshake failed: {e}")))?;

        if let Some(hash) = session.host_key_hash(HashType::Sha256) {
            let fingerprint: String = hash.iter().map(|b| format!("{b:02x}")).collect();
            tracing::debug!(addr = %addr, fingerprint = %fingerprint, "host key (not verified)");
        }

        let chain = AuthChain::for_endpoint(endpoint, self.home.as_deref());
        let method = match chain.authenticate(&session, &endpoint.user) {
            Ok(method) => method.clone(),
            Err(attempts) => {
                disconnect_quietly(&session, "authentication failed");
                return Err(TransportError::Auth {
                    user: endpoint.user.clone(),
                    host: endpoint.host.clone(),
                    attempts,
                });
            }
        };

        // Both channels or nothing: a session without SFTP is a failed session.
        let sftp = match session.sftp() {
            Ok(sftp) => sftp,
            Err(e) => {
                disconnect_quietly(&session, "sftp unavailable");
                return Err(TransportError::Channel(format!(
                    "failed to initialize SFTP: {e}"
                )));
            }
        };
        session.set_timeout(0);

        tracing::info!(
            target = %endpoint.display_target(),
            port = endpoint.port,
            method = %method,
            "ssh session established"
        );
        Ok(SshSession {
            session: Some(session),
            sftp: Some(sftp),
            addr,
        })
    }
}

/// An authenticated SSH connection with its SFTP channel.
///
/// Released by [`RemoteSession::close`]; dropping an open session disconnects it.
pub struct SshSession {
    session: Option<Session>,
    sftp: Option<Sftp>,
    addr: String,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("addr", &self.addr)
            .field("open", &self.session.is_some())
            .finish()
    }
}

impl SshSession {
    fn session(&self) -> Result<&Session, TransportError> {
        self.session
            .as_ref()
            .ok_or_else(|| TransportError::Channel("session already closed".to_string()))
    }

    fn sftp(&self) -> Result<&Sftp, TransportError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| TransportError::Channel("sftp channel already closed".to_string()))
    }
}

impl RemoteSession for SshSession {
    async fn run(
        &mut self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<String, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let session = self.session()?.clone();
        let command = command.to_string();
        let (kill_tx, kill_rx) = oneshot::channel();

        let mut worker =
            tokio::task::spawn_blocking(move || exec_blocking(&session, &command, kill_rx));

        tokio::select! {
            joined = &mut worker => match joined {
                Ok(result) => result,
                Err(e) => Err(TransportError::Channel(format!("command worker failed: {e}"))),
            },
            _ = cancel.cancelled() => {
                if kill_tx.send(()).is_err() {
                    tracing::debug!("command finished before kill request");
                }
                if tokio::time::timeout(KILL_GRACE, worker).await.is_err() {
                    tracing::warn!(addr = %self.addr, "remote command did not stop within grace period");
                }
                Err(TransportError::Cancelled)
            }
        }
    }

    fn upload(
        &mut self,
        local: &Path,
        remote: &str,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, TransportError> {
        let sftp = self.sftp()?;
        let transfer_err = |source: io::Error| TransportError::Transfer {
            path: local.display().to_string(),
            source,
        };

        let mut file = std::fs::File::open(local).map_err(transfer_err)?;
        let total = file.metadata().map_err(transfer_err)?.len();

        let remote_path = Path::new(remote);
        if let Some(parent) = remote_path.parent() {
            sftp_mkdir_all(sftp, parent).map_err(|e| transfer_err(e.into()))?;
        }
        let mut remote_file = sftp
            .create(remote_path)
            .map_err(|e| transfer_err(e.into()))?;

        let written =
            copy_with_progress(&mut file, &mut remote_file, total, on_progress).map_err(transfer_err)?;
        tracing::debug!(local = %local.display(), remote = %remote, bytes = written, "upload complete");
        Ok(written)
    }

    fn download(
        &mut self,
        remote: &str,
        local: &Path,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, TransportError> {
        let sftp = self.sftp()?;
        let transfer_err = |source: io::Error| TransportError::Transfer {
            path: remote.to_string(),
            source,
        };

        let mut remote_file = sftp
            .open(Path::new(remote))
            .map_err(|e| transfer_err(e.into()))?;
        let total = remote_file
            .stat()
            .map_err(|e| transfer_err(e.into()))?
            .size
            .unwrap_or(0);

        if let Some(parent) = local.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(transfer_err)?;
        }
        let mut file = std::fs::File::create(local).map_err(transfer_err)?;

        let read =
            copy_with_progress(&mut remote_file, &mut file, total, on_progress).map_err(transfer_err)?;
        tracing::debug!(remote = %remote, local = %local.display(), bytes = read, "download complete");
        Ok(read)
    }

    fn expand_remote_path(&mut self, path: &str) -> Result<String, TransportError> {
        if !path.starts_with('~') {
            return Ok(path.to_string());
        }
        // The SFTP server resolves "." to the login directory.
        let home = self
            .sftp()?
            .realpath(Path::new("."))
            .map_err(|e| TransportError::Channel(format!("failed to resolve remote home: {e}")))?;
        let home = home.to_string_lossy();
        tracing::debug!(addr = %self.addr, remote_home = %home, "got remote home directory");
        Ok(expand_tilde_with_home(path, Some(&home)))
    }

    fn remove_remote_file(&mut self, path: &str) -> Result<(), TransportError> {
        self.sftp()?
            .unlink(Path::new(path))
            .map_err(|e| TransportError::Transfer {
                path: path.to_string(),
                source: e.into(),
            })
    }

    fn close(mut self) -> Result<(), TransportError> {
        let mut errors = Vec::new();
        // Drop the SFTP channel before the session it runs on.
        drop(self.sftp.take());
        if let Some(session) = self.session.take()
            && let Err(e) = session.disconnect(None, "gitsynq done", None)
        {
            errors.push(format!("ssh disconnect: {e}"));
        }
        tracing::debug!(addr = %self.addr, "ssh session closed");
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransportError::Close(errors))
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        drop(self.sftp.take());
        if let Some(session) = self.session.take() {
            tracing::debug!(addr = %self.addr, "releasing ssh session on drop");
            disconnect_quietly(&session, "gitsynq aborted");
        }
    }
}

fn disconnect_quietly(session: &Session, reason: &str) {
    if let Err(e) = session.disconnect(None, reason, None) {
        tracing::warn!(error = %e, "ssh disconnect failed");
    }
}

/// Create `dir` and any missing ancestors over SFTP.
fn sftp_mkdir_all(sftp: &Sftp, dir: &Path) -> Result<(), ssh2::Error> {
    let mut current = PathBuf::new();
    for component in dir.components() {
        current.push(component);
        if matches!(component, Component::RootDir | Component::CurDir) {
            continue;
        }
        if sftp.stat(&current).is_ok() {
            continue;
        }
        if let Err(e) = sftp.mkdir(&current, 0o755) {
            // Lost a race with another creator: fine as long as it exists now.
            if sftp.stat(&current).is_err() {
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Wrap a command so the remote shell announces its PID before running it.
///
/// The user's login shell may not be POSIX, so everything runs under `sh`.
pub fn wrap_command(command: &str) -> String {
    let inner = format!("echo {PID_MARKER}$$; exec sh -c \"$1\"");
    format!(
        "sh -c {} gitsynq {}",
        shell_words::quote(&inner),
        shell_words::quote(command)
    )
}

/// Split the PID announcement off the captured output.
pub fn split_pid_line(output: &[u8]) -> (Option<u32>, &[u8]) {
    let Some(rest) = output.strip_prefix(PID_MARKER.as_bytes()) else {
        return (None, output);
    };
    let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
        return (None, output);
    };
    let pid = std::str::from_utf8(&rest[..newline])
        .ok()
        .and_then(|s| s.trim().parse().ok());
    (pid, &rest[newline + 1..])
}

enum ReadOutcome {
    Finished(Vec<u8>),
    KillRequested(Vec<u8>),
}

/// Worker body: execute, stream output, honour kill requests.
fn exec_blocking(
    session: &Session,
    command: &str,
    mut kill_rx: oneshot::Receiver<()>,
) -> Result<String, TransportError> {
    let channel_err = |e: ssh2::Error| TransportError::Channel(e.to_string());

    let mut channel = session.channel_session().map_err(channel_err)?;
    channel
        .handle_extended_data(ExtendedData::Merge)
        .map_err(channel_err)?;
    channel.exec(&wrap_command(command)).map_err(channel_err)?;

    session.set_blocking(false);
    let outcome = read_until_eof(&mut channel, &mut kill_rx);
    session.set_blocking(true);

    let buffer = match outcome {
        Ok(ReadOutcome::Finished(buffer)) => buffer,
        Ok(ReadOutcome::KillRequested(buffer)) => {
            let (pid, _) = split_pid_line(&buffer);
            kill_remote(session, pid);
            if let Err(e) = channel.close() {
                tracing::debug!(error = %e, "closing cancelled channel failed");
            }
            return Err(TransportError::Cancelled);
        }
        Err(e) => return Err(TransportError::Channel(format!("reading command output: {e}"))),
    };

    channel.wait_close().map_err(channel_err)?;
    let status = channel.exit_status().map_err(channel_err)?;
    let (_, output) = split_pid_line(&buffer);
    let output = String::from_utf8_lossy(output).into_owned();

    if status == 0 {
        Ok(output)
    } else {
        tracing::debug!(status, "remote command failed");
        Err(TransportError::RemoteCommand { status, output })
    }
}

fn read_until_eof(
    channel: &mut Channel,
    kill_rx: &mut oneshot::Receiver<()>,
) -> io::Result<ReadOutcome> {
    let mut output = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match channel.read(&mut buf) {
            Ok(0) => return Ok(ReadOutcome::Finished(output)),
            Ok(n) => output.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // A dropped sender means the caller went away: kill as well.
                match kill_rx.try_recv() {
                    Err(oneshot::error::TryRecvError::Empty) => std::thread::sleep(POLL_INTERVAL),
                    _ => return Ok(ReadOutcome::KillRequested(output)),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Shell command that force-kills a wrapped command's shell and its children.
pub fn kill_command(pid: u32) -> String {
    format!("pkill -KILL -P {pid} 2>/dev/null; kill -KILL {pid} 2>/dev/null; true")
}

/// Kill the remote shell and its children from a second channel.
fn kill_remote(session: &Session, pid: Option<u32>) {
    let Some(pid) = pid else {
        tracing::warn!("remote pid unknown; closing channel without kill");
        return;
    };
    let result = session.channel_session().and_then(|mut ch| {
        ch.exec(&kill_command(pid))?;
        let mut sink = String::new();
        if let Err(e) = ch.read_to_string(&mut sink) {
            tracing::debug!(error = %e, "reading kill output failed");
        }
        ch.wait_close()
    });
    match result {
        Ok(()) => tracing::info!(pid, "killed cancelled remote command"),
        Err(e) => tracing::warn!(pid, error = %e, "failed to kill remote command"),
    }
}
