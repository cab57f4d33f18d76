#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use gitsynq::config::Config;
use gitsynq::transport::{
    Dialer, Endpoint, ProgressFn, RemoteSession, TransportError, copy_with_progress,
    expand_tilde_with_home, kill_command, split_pid_line, wrap_command,
};
use gitsynq::ui::Reporter;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Tests that shell out to git skip themselves when it is missing.
pub fn git_available() -> bool {
    which::which("git").is_ok()
}

/// Run git with a fixed identity; panics on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=gitsynq test",
            "-c",
            "user.email=test@gitsynq.invalid",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}{}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn init_repo(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q", "-b", "main"]);
}

pub fn commit(dir: &Path, file: &str, content: &str, message: &str) -> String {
    std::fs::write(dir.join(file), content).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", message]);
    head(dir)
}

pub fn head(dir: &Path) -> String {
    git(dir, &["rev-parse", "HEAD"])
}

/// Pretend `origin/<branch>` has been fetched at the current HEAD.
pub fn mark_tracking(dir: &Path, branch: &str) {
    let reference = format!("refs/remotes/origin/{branch}");
    git(dir, &["update-ref", &reference, "HEAD"]);
}

pub fn bundles_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "bundle"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(unix)]
pub fn install_hook(project: &Path, name: &str, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    let dir = project.join(gitsynq::hooks::HOOKS_DIR);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
}

/// A local project, a fake remote host directory, and a config tying them together.
pub struct Fixture {
    tmp: TempDir,
    pub project: PathBuf,
    pub remote_root: PathBuf,
    pub config: Config,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("work");
        let remote_root = tmp.path().join("remote-host").join("gitsynq");
        init_repo(&project);

        let mut config = Config::new("localhost", "tester", "proj");
        config.server.remote_path = remote_root.to_string_lossy().into_owned();
        config.bundle.directory = tmp.path().join("bundles");
        Self {
            tmp,
            project,
            remote_root,
            config,
        }
    }

    /// Scratch root; doubles as the fake remote home.
    pub fn home(&self) -> &Path {
        self.tmp.path()
    }

    pub fn dialer(&self) -> LocalDialer {
        LocalDialer::new(self.home())
    }

    /// Working copy the remote side reconciles into.
    pub fn remote_repo(&self) -> PathBuf {
        self.remote_root.join(&self.config.project.name)
    }

    pub fn bundle_dir(&self) -> &Path {
        &self.config.bundle.directory
    }
}

/// Session counters shared between a dialer and the sessions it hands out.
#[derive(Debug, Default)]
pub struct Counters {
    pub dials: AtomicUsize,
    pub closes: AtomicUsize,
    pub commands: AtomicUsize,
}

impl Counters {
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }
}

/// Dials "remote" sessions that run on this machine.
pub struct LocalDialer {
    pub home: PathBuf,
    pub refuse: bool,
    pub counters: Arc<Counters>,
}

impl LocalDialer {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            refuse: false,
            counters: Arc::default(),
        }
    }

    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }
}

impl Dialer for LocalDialer {
    type Session = LocalSession;

    fn dial(&self, endpoint: &Endpoint) -> Result<LocalSession, TransportError> {
        self.counters.dials.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(TransportError::Dial {
                addr: endpoint.address(),
                reason: "connection refused".into(),
            });
        }
        Ok(LocalSession {
            home: self.home.clone(),
            counters: Arc::clone(&self.counters),
        })
    }
}

/// Commands through `sh -c`, transfers through the local filesystem.
pub struct LocalSession {
    home: PathBuf,
    counters: Arc<Counters>,
}

impl LocalSession {
    fn copy(
        from: &Path,
        to: &Path,
        error_path: &str,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, TransportError> {
        let transfer_err = |source: std::io::Error| TransportError::Transfer {
            path: error_path.to_string(),
            source,
        };
        let mut src = std::fs::File::open(from).map_err(transfer_err)?;
        let total = src.metadata().map_err(transfer_err)?.len();
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(transfer_err)?;
        }
        let mut dst = std::fs::File::create(to).map_err(transfer_err)?;
        copy_with_progress(&mut src, &mut dst, total, on_progress).map_err(transfer_err)
    }
}

impl RemoteSession for LocalSession {
    async fn run(
        &mut self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<String, TransportError> {
        use tokio::io::{AsyncBufReadExt, BufReader};

        self.counters.commands.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let channel_err = |e: std::io::Error| TransportError::Channel(e.to_string());
        // Same wrapping and kill path the ssh session uses, with `sh` as login shell.
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(wrap_command(command))
            .current_dir(&self.home)
            .env("GIT_AUTHOR_NAME", "gitsynq remote")
            .env("GIT_AUTHOR_EMAIL", "remote@gitsynq.invalid")
            .env("GIT_COMMITTER_NAME", "gitsynq remote")
            .env("GIT_COMMITTER_EMAIL", "remote@gitsynq.invalid")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(channel_err)?;

        let mut stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
        let mut stderr = child.stderr.take().expect("piped stderr");
        let mut announce = String::new();
        stdout.read_line(&mut announce).await.map_err(channel_err)?;
        let (pid, _) = split_pid_line(announce.as_bytes());

        tokio::select! {
            finished = collect_output(&mut child, &mut stdout, &mut stderr) => {
                let (status, text) = finished.map_err(channel_err)?;
                match status.code() {
                    Some(0) => Ok(text),
                    Some(status) => Err(TransportError::RemoteCommand { status, output: text }),
                    None => Err(TransportError::RemoteCommand { status: -1, output: text }),
                }
            }
            _ = cancel.cancelled() => {
                if let Some(pid) = pid {
                    tokio::process::Command::new("sh")
                        .arg("-c")
                        .arg(kill_command(pid))
                        .status()
                        .await
                        .map_err(channel_err)?;
                }
                child.wait().await.map_err(channel_err)?;
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
        Self::copy(local, Path::new(remote), &local.display().to_string(), on_progress)
    }

    fn download(
        &mut self,
        remote: &str,
        local: &Path,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, TransportError> {
        Self::copy(Path::new(remote), local, remote, on_progress)
    }

    fn expand_remote_path(&mut self, path: &str) -> Result<String, TransportError> {
        Ok(expand_tilde_with_home(path, Some(&self.home.to_string_lossy())))
    }

    fn remove_remote_file(&mut self, path: &str) -> Result<(), TransportError> {
        std::fs::remove_file(path).map_err(|source| TransportError::Transfer {
            path: path.to_string(),
            source,
        })
    }

    fn close(self) -> Result<(), TransportError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn collect_output(
    child: &mut tokio::process::Child,
    stdout: &mut (impl tokio::io::AsyncRead + Unpin),
    stderr: &mut (impl tokio::io::AsyncRead + Unpin),
) -> std::io::Result<(std::process::ExitStatus, String)> {
    use tokio::io::AsyncReadExt;

    let mut out = Vec::new();
    let mut err = Vec::new();
    let (read_out, read_err) =
        tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
    read_out?;
    read_err?;
    let status = child.wait().await?;
    let mut text = String::from_utf8_lossy(&out).into_owned();
    text.push_str(&String::from_utf8_lossy(&err));
    Ok((status, text))
}

/// `/proc` view of a pid: gone and zombie both count as dead.
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .is_some_and(|(_, rest)| !rest.trim_start().starts_with('Z')),
        Err(_) => false,
    }
}

/// Records everything the pipeline reports.
#[derive(Default)]
pub struct CapturingReporter {
    pub lines: Mutex<Vec<String>>,
    pub warnings: Mutex<Vec<String>>,
    pub progress: Mutex<Vec<(u64, u64)>>,
}

impl CapturingReporter {
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    pub fn progress(&self) -> Vec<(u64, u64)> {
        self.progress.lock().clone()
    }
}

impl Reporter for CapturingReporter {
    fn step(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }

    fn success(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }

    fn warn(&self, message: &str) {
        self.warnings.lock().push(message.to_string());
    }

    fn info(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }

    fn transfer_started(&self, label: &str, _total: u64) {
        self.lines.lock().push(label.to_string());
        self.progress.lock().clear();
    }

    fn transfer_progress(&self, transferred: u64, total: u64) {
        self.progress.lock().push((transferred, total));
    }

    fn transfer_finished(&self) {}
}

/// Cancels the token as soon as a reported line starts with `on_prefix`.
pub struct CancellingReporter {
    pub inner: CapturingReporter,
    pub cancel: CancellationToken,
    pub on_prefix: &'static str,
}

impl CancellingReporter {
    fn check(&self, message: &str) {
        if message.starts_with(self.on_prefix) {
            self.cancel.cancel();
        }
    }
}

impl Reporter for CancellingReporter {
    fn step(&self, message: &str) {
        self.check(message);
        self.inner.step(message);
    }

    fn success(&self, message: &str) {
        self.check(message);
        self.inner.success(message);
    }

    fn warn(&self, message: &str) {
        self.inner.warn(message);
    }

    fn info(&self, message: &str) {
        self.inner.info(message);
    }

    fn transfer_started(&self, label: &str, total: u64) {
        self.inner.transfer_started(label, total);
    }

    fn transfer_progress(&self, transferred: u64, total: u64) {
        self.inner.transfer_progress(transferred, total);
    }

    fn transfer_finished(&self) {
        self.inner.transfer_finished();
    }
}
