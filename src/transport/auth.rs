//! Ordered SSH authentication fallback.
//!
//! Methods are tried in a fixed order and evaluation stops at the first one
//! the server accepts:
//!
//! 1. the explicitly configured key file
//! 2. `~/.ssh/id_ed25519`, `~/.ssh/id_rsa`, `~/.ssh/id_ecdsa`
//! 3. the running ssh-agent
//!
//! Key files are only touched when their turn comes, so a missing or bad
//! explicit key simply falls through to the defaults.

use std::fmt;
use std::path::{Path, PathBuf};

use super::Endpoint;

/// Default key file names under `~/.ssh`, in priority order.
pub const DEFAULT_KEY_NAMES: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];

/// One way of proving identity to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Key from configuration.
    ConfiguredKey(PathBuf),
    /// Conventional key under `~/.ssh`.
    DefaultKey(PathBuf),
    /// Identities held by ssh-agent.
    Agent,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfiguredKey(p) => write!(f, "configured key {}", p.display()),
            Self::DefaultKey(p) => write!(f, "default key {}", p.display()),
            Self::Agent => write!(f, "ssh-agent"),
        }
    }
}

/// Something that can attempt authentication: a live SSH session, or a fake in tests.
pub trait Authenticator {
    fn try_key_file(&self, user: &str, private_key: &Path) -> Result<(), String>;
    fn try_agent(&self, user: &str) -> Result<(), String>;
}

/// Ordered list of authentication methods for one endpoint.
#[derive(Debug, Clone)]
pub struct AuthChain {
    methods: Vec<AuthMethod>,
}

impl AuthChain {
    /// Build the chain for `endpoint`. `home` is the local home directory used
    /// to locate default keys; without it only the configured key and the
    /// agent are tried.
    pub fn for_endpoint(endpoint: &Endpoint, home: Option<&Path>) -> Self {
        let mut methods = Vec::new();
        if let Some(key) = &endpoint.key_path {
            methods.push(AuthMethod::ConfiguredKey(key.clone()));
        }
        if let Some(home) = home {
            let ssh_dir = home.join(".ssh");
            for name in DEFAULT_KEY_NAMES {
                let path = ssh_dir.join(name);
                // The configured key may already be one of the defaults.
                if endpoint.key_path.as_deref() != Some(path.as_path()) {
                    methods.push(AuthMethod::DefaultKey(path));
                }
            }
        }
        methods.push(AuthMethod::Agent);
        Self { methods }
    }

    pub fn methods(&self) -> &[AuthMethod] {
        &self.methods
    }

    /// Try each method in order; return the first that succeeds.
    ///
    /// On failure, returns one description per method attempted or skipped.
    pub fn authenticate<A: Authenticator>(
        &self,
        target: &A,
        user: &str,
    ) -> Result<&AuthMethod, Vec<String>> {
        let mut attempts = Vec::new();
        for method in &self.methods {
            let result = match method {
                AuthMethod::ConfiguredKey(path) | AuthMethod::DefaultKey(path) => {
                    if !path.is_file() {
                        // Missing default keys are the common case; only note configured ones.
                        if matches!(method, AuthMethod::ConfiguredKey(_)) {
                            attempts.push(format!("{method}: not found"));
                        }
                        continue;
                    }
                    target.try_key_file(user, path)
                }
                AuthMethod::Agent => target.try_agent(user),
            };
            match result {
                Ok(()) => {
                    tracing::debug!(method = %method, user = %user, "authenticated");
                    return Ok(method);
                }
                Err(reason) => {
                    tracing::debug!(method = %method, reason = %reason, "authentication method rejected");
                    attempts.push(format!("{method}: {reason}"));
                }
            }
        }
        if attempts.is_empty() {
            attempts.push("no authentication methods available".to_string());
        }
        Err(attempts)
    }
}

impl Authenticator for ssh2::Session {
    fn try_key_file(&self, user: &str, private_key: &Path) -> Result<(), String> {
        self.userauth_pubkey_file(user, None, private_key, None)
            .map_err(|e| e.to_string())?;
        if self.authenticated() {
            Ok(())
        } else {
            Err("key rejected".to_string())
        }
    }

    fn try_agent(&self, user: &str) -> Result<(), String> {
        let mut agent = self.agent().map_err(|e| e.to_string())?;
        agent
            .connect()
            .map_err(|e| format!("agent unavailable: {e}"))?;
        let result = (|| {
            agent.list_identities().map_err(|e| e.to_string())?;
            let identities = agent.identities().map_err(|e| e.to_string())?;
            if identities.is_empty() {
                return Err("agent holds no identities".to_string());
            }
            for identity in &identities {
                if agent.userauth(user, identity).is_ok() && self.authenticated() {
                    return Ok(());
                }
            }
            Err(format!(
                "none of {} agent identities accepted",
                identities.len()
            ))
        })();
        if let Err(e) = agent.disconnect() {
            tracing::debug!(error = %e, "failed to disconnect from ssh-agent");
        }
        result
    }
}
