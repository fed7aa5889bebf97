//! SSH executor for the managed hosts
//!
//! Every side-effect on a managed host goes through `RemoteExecutor`.
//! The production implementation uses russh with one cached connection per
//! host; tests inject an in-memory fake.

use async_trait::async_trait;
use russh::client::{Config, Handle};
use russh::keys::key::KeyPair;
use russh::Preferred;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use uuid::Uuid;

use crate::configuration::SshSettings;
use crate::errors::{Error, Result};

/// Default deadline for the file-helper commands built on `exec`;
/// `RemoteExecutor::command_timeout` overrides it per implementation.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one remote command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Abstraction over remote command execution (DIP).
///
/// Production: `SshExecutor` over pooled russh handles.
/// Tests: an in-memory fake with virtual per-host file trees.
///
/// The file helpers have default implementations in terms of `exec`, so the
/// production executor only supplies the transport. `write_file` normalizes
/// the written file to exactly one trailing newline.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn exec(&self, host: &str, command: &str, deadline: Duration) -> Result<CmdOutput>;

    /// Deadline applied to the file helpers below.
    fn command_timeout(&self) -> Duration {
        DEFAULT_COMMAND_TIMEOUT
    }

    async fn write_file(&self, host: &str, path: &str, content: &str) -> Result<()> {
        let command = heredoc_command(path, content, false);
        let output = self.exec(host, &command, self.command_timeout()).await?;
        if !output.success() {
            return Err(Error::Internal(format!(
                "writing {} on {} failed: {}",
                path,
                host,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn append_file(&self, host: &str, path: &str, content: &str) -> Result<()> {
        let command = heredoc_command(path, content, true);
        let output = self.exec(host, &command, self.command_timeout()).await?;
        if !output.success() {
            return Err(Error::Internal(format!(
                "appending to {} on {} failed: {}",
                path,
                host,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Returns `None` when the file does not exist.
    async fn read_file(&self, host: &str, path: &str) -> Result<Option<String>> {
        if !self.file_exists(host, path).await? {
            return Ok(None);
        }
        let output = self
            .exec(host, &format!("cat \"{}\"", path), self.command_timeout())
            .await?;
        if !output.success() {
            return Err(Error::Internal(format!(
                "reading {} on {} failed: {}",
                path,
                host,
                output.stderr.trim()
            )));
        }
        Ok(Some(output.stdout))
    }

    async fn file_exists(&self, host: &str, path: &str) -> Result<bool> {
        let output = self
            .exec(host, &format!("test -f \"{}\"", path), self.command_timeout())
            .await?;
        Ok(output.success())
    }

    async fn mkdirp(&self, host: &str, path: &str) -> Result<()> {
        let output = self
            .exec(host, &format!("mkdir -p \"{}\"", path), self.command_timeout())
            .await?;
        if !output.success() {
            return Err(Error::Internal(format!(
                "mkdir -p {} on {} failed: {}",
                path,
                host,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Entries of a directory, one name per line; empty when the directory
    /// is missing.
    async fn list_dir(&self, host: &str, path: &str) -> Result<Vec<String>> {
        let output = self
            .exec(
                host,
                &format!("ls -1 \"{}\" 2>/dev/null", path),
                self.command_timeout(),
            )
            .await?;
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(output
            .stdout
            .lines()
            .map(|l| l.to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

/// Here-document write: no SFTP channel, one round trip, unique marker per
/// call so the content can never terminate the document early.
fn heredoc_command(path: &str, content: &str, append: bool) -> String {
    let marker = format!("CODEB_EOF_{}", Uuid::new_v4().simple());
    let redirect = if append { ">>" } else { ">" };
    let body = content.strip_suffix('\n').unwrap_or(content);
    format!(
        "mkdir -p \"$(dirname \"{path}\")\" && cat {redirect} \"{path}\" <<'{marker}'\n{body}\n{marker}",
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SshExecutor — pooled russh implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ClientHandler;

#[async_trait]
impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Managed hosts are provisioned by this control plane; host key
        // verification is handled at provisioning time.
        Ok(true)
    }
}

pub struct SshExecutor {
    config: Arc<Config>,
    user: String,
    key: Arc<KeyPair>,
    connect_timeout: Duration,
    command_timeout: Duration,
    handles: Mutex<HashMap<String, Handle<ClientHandler>>>,
}

impl SshExecutor {
    pub fn from_settings(settings: &SshSettings, command_timeout_secs: u64) -> Result<Self> {
        let key_path = expand_home(&settings.private_key_path);
        let key = load_private_key(&key_path)
            .map_err(|e| Error::Internal(format!("loading SSH key {}: {}", key_path, e)))?;

        Ok(Self {
            config: Arc::new(Config {
                preferred: Preferred::DEFAULT,
                ..Default::default()
            }),
            user: settings.user.clone(),
            key: Arc::new(key),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            command_timeout: Duration::from_secs(command_timeout_secs),
            handles: Mutex::new(HashMap::new()),
        })
    }

    async fn connect(&self, host: &str) -> Result<Handle<ClientHandler>> {
        let addr = format!("{}:22", host);
        tracing::info!("Connecting to {} as {}", addr, self.user);

        let mut handle = timeout(
            self.connect_timeout,
            russh::client::connect(self.config.clone(), addr.clone(), ClientHandler),
        )
        .await
        .map_err(|_| Error::SshUnavailable {
            host: host.to_string(),
            reason: format!(
                "connection timed out after {} seconds",
                self.connect_timeout.as_secs()
            ),
        })?
        .map_err(|e| Error::SshUnavailable {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        let authenticated = handle
            .authenticate_publickey(self.user.as_str(), self.key.clone())
            .await
            .map_err(|e| Error::SshUnavailable {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        if !authenticated {
            return Err(Error::SshUnavailable {
                host: host.to_string(),
                reason: "public key authentication failed".to_string(),
            });
        }

        Ok(handle)
    }

    async fn handle_for(&self, host: &str) -> Result<Handle<ClientHandler>> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(host) {
            return Ok(handle.clone());
        }
        let handle = self.connect(host).await?;
        handles.insert(host.to_string(), handle.clone());
        Ok(handle)
    }

    async fn drop_handle(&self, host: &str) {
        self.handles.lock().await.remove(host);
    }
}

/// Parse a PEM-encoded private key (OpenSSH or traditional formats).
fn load_private_key(path: &str) -> std::result::Result<KeyPair, anyhow::Error> {
    let pem = std::fs::read_to_string(path)?;
    let key = russh::keys::decode_secret_key(&pem, None)?;
    Ok(key)
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    async fn exec(&self, host: &str, command: &str, deadline: Duration) -> Result<CmdOutput> {
        let started = Instant::now();
        let handle = self.handle_for(host).await?;

        // A stale handle surfaces on channel open; reconnect once.
        let channel = match handle.channel_open_session().await {
            Ok(channel) => channel,
            Err(err) => {
                tracing::warn!("channel open on {} failed ({}), reconnecting", host, err);
                self.drop_handle(host).await;
                let handle = self.handle_for(host).await?;
                handle
                    .channel_open_session()
                    .await
                    .map_err(|e| Error::SshUnavailable {
                        host: host.to_string(),
                        reason: e.to_string(),
                    })?
            }
        };

        let collected = timeout(deadline, run_command(channel, command)).await;

        match collected {
            Err(_) => {
                // The dropped future closes the channel; the command's stream
                // is cancelled with it.
                Err(Error::CommandTimeout {
                    command: command.to_string(),
                    seconds: deadline.as_secs(),
                })
            }
            Ok(Err(e)) => Err(Error::SshUnavailable {
                host: host.to_string(),
                reason: e.to_string(),
            }),
            Ok(Ok((stdout, stderr, exit_code))) => Ok(CmdOutput {
                stdout,
                stderr,
                exit_code,
                duration: started.elapsed(),
            }),
        }
    }
}

async fn run_command(
    mut channel: russh::Channel<russh::client::Msg>,
    command: &str,
) -> std::result::Result<(String, String, i32), russh::Error> {
    channel.exec(true, command).await?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code: Option<i32> = None;
    let mut eof = false;

    loop {
        match channel.wait().await {
            Some(russh::ChannelMsg::Data { data }) => {
                stdout.extend_from_slice(&data);
            }
            Some(russh::ChannelMsg::ExtendedData { data, ext: _ }) => {
                stderr.extend_from_slice(&data);
            }
            Some(russh::ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = Some(exit_status as i32);
                if eof {
                    break;
                }
            }
            Some(russh::ChannelMsg::Eof) => {
                eof = true;
                if exit_code.is_some() {
                    break;
                }
            }
            Some(russh::ChannelMsg::Close) | None => break,
            _ => {}
        }
    }

    let _ = channel.eof().await;
    let _ = channel.close().await;

    Ok((
        String::from_utf8_lossy(&stdout).to_string(),
        String::from_utf8_lossy(&stderr).to_string(),
        exit_code.unwrap_or(0),
    ))
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{}", home, rest);
        }
    }
    path.to_string()
}
