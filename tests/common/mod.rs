//! Shared fixtures: an in-memory `RemoteExecutor` with virtual per-host
//! file trees and scripted health probes, plus state wiring for the engine.

// not every test binary touches every fixture
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use codeb::configuration::Settings;
use codeb::errors::Result;
use codeb::helpers::ssh::{CmdOutput, RemoteExecutor};
use codeb::startup::{build_state_with_executor, AppState};

pub const APP_HOST: &str = "app.test";
pub const STREAMING_HOST: &str = "stream.test";
pub const STORAGE_HOST: &str = "store.test";
pub const BACKUP_HOST: &str = "backup.test";

type FileTree = HashMap<String, String>;

/// In-memory stand-in for the managed hosts.
///
/// File helpers operate on per-host virtual trees; `exec` records every
/// command, answers health probes from a scripted port table, and
/// interprets the `mv` used by the registry's atomic replace. Everything
/// else succeeds silently.
#[derive(Default)]
pub struct FakeExecutor {
    files: Mutex<HashMap<String, FileTree>>,
    commands: Mutex<Vec<(String, String)>>,
    health: Mutex<HashMap<u16, String>>,
    exec_delay: Option<Duration>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slow every exec down so concurrent operations actually overlap.
    pub fn with_exec_delay(delay: Duration) -> Self {
        Self {
            exec_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_health(&self, port: u16, code: &str) {
        self.health.lock().unwrap().insert(port, code.to_string());
    }

    pub fn file(&self, host: &str, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(host)
            .and_then(|tree| tree.get(path))
            .cloned()
    }

    pub fn put_file(&self, host: &str, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .insert(path.to_string(), content.to_string());
    }

    pub fn file_names_under(&self, host: &str, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir);
        self.files
            .lock()
            .unwrap()
            .get(host)
            .map(|tree| {
                tree.keys()
                    .filter_map(|path| path.strip_prefix(&prefix))
                    .filter(|rest| !rest.contains('/'))
                    .map(|rest| rest.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }

    pub fn commands_matching(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|(_, c)| c.contains(needle))
            .map(|(_, c)| c)
            .collect()
    }

    fn ok(stdout: &str) -> CmdOutput {
        CmdOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            duration: Duration::from_millis(1),
        }
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn exec(&self, host: &str, command: &str, _deadline: Duration) -> Result<CmdOutput> {
        if let Some(delay) = self.exec_delay {
            tokio::time::sleep(delay).await;
        }
        self.commands
            .lock()
            .unwrap()
            .push((host.to_string(), command.to_string()));

        // health probe: answer from the scripted port table (default 200)
        if let Some(idx) = command.find("http://localhost:") {
            let rest = &command[idx + "http://localhost:".len()..];
            let port: u16 = rest
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0);
            let code = self
                .health
                .lock()
                .unwrap()
                .get(&port)
                .cloned()
                .unwrap_or_else(|| "200".to_string());
            return Ok(Self::ok(&code));
        }

        // registry's atomic replace
        if command.starts_with("mv ") {
            let parts: Vec<&str> = command.split('"').collect();
            if parts.len() >= 4 {
                let (from, to) = (parts[1].to_string(), parts[3].to_string());
                let mut files = self.files.lock().unwrap();
                let tree = files.entry(host.to_string()).or_default();
                if let Some(content) = tree.remove(&from) {
                    tree.insert(to, content);
                }
            }
        }

        // unit-file removal during cleanup/recovery
        if command.starts_with("rm -f ") {
            let parts: Vec<&str> = command.split('"').collect();
            if parts.len() >= 2 {
                let path = parts[1].to_string();
                if let Some(tree) = self.files.lock().unwrap().get_mut(host) {
                    tree.remove(&path);
                }
            }
        }

        Ok(Self::ok(""))
    }

    async fn write_file(&self, host: &str, path: &str, content: &str) -> Result<()> {
        // same trailing-newline normalization as the heredoc path
        let body = format!("{}\n", content.strip_suffix('\n').unwrap_or(content));
        self.put_file(host, path, &body);
        Ok(())
    }

    async fn append_file(&self, host: &str, path: &str, content: &str) -> Result<()> {
        let body = format!("{}\n", content.strip_suffix('\n').unwrap_or(content));
        let mut files = self.files.lock().unwrap();
        files
            .entry(host.to_string())
            .or_default()
            .entry(path.to_string())
            .or_default()
            .push_str(&body);
        Ok(())
    }

    async fn read_file(&self, host: &str, path: &str) -> Result<Option<String>> {
        Ok(self.file(host, path))
    }

    async fn file_exists(&self, host: &str, path: &str) -> Result<bool> {
        Ok(self.file(host, path).is_some())
    }

    async fn mkdirp(&self, _host: &str, _path: &str) -> Result<()> {
        Ok(())
    }

    async fn list_dir(&self, host: &str, path: &str) -> Result<Vec<String>> {
        Ok(self.file_names_under(host, path))
    }
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.hosts.app = APP_HOST.to_string();
    settings.hosts.streaming = STREAMING_HOST.to_string();
    settings.hosts.storage = STORAGE_HOST.to_string();
    settings.hosts.backup = BACKUP_HOST.to_string();
    // probes are answered synchronously by the fake; no polling budget needed
    settings.default_health_timeout = 0;
    settings
}

pub fn spawn_state(executor: Arc<FakeExecutor>) -> AppState {
    build_state_with_executor(&test_settings(), executor)
}

pub fn spawn_state_with_bus(executor: Arc<FakeExecutor>, api_url: &str) -> AppState {
    let mut settings = test_settings();
    settings.event_bus.api_url = api_url.to_string();
    build_state_with_executor(&settings, executor)
}
