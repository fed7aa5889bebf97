//! Env store
//!
//! Three-tier environment configuration on the backup host
//! (`master.env`, `current.env`, `<timestamp>.env`) mirrored to the live
//! `.env.<environment>` file on the app host. Writes go backup-first so a
//! failed push leaves the backup store ahead, never behind; the next
//! successful write converges the two.

pub mod file;

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;

use crate::errors::{Error, Result};
use crate::helpers::locks::{pair_key, KeyedLocks};
use crate::helpers::secret::{make_secret, SECRET_LEN};
use crate::helpers::ssh::RemoteExecutor;
use crate::models::{Environment, HostMap, HostRole};

pub use file::EnvFile;

pub const BACKUP_ROOT: &str = "/opt/codeb/env-backup";
pub const PROJECTS_ROOT: &str = "/opt/codeb/projects";

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    pub database: bool,
    pub cache: bool,
    pub pubsub: bool,
}

pub struct EnvStore {
    executor: Arc<dyn RemoteExecutor>,
    hosts: HostMap,
    locks: KeyedLocks,
}

impl EnvStore {
    pub fn new(executor: Arc<dyn RemoteExecutor>, hosts: HostMap) -> Self {
        Self {
            executor,
            hosts,
            locks: KeyedLocks::new(),
        }
    }

    pub fn live_path(project: &str, environment: Environment) -> String {
        format!("{}/{}/.env.{}", PROJECTS_ROOT, project, environment)
    }

    pub fn backup_dir(project: &str, environment: Environment) -> String {
        format!("{}/{}/{}", BACKUP_ROOT, project, environment)
    }

    fn app_host(&self) -> &str {
        self.hosts.address(HostRole::App)
    }

    fn backup_host(&self) -> &str {
        self.hosts.address(HostRole::Backup)
    }

    pub async fn live_exists(&self, project: &str, environment: Environment) -> Result<bool> {
        self.executor
            .file_exists(self.app_host(), &Self::live_path(project, environment))
            .await
    }

    async fn read_live(&self, project: &str, environment: Environment) -> Result<EnvFile> {
        let raw = self
            .executor
            .read_file(self.app_host(), &Self::live_path(project, environment))
            .await?;
        Ok(raw.map(|c| EnvFile::parse(&c)).unwrap_or_default())
    }

    /// All live variables; empty when no live file exists yet.
    pub async fn get_all(
        &self,
        project: &str,
        environment: Environment,
    ) -> Result<IndexMap<String, String>> {
        Ok(self.read_live(project, environment).await?.vars().clone())
    }

    /// One live variable, `None` when absent.
    pub async fn get_one(
        &self,
        project: &str,
        environment: Environment,
        key: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .read_live(project, environment)
            .await?
            .get(key)
            .map(|v| v.to_string()))
    }

    #[tracing::instrument(name = "Env set.", skip(self, value))]
    pub async fn set(
        &self,
        project: &str,
        environment: Environment,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let lock_key = pair_key(project, environment);
        let _guard = self.locks.lock(&lock_key).await;

        let raw = self
            .executor
            .read_file(self.app_host(), &Self::live_path(project, environment))
            .await?;
        let mut env = raw
            .as_deref()
            .map(EnvFile::parse)
            .unwrap_or_default();
        let before = env.vars().clone();
        env.set(key, value);

        // An identical (key, value) still records a timestamped backup, but
        // current.env and the live file stay byte-identical.
        let content = match raw {
            Some(existing) if *env.vars() == before => existing,
            _ => env.render(Utc::now()),
        };
        self.write_through(project, environment, &content, Utc::now())
            .await
    }

    /// Push one serialized env document: timestamped backup, then
    /// `current.env`, then the `master.env` bootstrap, then the live file.
    async fn write_through(
        &self,
        project: &str,
        environment: Environment,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let dir = Self::backup_dir(project, environment);
        let stamp = backup_stamp(now);

        self.executor
            .write_file(self.backup_host(), &format!("{}/{}.env", dir, stamp), content)
            .await?;
        self.executor
            .write_file(self.backup_host(), &format!("{}/current.env", dir), content)
            .await?;

        let master = format!("{}/master.env", dir);
        if !self.executor.file_exists(self.backup_host(), &master).await? {
            self.executor
                .write_file(self.backup_host(), &master, content)
                .await?;
        }

        // Last step; a failure here leaves the backup store ahead of the
        // live file, which the next successful write converges.
        self.executor
            .write_file(
                self.app_host(),
                &Self::live_path(project, environment),
                content,
            )
            .await
    }

    #[tracing::instrument(name = "Env restore.", skip(self))]
    pub async fn restore(
        &self,
        project: &str,
        environment: Environment,
        version: &str,
    ) -> Result<()> {
        let lock_key = pair_key(project, environment);
        let _guard = self.locks.lock(&lock_key).await;

        let dir = Self::backup_dir(project, environment);
        let filename = match version {
            "master" => "master.env".to_string(),
            "current" => "current.env".to_string(),
            stamp => format!("{}.env", stamp),
        };

        let selected = self
            .executor
            .read_file(self.backup_host(), &format!("{}/{}", dir, filename))
            .await?
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::BackupNotFound {
                project: project.to_string(),
                environment: environment.to_string(),
                version: version.to_string(),
            })?;

        // Keep what we are about to overwrite
        let live_path = Self::live_path(project, environment);
        if let Some(live) = self.executor.read_file(self.app_host(), &live_path).await? {
            if !live.trim().is_empty() {
                let stamp = backup_stamp(Utc::now());
                self.executor
                    .write_file(
                        self.backup_host(),
                        &format!("{}/pre-restore-{}.env", dir, stamp),
                        &live,
                    )
                    .await?;
            }
        }

        self.executor
            .write_file(self.app_host(), &live_path, &selected)
            .await?;
        self.executor
            .write_file(self.backup_host(), &format!("{}/current.env", dir), &selected)
            .await
    }

    /// Backup filenames, newest first. Timestamps sort lexicographically, so
    /// a reverse name sort is reverse-chronological.
    pub async fn history(
        &self,
        project: &str,
        environment: Environment,
        limit: usize,
    ) -> Result<Vec<String>> {
        let dir = Self::backup_dir(project, environment);
        let mut files: Vec<String> = self
            .executor
            .list_dir(self.backup_host(), &dir)
            .await?
            .into_iter()
            .filter(|f| f.ends_with(".env") && f != "master.env" && f != "current.env")
            .collect();
        files.sort_by(|a, b| b.cmp(a));
        files.truncate(limit);
        Ok(files)
    }

    /// First-time env bootstrap: compose connection strings for the
    /// requested subsystems with generated credentials.
    #[tracing::instrument(name = "Env auto-generate.", skip(self))]
    pub async fn auto_generate(
        &self,
        project: &str,
        environment: Environment,
        options: GenerateOptions,
    ) -> Result<IndexMap<String, String>> {
        let lock_key = pair_key(project, environment);
        let _guard = self.locks.lock(&lock_key).await;

        if self.live_exists(project, environment).await? {
            return Err(Error::EnvAlreadyExists {
                project: project.to_string(),
                environment: environment.to_string(),
            });
        }

        let mut env = EnvFile::new();
        env.set("APP_ENV", &environment.to_string());
        env.set("PORT", "3000");

        if options.database {
            let password = make_secret(SECRET_LEN);
            env.set(
                "DATABASE_URL",
                &format!(
                    "postgresql://{}:{}@{}:5432/{}_{}",
                    project,
                    password,
                    self.hosts.address(HostRole::Storage),
                    project,
                    environment
                ),
            );
        }

        if options.cache {
            let password = make_secret(SECRET_LEN);
            env.set(
                "REDIS_URL",
                &format!(
                    "redis://default:{}@{}:6379/0",
                    password,
                    self.hosts.address(HostRole::Storage)
                ),
            );
        }

        if options.pubsub {
            let password = make_secret(SECRET_LEN);
            env.set(
                "NATS_URL",
                &format!(
                    "nats://{}:{}@{}:4222",
                    project,
                    password,
                    self.hosts.address(HostRole::Streaming)
                ),
            );
        }

        let now = Utc::now();
        self.write_through(project, environment, &env.render(now), now)
            .await?;
        Ok(env.vars().clone())
    }
}

/// Filesystem-safe, lexicographically ordered backup stamp.
fn backup_stamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}
