use serde;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_http_host")]
    pub http_host: String,
    #[serde(default = "Settings::default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub hosts: HostSettings,
    #[serde(default)]
    pub event_bus: EventBusSettings,
    /// Rollback window in hours.
    #[serde(default = "Settings::default_grace_period")]
    pub grace_period: i64,
    /// Seconds a deploy waits for the slot to turn healthy.
    #[serde(default = "Settings::default_health_timeout")]
    pub default_health_timeout: u64,
    /// Per-command SSH deadline in seconds.
    #[serde(default = "Settings::default_command_timeout")]
    pub default_command_timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_host: Self::default_http_host(),
            http_port: Self::default_http_port(),
            ssh: SshSettings::default(),
            hosts: HostSettings::default(),
            event_bus: EventBusSettings::default(),
            grace_period: Self::default_grace_period(),
            default_health_timeout: Self::default_health_timeout(),
            default_command_timeout: Self::default_command_timeout(),
        }
    }
}

impl Settings {
    fn default_http_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_http_port() -> u16 {
        8400
    }

    fn default_grace_period() -> i64 {
        48
    }

    fn default_health_timeout() -> u64 {
        60
    }

    fn default_command_timeout() -> u64 {
        60
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SshSettings {
    pub user: String,
    pub private_key_path: String,
    pub connect_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            private_key_path: "~/.ssh/id_ed25519".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// Addresses of the four managed host roles.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct HostSettings {
    pub app: String,
    pub streaming: String,
    pub storage: String,
    pub backup: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            app: "127.0.0.1".to_string(),
            streaming: "127.0.0.1".to_string(),
            storage: "127.0.0.1".to_string(),
            backup: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EventBusSettings {
    /// Broker endpoint; empty disables delivery (events are logged and dropped).
    pub api_url: String,
    pub api_key: String,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
        }
    }
}

impl SshSettings {
    /// Overlay SSH settings from environment variables, if present.
    /// If an env var is missing, keep the existing file-provided value.
    pub fn overlay_env(self) -> Self {
        let user = std::env::var("SSH_USER").unwrap_or(self.user);
        let private_key_path =
            std::env::var("SSH_PRIVATE_KEY_PATH").unwrap_or(self.private_key_path);

        SshSettings {
            user,
            private_key_path,
            connect_timeout_secs: self.connect_timeout_secs,
        }
    }
}

impl HostSettings {
    pub fn overlay_env(self) -> Self {
        HostSettings {
            app: std::env::var("APP_HOST").unwrap_or(self.app),
            streaming: std::env::var("STREAMING_HOST").unwrap_or(self.streaming),
            storage: std::env::var("STORAGE_HOST").unwrap_or(self.storage),
            backup: std::env::var("BACKUP_HOST").unwrap_or(self.backup),
        }
    }
}

impl EventBusSettings {
    pub fn overlay_env(self) -> Self {
        EventBusSettings {
            api_url: std::env::var("EVENT_BUS_API_URL").unwrap_or(self.api_url),
            api_key: std::env::var("EVENT_BUS_API_KEY").unwrap_or(self.api_key),
        }
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Start with defaults
    let mut config = Settings::default();

    // Prefer real config, fall back to dist samples
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration.yaml").required(false))
        .add_source(config::File::with_name("configuration.yml").required(false))
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(config::File::with_name("configuration.yaml.dist").required(false))
        .add_source(config::File::with_name("configuration.yml.dist").required(false))
        .build()?;

    if let Ok(loaded) = settings.try_deserialize::<Settings>() {
        config = loaded;
    }

    // Env vars win over file values
    config.ssh = config.ssh.overlay_env();
    config.hosts = config.hosts.overlay_env();
    config.event_bus = config.event_bus.overlay_env();

    if let Ok(hours) = std::env::var("GRACE_PERIOD") {
        if let Ok(parsed) = hours.parse::<i64>() {
            config.grace_period = parsed;
        }
    }

    if let Ok(timeout) = std::env::var("DEFAULT_HEALTH_TIMEOUT") {
        if let Ok(parsed) = timeout.parse::<u64>() {
            config.default_health_timeout = parsed;
        }
    }

    if let Ok(timeout) = std::env::var("DEFAULT_COMMAND_TIMEOUT") {
        if let Ok(parsed) = timeout.parse::<u64>() {
            config.default_command_timeout = parsed;
        }
    }

    Ok(config)
}
