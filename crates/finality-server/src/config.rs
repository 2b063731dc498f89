use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use finality_trial::TrialConfig;

/// Top-level server configuration, loaded from `finality.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub auth: AuthFileConfig,
    pub limits: LimitsConfig,
    /// Path of the JSON penalty store. `None` keeps flags in memory only.
    pub penalty_store: Option<String>,
    pub trial: TrialConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            auth: AuthFileConfig::default(),
            limits: LimitsConfig::default(),
            penalty_store: None,
            trial: TrialConfig::default(),
        }
    }
}

/// Infrastructure limits (tick rate, buffer sizes, timeouts).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Period of the coordinator tick.
    pub tick_ms: u64,
    /// Outbound command buffer towards the host simulation.
    pub host_message_buffer: usize,
    /// Admin requests that take longer than this are answered with 408.
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            host_message_buffer: 1024,
            request_timeout_secs: 10,
        }
    }
}

impl LimitsConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Auth section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// Token required on the admin API and the host socket. None = auth disabled.
    pub bearer_token: Option<String>,
}

impl ServerConfig {
    /// Validate configuration; exits the process on fatal problems.
    pub fn validate(&self) {
        if let Err(reason) = self.check() {
            tracing::error!("{reason}");
            std::process::exit(1);
        }

        // Secrets belong in the environment in production
        if self.auth.bearer_token.is_some() {
            tracing::warn!(
                "bearer_token is set in config file, use FINALITY_ADMIN_TOKEN env var in production"
            );
        } else {
            tracing::warn!("No admin token configured; admin API and host socket are open");
        }
        if self.penalty_store.is_none() {
            tracing::warn!("No penalty_store configured; permanent failures are lost on restart");
        }
    }

    /// The fatal subset of [`ServerConfig::validate`].
    pub fn check(&self) -> Result<(), String> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "listen_addr {:?} is not a valid socket address",
                self.listen_addr
            ));
        }
        if self.limits.tick_ms == 0 {
            return Err("limits.tick_ms must be > 0".to_string());
        }
        if self.limits.host_message_buffer == 0 {
            return Err("limits.host_message_buffer must be > 0".to_string());
        }
        if self.limits.request_timeout_secs == 0 {
            return Err("limits.request_timeout_secs must be > 0".to_string());
        }
        if let Some(path) = &self.penalty_store
            && path.trim().is_empty()
        {
            return Err("penalty_store must not be empty".to_string());
        }
        self.trial
            .validate()
            .map_err(|e| format!("invalid [trial] section: {e}"))
    }

    /// Load config from `finality.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = Self::load_file(Path::new("finality.toml"));
        config.apply_env_overrides();
        config
    }

    fn load_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(path = %path.display(), "Loaded configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        "Failed to parse config: {e}, using defaults"
                    );
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                ServerConfig::default()
            },
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("FINALITY_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Ok(token) = std::env::var("FINALITY_ADMIN_TOKEN")
            && !token.is_empty()
        {
            self.auth.bearer_token = Some(token);
        }
        if let Ok(path) = std::env::var("FINALITY_PENALTY_STORE")
            && !path.is_empty()
        {
            self.penalty_store = Some(path);
        }
        if let Ok(val) = std::env::var("FINALITY_TICK_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.limits.tick_ms = n;
        }
    }
}
