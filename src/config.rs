//! Configuration types for the support bot.
//!
//! Values load from a TOML file (every section is optional and falls back to
//! defaults) and are then overridden from the process environment, which is
//! how the bot is usually deployed.

use crate::error::{BotError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// HTTP surface (health, webhooks, admin routes).
    pub server: ServerConfig,
    /// Admission pipeline policy constants.
    pub admission: AdmissionConfig,
    /// Response generator settings.
    pub generator: GeneratorConfig,
    /// Connection supervisor settings.
    pub supervisor: SupervisorConfig,
    /// Health monitor settings.
    pub health: HealthConfig,
    /// Keep-alive prober settings.
    pub keepalive: KeepAliveConfig,
    /// Periodic janitor settings.
    pub janitor: JanitorConfig,
    /// WhatsApp Cloud API settings.
    pub whatsapp: WhatsAppConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port (`PORT` overrides).
    pub port: u16,
    /// Bearer token guarding `/admin/*` routes. Empty disables the check.
    pub admin_token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3000,
            admin_token: String::new(),
        }
    }
}

/// Admission pipeline policy constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum pending entries before the oldest is evicted.
    pub queue_capacity: usize,
    /// Rolling rate-limit window in milliseconds.
    pub rate_window_ms: u64,
    /// Messages allowed per window before the rate-limit notice.
    pub max_messages_per_window: u32,
    /// Identical consecutive messages that trigger the spam cooldown.
    pub repeat_threshold: u32,
    /// Cooldown applied after the repeat threshold is reached.
    pub repeat_cooldown_ms: u64,
    /// Cooldown applied after spam content is detected.
    pub spam_cooldown_ms: u64,
    /// Auto-expiry of a pause (human handoff, media, operator freeze).
    pub pause_duration_ms: u64,
    /// How long processed message ids are remembered for duplicate detection.
    pub seen_id_retention_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            rate_window_ms: 60_000,
            max_messages_per_window: 10,
            repeat_threshold: 4,
            repeat_cooldown_ms: 120_000,
            spam_cooldown_ms: 180_000,
            pause_duration_ms: 60 * 60 * 1000,
            seen_id_retention_ms: 10 * 60 * 1000,
        }
    }
}

impl AdmissionConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn repeat_cooldown(&self) -> Duration {
        Duration::from_millis(self.repeat_cooldown_ms)
    }

    pub fn spam_cooldown(&self) -> Duration {
        Duration::from_millis(self.spam_cooldown_ms)
    }

    pub fn pause_duration(&self) -> Duration {
        Duration::from_millis(self.pause_duration_ms)
    }

    pub fn seen_id_retention(&self) -> Duration {
        Duration::from_millis(self.seen_id_retention_ms)
    }
}

/// Response generator configuration (Gemini `generateContent`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// API key (`GEMINI_API_KEY` overrides). Required at startup.
    pub api_key: String,
    /// API base URL.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Extra attempts after a timeout. Other failures are never retried.
    pub max_timeout_retries: u32,
    /// Characters of per-sender conversation context kept between calls.
    pub context_chars: usize,
    /// Text files whose contents are embedded into every prompt.
    pub knowledge_paths: Vec<PathBuf>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_owned(),
            model: "gemini-1.5-flash".to_owned(),
            timeout_ms: 60_000,
            max_timeout_retries: 3,
            context_chars: 1000,
            knowledge_paths: Vec::new(),
        }
    }
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Connection supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Reconnection attempts before the process exits.
    pub max_reconnect_attempts: u32,
    /// First reconnection delay in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Multiplier applied per further attempt.
    pub reconnect_growth_factor: f64,
    /// Upper bound of the random jitter added to each delay.
    pub reconnect_jitter_ms: u64,
    /// Hard cap on a single reconnection delay.
    pub reconnect_max_delay_ms: u64,
    /// Attempts after which credentials are treated as corrupt and cleared.
    pub clear_credentials_after_attempts: u32,
    /// Pause between teardown and re-initialization during a restart.
    pub restart_pause_ms: u64,
    /// Directory holding the persisted session (`SESSION_DIR` overrides).
    pub session_dir: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 5_000,
            reconnect_growth_factor: 2.0,
            reconnect_jitter_ms: 1_000,
            reconnect_max_delay_ms: 300_000,
            clear_credentials_after_attempts: 3,
            restart_pause_ms: 5_000,
            session_dir: PathBuf::from(".electra_auth/session-client"),
        }
    }
}

/// Health monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between health evaluations in milliseconds.
    pub check_interval_ms: u64,
    /// Silence (no probe success and no processed event) tolerated.
    pub max_silence_ms: u64,
    /// Entries kept in the error ring buffer.
    pub error_log_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5 * 60 * 1000,
            max_silence_ms: 60 * 60 * 1000,
            error_log_capacity: 50,
        }
    }
}

/// Keep-alive prober configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Probe target (`PING_URL` / `RENDER_EXTERNAL_URL` override). Empty disables probing.
    pub url: String,
    /// Interval between probe cycles in milliseconds.
    pub interval_ms: u64,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Consecutive failures tolerated before a restart is forced.
    pub max_failures: u32,
    /// First retry delay after a failed probe.
    pub retry_base_delay_ms: u64,
    /// Cap on the retry delay.
    pub retry_max_delay_ms: u64,
    /// Status code that means "deployment in progress".
    pub deployment_status: u16,
    /// How long a deployment may stay in progress before it counts as failed.
    pub deployment_timeout_ms: u64,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            interval_ms: 10 * 60 * 1000,
            request_timeout_ms: 5_000,
            max_failures: 5,
            retry_base_delay_ms: 30_000,
            retry_max_delay_ms: 300_000,
            deployment_status: 502,
            deployment_timeout_ms: 15 * 60 * 1000,
        }
    }
}

/// Janitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorConfig {
    /// Sweep interval in milliseconds.
    pub interval_ms: u64,
    /// Conversation context unused for this long is dropped by the sweep.
    pub context_idle_ms: u64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            context_idle_ms: 30 * 60 * 1000,
        }
    }
}

impl JanitorConfig {
    pub fn context_idle(&self) -> Duration {
        Duration::from_millis(self.context_idle_ms)
    }
}

/// WhatsApp Cloud API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Graph API base URL.
    pub api_base_url: String,
    /// Access token (`WHATSAPP_ACCESS_TOKEN` overrides).
    pub access_token: String,
    /// Business phone number id (`WHATSAPP_PHONE_NUMBER_ID` overrides).
    pub phone_number_id: String,
    /// Webhook verification token (`WHATSAPP_VERIFY_TOKEN` overrides).
    pub verify_token: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://graph.facebook.com/v18.0".to_owned(),
            access_token: String::new(),
            phone_number_id: String::new(),
            verify_token: String::new(),
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for a daily rolling log file. `None` logs to stderr only.
    pub directory: Option<PathBuf>,
}

impl BotConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| BotError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/electra/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp/electra-config"))
            .join("electra")
            .join("config.toml")
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("GEMINI_API_KEY") {
            self.generator.api_key = key;
        }
        if let Some(port) = get("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring invalid PORT"),
            }
        }
        if let Some(url) = get("PING_URL").or_else(|| get("RENDER_EXTERNAL_URL")) {
            self.keepalive.url = url;
        }
        if let Some(token) = get("WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = token;
        }
        if let Some(id) = get("WHATSAPP_PHONE_NUMBER_ID") {
            self.whatsapp.phone_number_id = id;
        }
        if let Some(token) = get("WHATSAPP_VERIFY_TOKEN") {
            self.whatsapp.verify_token = token;
        }
        if let Some(token) = get("ADMIN_TOKEN") {
            self.server.admin_token = token;
        }
        if let Some(dir) = get("SESSION_DIR") {
            self.supervisor.session_dir = PathBuf::from(dir);
        }
    }

    /// Reject configurations the runtime cannot start with.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.generator.api_key.trim().is_empty() {
            return Err(BotError::Config(
                "GEMINI_API_KEY is not set; the response generator cannot start".to_owned(),
            ));
        }
        if self.admission.queue_capacity == 0 {
            return Err(BotError::Config(
                "admission.queue_capacity must be at least 1".to_owned(),
            ));
        }
        if self.admission.rate_window_ms == 0 {
            return Err(BotError::Config(
                "admission.rate_window_ms must be positive".to_owned(),
            ));
        }
        if self.admission.repeat_threshold < 2 {
            return Err(BotError::Config(
                "admission.repeat_threshold must be at least 2".to_owned(),
            ));
        }
        if self.supervisor.reconnect_growth_factor < 1.0 {
            return Err(BotError::Config(
                "supervisor.reconnect_growth_factor must be >= 1.0".to_owned(),
            ));
        }
        if !self.keepalive.url.trim().is_empty() {
            url::Url::parse(self.keepalive.url.trim()).map_err(|e| {
                BotError::Config(format!("keepalive.url `{}` is invalid: {e}", self.keepalive.url))
            })?;
        }
        Ok(())
    }
}
