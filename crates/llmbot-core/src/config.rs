use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BotError;

/// Top-level application configuration, loaded from TOML and overlaid by
/// environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub telegram: TelegramConfig,
    pub analytics: AnalyticsConfig,
    pub database: DatabaseConfig,
    pub export: ExportConfig,
}

impl AppConfig {
    /// Load configuration from the default path (~/.config/llmbot/config.toml),
    /// falling back to defaults if the file doesn't exist, then apply the
    /// process environment (including a `.env` file if present).
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_process_env()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file without touching the environment.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("llmbot")
            .join("config.toml")
    }

    /// Overlay values from the process environment. A `.env` file in the
    /// working directory is read first; variables already set win over it.
    pub fn apply_process_env(&mut self) -> Result<(), BotError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable lookup. Empty values count as unset.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), BotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LLM_API_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = get("LLM_API_URL") {
            self.provider.api_base = v;
        }
        if let Some(v) = get("MODEL") {
            self.provider.model = v;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.token = Some(v);
        }
        if let Some(v) = get("ANALYTICS_CSV_PATH") {
            self.analytics.log_path = PathBuf::from(v);
        }
        if let Some(v) = get("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = get("DB_PORT") {
            self.database.port = parse_var("DB_PORT", &v)?;
        }
        if let Some(v) = get("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = get("DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = get("DB_NAME") {
            self.database.name = v;
        }
        if let Some(v) = get("DB_TABLE") {
            self.database.table = v;
        }
        if let Some(v) = get("YADISK_TOKEN") {
            self.export.token = Some(v);
        }
        if let Some(v) = get("YADISK_FOLDER") {
            self.export.folder = v;
        }
        if let Some(v) = get("EXPORT_INTERVAL_HOURS") {
            self.export.interval_hours = parse_var("EXPORT_INTERVAL_HOURS", &v)?;
        }
        Ok(())
    }

    /// Check that everything the bot cannot run without is present.
    ///
    /// Remote-storage settings are optional: without a token the export job
    /// is simply disabled.
    pub fn validate(&self) -> Result<(), BotError> {
        if self.telegram.token.is_none() {
            return Err(BotError::Config(
                "No token provided! Please set TELEGRAM_BOT_TOKEN environment variable.".into(),
            ));
        }
        let provider_ok = self.provider.api_key.is_some()
            && !self.provider.api_base.is_empty()
            && !self.provider.model.is_empty();
        if !provider_ok {
            return Err(BotError::Config(
                "LLM API settings missing! Please set LLM_API_KEY, LLM_API_URL, and MODEL environment variables."
                    .into(),
            ));
        }
        if self.export.interval_hours == 0 {
            return Err(BotError::Config(
                "EXPORT_INTERVAL_HOURS must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Copy with every credential replaced by a mask, for display.
    pub fn redacted(&self) -> Self {
        let mask = |secret: &Option<String>| secret.as_ref().map(|_| "********".to_string());
        let mut config = self.clone();
        config.provider.api_key = mask(&self.provider.api_key);
        config.telegram.token = mask(&self.telegram.token);
        config.export.token = mask(&self.export.token);
        config.database.password = "********".into();
        config
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, BotError> {
    value
        .trim()
        .parse()
        .map_err(|_| BotError::Config(format!("Invalid value for {}: '{}'", key, value)))
}

/// Completion endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL for the OpenAI-compatible API.
    pub api_base: String,
    /// Model name sent with every request and stamped on analytics records.
    pub model: String,
    pub api_key: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            model: String::new(),
            api_key: None,
            temperature: 0.7,
        }
    }
}

/// Telegram Bot API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub api_base: String,
    /// Long-polling timeout passed to getUpdates.
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: "https://api.telegram.org".into(),
            poll_timeout_secs: 30,
        }
    }
}

/// Append-only analytics log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// CSV file every user action is appended to.
    pub log_path: PathBuf,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("/app/analytics/user_actions.csv"),
        }
    }
}

/// PostgreSQL connection parameters for the relational sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: "postgres".into(),
            name: "analytics".into(),
            table: "user_actions".into(),
        }
    }
}

/// Spreadsheet export to Yandex Disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// OAuth token; `None` disables the export job.
    pub token: Option<String>,
    pub api_base: String,
    /// Destination folder at the disk root.
    pub folder: String,
    pub file_name: String,
    pub interval_hours: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: "https://cloud-api.yandex.net/v1/disk".into(),
            folder: "telegram_bot_analytics".into(),
            file_name: "analytics.xlsx".into(),
            interval_hours: 2,
        }
    }
}

impl ExportConfig {
    pub fn enabled(&self) -> bool {
        self.token.is_some()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }

    /// Remote path of the uploaded artifact, e.g. `/telegram_bot_analytics/analytics.xlsx`.
    pub fn destination(&self) -> String {
        format!("/{}/{}", self.folder.trim_matches('/'), self.file_name)
    }
}
