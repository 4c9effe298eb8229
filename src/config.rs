use std::path::{Path, PathBuf};

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::{Watchlist, validate_watchlist};

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_silence_hours() -> u64 {
    48
}

fn default_window_hours() -> u32 {
    24
}

fn default_lookup_timeout_secs() -> u64 {
    10
}

fn default_concurrency() -> usize {
    4
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_store_backend() -> String {
    "json".into()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_max_attempts() -> u32 {
    2
}

fn default_bind() -> String {
    "0.0.0.0:8000".into()
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub tickers: Watchlist,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MonitorConfig {
    /// Hours before the same (ticker, kind) may notify again.
    #[serde(default = "default_silence_hours")]
    pub silence_hours: u64,
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    #[serde(default = "default_lookup_timeout_secs")]
    pub lookup_timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            silence_hours: default_silence_hours(),
            window_hours: default_window_hours(),
            lookup_timeout_secs: default_lookup_timeout_secs(),
            concurrency: default_concurrency(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Accepted values: `"json"` | `"sqlite"`
    #[serde(default = "default_store_backend")]
    pub backend: String,
    /// Overrides the default file under `general.data_dir`.
    pub path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self, data_dir: &str) -> PathBuf {
        match &self.path {
            Some(path) => PathBuf::from(path),
            None if self.backend == "sqlite" => Path::new(data_dir).join("stockmon.db"),
            None => Path::new(data_dir).join("notified.json"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    /// Defaults to `smtp_user`.
    pub sender: Option<String>,
    pub recipient: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_user: None,
            smtp_pass: None,
            sender: None,
            recipient: None,
            max_attempts: default_max_attempts(),
        }
    }
}

/// Email settings with every required field present.
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub sender: String,
    pub recipient: String,
    pub max_attempts: u32,
}

impl EmailConfig {
    /// Require every field needed to send mail, naming all that are missing.
    pub fn settings(&self) -> Result<EmailSettings, Report<ConfigError>> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());

        let missing: Vec<&str> = [
            ("smtp_host / SMTP_HOST", present(&self.smtp_host)),
            ("smtp_user / SMTP_USER", present(&self.smtp_user)),
            ("smtp_pass / SMTP_PASS", present(&self.smtp_pass)),
            ("recipient / NOTIFY_EMAIL", present(&self.recipient)),
        ]
        .into_iter()
        .filter_map(|(name, ok)| (!ok).then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(Report::new(ConfigError::Validation {
                field: format!("email: missing {}", missing.join(", ")),
            }));
        }

        let smtp_user = self.smtp_user.clone().unwrap_or_default();
        Ok(EmailSettings {
            smtp_host: self.smtp_host.clone().unwrap_or_default(),
            smtp_port: self.smtp_port,
            sender: self.sender.clone().unwrap_or_else(|| smtp_user.clone()),
            smtp_user,
            smtp_pass: self.smtp_pass.clone().unwrap_or_default(),
            recipient: self.recipient.clone().unwrap_or_default(),
            max_attempts: self.max_attempts,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_key: None,
        }
    }
}

impl ServerConfig {
    pub fn required_api_key(&self) -> Result<String, Report<ConfigError>> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| {
                Report::new(ConfigError::Validation {
                    field: "server.api_key / STOCKMON_API_KEY must be set".into(),
                })
            })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientConfig {
    /// When set, `check` asks this endpoint instead of evaluating locally.
    pub api_url: Option<String>,
}

/// Load and validate an `AppConfig` from a TOML file at `path`, then apply
/// secrets and overrides from the process environment.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let mut config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;

    Ok(config)
}

/// Environment variables win over the file for secrets and endpoints.
fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = lookup("STOCKMON_API_KEY") {
        config.server.api_key = Some(v);
    }
    if let Some(v) = lookup("STOCKMON_API_URL") {
        config.client.api_url = Some(v);
    }
    if let Some(v) = lookup("SMTP_HOST") {
        config.email.smtp_host = Some(v);
    }
    if let Some(v) = lookup("SMTP_USER") {
        config.email.smtp_user = Some(v);
    }
    if let Some(v) = lookup("SMTP_PASS") {
        config.email.smtp_pass = Some(v);
    }
    if let Some(v) = lookup("NOTIFY_EMAIL") {
        config.email.recipient = Some(v);
    }
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];
const VALID_STORE_BACKENDS: &[&str] = &["json", "sqlite"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    validate_monitor(config)?;
    validate_tickers(config)?;
    Ok(())
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&config.general.log_format.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format \"{}\" is not one of {VALID_LOG_FORMATS:?}",
                config.general.log_format
            ),
        }));
    }

    if !VALID_STORE_BACKENDS.contains(&config.store.backend.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "store.backend \"{}\" is not one of {VALID_STORE_BACKENDS:?}",
                config.store.backend
            ),
        }));
    }
    Ok(())
}

fn validate_monitor(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let monitor = &config.monitor;
    let checks = [
        ("monitor.silence_hours", monitor.silence_hours > 0),
        ("monitor.window_hours", monitor.window_hours > 0),
        ("monitor.lookup_timeout_secs", monitor.lookup_timeout_secs > 0),
        ("monitor.concurrency", monitor.concurrency > 0),
        ("monitor.requests_per_second", monitor.requests_per_second > 0),
    ];

    for (field, ok) in checks {
        if !ok {
            return Err(Report::new(ConfigError::Validation {
                field: format!("{field} must be greater than 0"),
            }));
        }
    }
    Ok(())
}

fn validate_tickers(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_watchlist(&config.tickers).map_err(|reason| {
        Report::new(ConfigError::Validation {
            field: format!("tickers: {reason}"),
        })
    })
}
