use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::identity::IdentitySettings;
use crate::ip_lookup::DEFAULT_IP_LOOKUP_URL;
use crate::mail::EmailConfig;

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: PathBuf,
    pub ip_lookup: IpLookupConfig,
    pub client: ClientContext,
    pub identity: IdentityConfig,
    /// SMTP settings. Without them account mail goes to a logging outbox.
    pub email: Option<EmailConfig>,
}

/// Client IP lookup used to stamp contact submissions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpLookupConfig {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for IpLookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_IP_LOOKUP_URL.to_string(),
        }
    }
}

/// What the service reports about its caller on tracked writes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientContext {
    pub user_agent: String,
    /// Empty when there is no referrer.
    pub referrer: String,
}

impl Default for ClientContext {
    fn default() -> Self {
        Self {
            user_agent: format!("site-services/{}", env!("CARGO_PKG_VERSION")),
            referrer: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Page that handles verification and reset links
    pub action_url: String,
    pub action_code_expiry_minutes: u64,
    pub min_password_length: usize,
    pub max_failed_attempts: u32,
    pub lockout_minutes: u64,
    pub recent_login_minutes: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        let settings = IdentitySettings::default();
        Self {
            action_url: settings.action_url,
            action_code_expiry_minutes: settings.action_code_expiry.as_secs() / 60,
            min_password_length: settings.min_password_length,
            max_failed_attempts: settings.max_failed_attempts,
            lockout_minutes: settings.lockout.as_secs() / 60,
            recent_login_minutes: settings.recent_login.as_secs() / 60,
        }
    }
}

impl IdentityConfig {
    pub fn settings(&self) -> IdentitySettings {
        IdentitySettings {
            action_url: self.action_url.clone(),
            action_code_expiry: minutes(self.action_code_expiry_minutes),
            min_password_length: self.min_password_length,
            max_failed_attempts: self.max_failed_attempts,
            lockout: minutes(self.lockout_minutes),
            recent_login: minutes(self.recent_login_minutes),
        }
    }
}

/// Longest configurable duration, in minutes (about a century). Deadlines
/// are computed as `Instant + Duration`, which panics past this range.
const MAX_MINUTES: u64 = 100 * 365 * 24 * 60;

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.min(MAX_MINUTES) * 60)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: Self::default_data_dir().join("site.db"),
            ip_lookup: IpLookupConfig::default(),
            client: ClientContext::default(),
            identity: IdentityConfig::default(),
            email: None,
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `SITE_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("SITE_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("SITE_IP_LOOKUP_URL") {
            self.ip_lookup.endpoint = url;
        }
        if let Some(enabled) = lookup("SITE_IP_LOOKUP_ENABLED") {
            self.ip_lookup.enabled = parse_bool("SITE_IP_LOOKUP_ENABLED", &enabled)?;
        }
        if let Some(url) = lookup("SITE_ACTION_URL") {
            self.identity.action_url = url;
        }

        if let Some(host) = lookup("SITE_SMTP_HOST") {
            let email = self.email.get_or_insert_with(|| EmailConfig {
                smtp_host: String::new(),
                smtp_port: 587,
                smtp_user: None,
                smtp_pass: None,
                from_email: "noreply@localhost".to_string(),
                from_name: "Site Services".to_string(),
            });
            email.smtp_host = host;
        }
        if let Some(email) = self.email.as_mut() {
            if let Some(port) = lookup("SITE_SMTP_PORT") {
                email.smtp_port = port
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv("SITE_SMTP_PORT", port.clone()))?;
            }
            if let Some(user) = lookup("SITE_SMTP_USER") {
                email.smtp_user = Some(user);
            }
            if let Some(pass) = lookup("SITE_SMTP_PASS") {
                email.smtp_pass = Some(pass);
            }
            if let Some(from) = lookup("SITE_SMTP_FROM") {
                email.from_email = from;
            }
        }

        Ok(())
    }

    /// Default config directory, e.g. ~/.config/site-services/ on Linux
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("site-services")
    }

    /// Default data directory, e.g. ~/.local/share/site-services/ on Linux
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("site-services")
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv(key, value.to_string())),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    ReadError(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),
    #[error("Invalid value for {0}: '{1}'")]
    InvalidEnv(&'static str, String),
}
