use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::Credentials;
use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

pub const ENV_BASE_URL: &str = "CALIBRE_WEB_URL";
pub const ENV_USERNAME: &str = "CALIBRE_WEB_USERNAME";
pub const ENV_PASSWORD: &str = "CALIBRE_WEB_PASSWORD";

const APP_DIR: &str = "calibre-web-upload";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retry_attempts: u32,
    pub concurrency: usize,
    pub continue_on_fail: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            username: None,
            password: None,
            request_timeout_secs: 120,
            max_retry_attempts: 0,
            concurrency: 1,
            continue_on_fail: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Copy safe to print
    pub fn redacted(&self) -> Self {
        Self {
            password: self.password.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }
}

pub fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR);

    Ok(config_dir.join("config.json"))
}

pub fn load_config() -> AppResult<Config> {
    load_config_from(&get_config_path()?)
}

/// Missing file means defaults. An unparsable file is reported and replaced by
/// defaults rather than aborting.
pub fn load_config_from(path: &Path) -> AppResult<Config> {
    if !path.exists() {
        log::debug!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let config_str = fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        log::warn!("Failed to parse config file {}: {}. Using defaults.", path.display(), e);
        Config::default()
    });

    validate_config(&config)?;
    Ok(config)
}

pub fn save_config(config: &Config, path: &Path) -> AppResult<()> {
    validate_config(config)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Create backup of existing config
    if path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(path, config_str)?;

    log::info!("Configuration saved to {}", path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    if let Some(base_url) = &config.base_url {
        InputValidator::validate_base_url(base_url)?;
    }

    if config.request_timeout_secs == 0 || config.request_timeout_secs > 3600 {
        return Err(AppError::validation(
            "request_timeout_secs",
            "Must be between 1 and 3600",
        ));
    }

    if config.max_retry_attempts > 10 {
        return Err(AppError::validation("max_retry_attempts", "Must be 10 or fewer"));
    }

    if config.concurrency == 0 || config.concurrency > 16 {
        return Err(AppError::validation("concurrency", "Must be between 1 and 16"));
    }

    let valid_log_levels = ["off", "error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

/// Where credentials come from. Read once per upload cycle.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> AppResult<Credentials>;
}

impl CredentialSource for Credentials {
    fn credentials(&self) -> AppResult<Credentials> {
        Ok(self.clone())
    }
}

/// A possibly incomplete set of credential fields from one origin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialOverrides {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CredentialOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            base_url: non_empty(ENV_BASE_URL),
            username: non_empty(ENV_USERNAME),
            password: non_empty(ENV_PASSWORD),
        }
    }
}

impl From<&Config> for CredentialOverrides {
    fn from(config: &Config) -> Self {
        Self {
            base_url: config.base_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

impl CredentialSource for CredentialOverrides {
    fn credentials(&self) -> AppResult<Credentials> {
        LayeredCredentials::new(vec![self.clone()]).credentials()
    }
}

/// Takes each field from the first layer that has it
#[derive(Debug, Clone, Default)]
pub struct LayeredCredentials {
    layers: Vec<CredentialOverrides>,
}

impl LayeredCredentials {
    pub fn new(layers: Vec<CredentialOverrides>) -> Self {
        Self { layers }
    }

    fn first<'a>(&'a self, field: impl Fn(&'a CredentialOverrides) -> &'a Option<String>) -> Option<&'a str> {
        self.layers.iter().find_map(|layer| field(layer).as_deref())
    }
}

impl CredentialSource for LayeredCredentials {
    fn credentials(&self) -> AppResult<Credentials> {
        let base_url = self.first(|l| &l.base_url).ok_or_else(|| {
            AppError::validation(
                "base_url",
                &format!("No server URL configured (set {} or --base-url)", ENV_BASE_URL),
            )
        })?;
        let username = self.first(|l| &l.username).ok_or_else(|| {
            AppError::validation(
                "username",
                &format!("No username configured (set {} or --username)", ENV_USERNAME),
            )
        })?;
        let password = self.first(|l| &l.password).ok_or_else(|| {
            AppError::validation(
                "password",
                &format!("No password configured (set {} or --password)", ENV_PASSWORD),
            )
        })?;

        Credentials::new(base_url, username, password)
    }
}
