//! Configuration loading.
//!
//! Process-level settings ([`AppConfig`]) come from layered `.env` files and
//! environment variables prefixed with `CRUD_CONTEXT_`. Each context manager is
//! configured separately with a [`ContextConfig`], seeded from the app
//! defaults.

use std::{collections::BTreeMap, collections::BTreeSet, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::{LIMIT_KEY, ParamValue};

/// Environment variable prefix recognized by [`ConfigLoader`]
pub const ENV_PREFIX: &str = "CRUD_CONTEXT_";

/// Application configuration derived from `CRUD_CONTEXT_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Page size used by contexts that do not set their own
    #[serde(default = "default_limit")]
    pub default_limit: u32,
    /// Store key holding the page number
    #[serde(default = "default_page_param")]
    pub default_page_param: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            default_limit: default_limit(),
            default_page_param: default_page_param(),
        }
    }
}

impl AppConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }
        if self.default_page_param.trim().is_empty() {
            return Err(ConfigError::EmptyPageParam);
        }
        if self.default_page_param == LIMIT_KEY {
            return Err(ConfigError::ReservedParam {
                name: self.default_page_param.clone(),
            });
        }
        Ok(())
    }
}

/// Per-context configuration surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Page size; `0` disables pagination
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Store key holding the page number
    #[serde(default = "default_page_param")]
    pub page_param: String,
    /// Filter keys tracked in the store, in declaration order
    #[serde(default)]
    pub url_params: Vec<String>,
    /// Default key for single-item fetches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_item_id: Option<ParamValue>,
    /// Opaque caller context exposed alongside the list state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            page_param: default_page_param(),
            url_params: Vec::new(),
            single_item_id: None,
            extra_data: None,
        }
    }
}

impl ContextConfig {
    /// Context defaults taken from the application configuration
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            limit: app.default_limit,
            page_param: app.default_page_param.clone(),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_page_param(mut self, page_param: impl Into<String>) -> Self {
        self.page_param = page_param.into();
        self
    }

    pub fn with_url_params<I, S>(mut self, url_params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.url_params = url_params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_single_item_id(mut self, id: impl Into<ParamValue>) -> Self {
        self.single_item_id = Some(id.into());
        self
    }

    pub fn with_extra_data(mut self, extra: serde_json::Map<String, serde_json::Value>) -> Self {
        self.extra_data = Some(extra);
        self
    }

    /// Validate key declarations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_param.trim().is_empty() {
            return Err(ConfigError::EmptyPageParam);
        }
        if self.page_param == LIMIT_KEY {
            return Err(ConfigError::ReservedParam {
                name: self.page_param.clone(),
            });
        }

        let mut seen = BTreeSet::new();
        for name in &self.url_params {
            if name == LIMIT_KEY || *name == self.page_param {
                return Err(ConfigError::ReservedParam { name: name.clone() });
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateUrlParam { name: name.clone() });
            }
        }
        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_limit() -> u32 {
    15
}

fn default_page_param() -> String {
    "page".to_string()
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for {key}: expected an unsigned integer")]
    InvalidNumber { key: String, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("page parameter name cannot be empty")]
    EmptyPageParam,
    #[error("parameter name '{name}' is reserved")]
    ReservedParam { name: String },
    #[error("url parameter '{name}' is declared more than once")]
    DuplicateUrlParam { name: String },
}

/// Loads configuration using layered `.env` files and `CRUD_CONTEXT_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Load `.env`, `.env.local`, `.env.{profile}`, `.env.{profile}.local`,
    /// then the process environment, later layers winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let defaults = AppConfig::default();
        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or(defaults.log_format);
        let default_limit = match layered.remove("DEFAULT_LIMIT").filter(|v| !v.is_empty()) {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidNumber {
                    key: format!("{ENV_PREFIX}DEFAULT_LIMIT"),
                    value: raw.clone(),
                })?,
            None => defaults.default_limit,
        };
        let default_page_param = layered
            .remove("DEFAULT_PAGE_PARAM")
            .unwrap_or(defaults.default_page_param);

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            default_limit,
            default_page_param,
        };
        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
