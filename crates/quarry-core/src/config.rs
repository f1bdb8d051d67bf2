//! Scraper configuration documents and loading.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::instruction::Instruction;
use crate::processor::ProcessorRegistry;
use crate::validate::validate_config;

/// A complete scraper definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub meta: MetaConfig,
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_url: String,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

/// Which kind of content source the scraper needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    Static,
    #[serde(alias = "browser", alias = "interactive")]
    Session,
    Api,
}

impl FetcherKind {
    pub const ALL: [FetcherKind; 3] = [FetcherKind::Static, FetcherKind::Session, FetcherKind::Api];

    pub fn as_str(&self) -> &'static str {
        match self {
            FetcherKind::Static => "static",
            FetcherKind::Session => "session",
            FetcherKind::Api => "api",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FetcherKind::Static => "single HTTP GET, instructions run against the fetched document",
            FetcherKind::Session => "live headless browser session (aliases: browser, interactive)",
            FetcherKind::Api => "HTTP request returning a JSON payload, collected with path expressions",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

/// Credentials for structured (api) sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    Basic { username: String, password: String },
    Bearer { token: String },
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub headless: bool,
    pub viewport: Viewport,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetcherConfig {
    #[serde(rename = "type")]
    pub kind: FetcherKind,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub session_options: SessionOptions,
}

impl FetcherConfig {
    pub fn new(kind: FetcherKind) -> Self {
        Self {
            kind,
            timeout_ms: default_timeout_ms(),
            headers: BTreeMap::new(),
            method: HttpMethod::default(),
            body: None,
            auth: None,
            session_options: SessionOptions::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Loads configuration documents from files or in-memory values.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Read and parse a `.json` or `.toml` file. No validation is applied.
    pub fn from_path(path: &Path) -> Result<ScrapeConfig, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
        .map_err(|e| match e {
            AppError::ConfigError(msg) => {
                AppError::ConfigError(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_json_str(content: &str) -> Result<ScrapeConfig, AppError> {
        serde_json::from_str(content).map_err(|e| AppError::ConfigError(e.to_string()))
    }

    pub fn from_toml_str(content: &str) -> Result<ScrapeConfig, AppError> {
        toml::from_str(content).map_err(|e| AppError::ConfigError(e.to_string()))
    }

    pub fn from_value(value: Value) -> Result<ScrapeConfig, AppError> {
        serde_json::from_value(value).map_err(|e| AppError::ConfigError(e.to_string()))
    }

    /// Load a file and validate it against `registry`.
    pub fn load_validated(
        path: &Path,
        registry: &ProcessorRegistry,
    ) -> Result<ScrapeConfig, AppError> {
        let config = Self::from_path(path)?;
        validate_config(&config, registry).map_err(AppError::ConfigValidation)?;
        Ok(config)
    }
}
