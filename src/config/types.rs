//! Settings data model.
//!
//! `Settings` mirrors the on-disk `qblink.toml` exactly; environment overrides
//! are kept out of it so saving never leaks env-provided secrets into the file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";
pub const DEFAULT_MINOR_VERSION: u32 = 65;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const SANDBOX_API_BASE_URL: &str = "https://sandbox-quickbooks.api.intuit.com";
const PRODUCTION_API_BASE_URL: &str = "https://quickbooks.api.intuit.com";

/// QuickBooks Online deployment targeted by a company connection.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    /// Data API host for this environment.
    pub fn api_base_url(self) -> &'static str {
        match self {
            Self::Sandbox => SANDBOX_API_BASE_URL,
            Self::Production => PRODUCTION_API_BASE_URL,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "development" | "dev" => Ok(Self::Sandbox),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::Invalid(format!(
                "unknown QuickBooks environment `{other}` (expected sandbox or production)"
            ))),
        }
    }
}

/// Top-level contents of `qblink.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub quickbooks: QuickBooksSettings,
    /// Token fallback used when no secret store is configured.
    pub tokens: StoredTokens,
    pub network: NetworkSettings,
    pub secrets: SecretsSettings,
}

/// `[quickbooks]` connection settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QuickBooksSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realm_id: Option<String>,
    pub environment: Environment,
    pub redirect_uri: String,
    /// Overrides the environment's data API host (proxies, test servers).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    /// Overrides the interactive consent page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    /// Overrides the OAuth token endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    pub minor_version: u32,
}

impl Default for QuickBooksSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            realm_id: None,
            environment: Environment::Sandbox,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            api_base_url: None,
            authorization_url: None,
            token_url: None,
            minor_version: DEFAULT_MINOR_VERSION,
        }
    }
}

/// `[tokens]` table.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoredTokens {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// `[network]` HTTP behavior.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NetworkSettings {
    pub http_timeout_secs: u64,
    /// Total attempts for data API calls, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_attempts: 3,
            initial_backoff_ms: 250,
        }
    }
}

/// `[secrets]` backend selection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SecretsSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for SecretsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}
