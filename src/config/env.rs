//! Environment-variable overrides.
//!
//! Values are captured once into [`QuickBooksEnv`] so the rest of the crate
//! never reads process env directly and tests can inject a lookup closure.

use crate::error::ConfigError;

use super::types::Environment;

pub const ENV_CLIENT_ID: &str = "QUICKBOOKS_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "QUICKBOOKS_CLIENT_SECRET";
pub const ENV_REALM_ID: &str = "QUICKBOOKS_REALM_ID";
pub const ENV_ENVIRONMENT: &str = "QUICKBOOKS_ENVIRONMENT";
pub const ENV_REDIRECT_URI: &str = "QUICKBOOKS_REDIRECT_URI";
pub const ENV_PRE_LOGIN_URL: &str = "INTUIT_PRE_LOGIN_URL";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "QBLINK_HTTP_TIMEOUT_SECS";

/// Snapshot of QuickBooks-related environment overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuickBooksEnv {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub realm_id: Option<String>,
    pub environment: Option<Environment>,
    pub redirect_uri: Option<String>,
    /// Replaces the consent page base URL when set.
    pub pre_login_url: Option<String>,
    pub http_timeout_secs: Option<u64>,
}

impl QuickBooksEnv {
    pub fn from_lookup<FEnv>(env_lookup: FEnv) -> Result<Self, ConfigError>
    where
        FEnv: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| {
            env_lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let environment = non_empty(ENV_ENVIRONMENT)
            .map(|value| value.parse::<Environment>())
            .transpose()?;
        let http_timeout_secs = non_empty(ENV_HTTP_TIMEOUT_SECS)
            .map(|value| {
                value.parse::<u64>().map_err(|_| {
                    ConfigError::Invalid(format!(
                        "invalid {ENV_HTTP_TIMEOUT_SECS} value `{value}`: expected positive integer seconds"
                    ))
                })
            })
            .transpose()?
            // Zero would mean "no timeout" to some callers; clamp instead.
            .map(|secs| secs.max(1));

        Ok(Self {
            client_id: non_empty(ENV_CLIENT_ID),
            client_secret: non_empty(ENV_CLIENT_SECRET),
            realm_id: non_empty(ENV_REALM_ID),
            environment,
            redirect_uri: non_empty(ENV_REDIRECT_URI),
            pre_login_url: non_empty(ENV_PRE_LOGIN_URL),
            http_timeout_secs,
        })
    }
}
