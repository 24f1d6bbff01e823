//! Intuit OAuth2 authorization-code exchange and token refresh.
//!
//! Failures are logged with status and body and returned as transient
//! errors. Nothing here retries; an outer caller decides whether to try again.

use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{QuickBooksEnv, QuickBooksSettings};
use crate::error::QboError;

use super::credentials::CredentialProvider;
use super::types::{AuthorizationRequest, OAuthCredentials, TokenSet};
use super::vault::TokenVault;

/// Intuit's interactive consent page.
pub const INTUIT_AUTHORIZATION_URL: &str = "https://appcenter.intuit.com/connect/oauth2";
/// Token endpoint used for both exchange and refresh.
pub const INTUIT_TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
/// Token revocation endpoint.
pub const INTUIT_REVOCATION_URL: &str = "https://developer.api.intuit.com/v2/oauth2/tokens/revoke";
/// Only scope this client requests.
pub const ACCOUNTING_SCOPE: &str = "com.intuit.quickbooks.accounting";
const STATE_LEN: usize = 32;
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// OAuth endpoint set; overridable for proxies and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub authorization_url: String,
    pub token_url: String,
    pub revocation_url: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            authorization_url: INTUIT_AUTHORIZATION_URL.to_string(),
            token_url: INTUIT_TOKEN_URL.to_string(),
            revocation_url: INTUIT_REVOCATION_URL.to_string(),
        }
    }
}

impl OAuthEndpoints {
    /// Apply `INTUIT_PRE_LOGIN_URL` and settings overrides on top of the defaults.
    pub fn resolve(settings: &QuickBooksSettings, env: &QuickBooksEnv) -> Self {
        let mut endpoints = Self::default();
        if let Some(url) = env
            .pre_login_url
            .clone()
            .or_else(|| non_blank(settings.authorization_url.as_deref()))
        {
            endpoints.authorization_url = url;
        }
        if let Some(url) = non_blank(settings.token_url.as_deref()) {
            endpoints.token_url = url;
        }
        endpoints
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// OAuth token endpoint response shape.
#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(deserialize_with = "deserialize_i64_option", default)]
    expires_in: Option<i64>,
    /// Refresh token lifetime in seconds (Intuit-specific).
    #[serde(deserialize_with = "deserialize_i64_option", default)]
    x_refresh_token_expires_in: Option<i64>,
}

/// Performs code exchange and refresh against Intuit's token endpoint.
pub struct TokenExchangeClient {
    http: reqwest::Client,
    credentials: Arc<CredentialProvider>,
    vault: Arc<TokenVault>,
    endpoints: OAuthEndpoints,
    /// Serializes refreshes so only one request is in flight per process.
    refresh_gate: Mutex<()>,
}

impl TokenExchangeClient {
    pub fn new(
        http: reqwest::Client,
        credentials: Arc<CredentialProvider>,
        vault: Arc<TokenVault>,
        endpoints: OAuthEndpoints,
    ) -> Self {
        Self {
            http,
            credentials,
            vault,
            endpoints,
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn endpoints(&self) -> &OAuthEndpoints {
        &self.endpoints
    }

    /// Build the consent URL with a fresh anti-CSRF `state`.
    pub async fn authorization_url(&self) -> Result<AuthorizationRequest, QboError> {
        let credentials = self.credentials.credentials().await?;
        let state = random_state();
        let mut url = reqwest::Url::parse(&self.endpoints.authorization_url).map_err(|err| {
            QboError::MissingConfiguration(format!(
                "invalid authorization URL `{}`: {err}",
                self.endpoints.authorization_url
            ))
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &credentials.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", ACCOUNTING_SCOPE)
            .append_pair("redirect_uri", &credentials.redirect_uri)
            .append_pair("state", &state);
        Ok(AuthorizationRequest {
            url: url.into(),
            state,
        })
    }

    /// Exchange an authorization code for tokens and persist them.
    pub async fn exchange_code_for_token(&self, code: &str) -> Result<TokenSet, QboError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(QboError::InvalidInput(
                "authorization code must not be empty".to_string(),
            ));
        }
        let credentials = self.credentials.credentials().await?;
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", credentials.redirect_uri.as_str()),
        ];

        let tokens = self
            .request_tokens(&credentials, &form, None, "authorization code exchange")
            .await?;
        self.vault.replace(tokens.clone()).await?;
        tracing::info!(expires_at = %tokens.expires_at, "QuickBooks authorization completed");
        Ok(tokens)
    }

    /// Refresh the stored token pair.
    ///
    /// Without a stored refresh token this fails before any network I/O.
    /// A caller that waited while another refresh succeeded gets those
    /// tokens back instead of spending the new refresh token again.
    pub async fn refresh_access_token(&self) -> Result<TokenSet, QboError> {
        let observed = self.vault.generation().await;
        let _gate = self.refresh_gate.lock().await;

        let current = self.vault.current().await?;
        if self.vault.generation().await != observed {
            if let Some(tokens) = current.as_ref().filter(|t| t.has_access_token()) {
                tracing::debug!("token refreshed by a concurrent caller; reusing it");
                return Ok(tokens.clone());
            }
        }

        let Some(current) = current.filter(TokenSet::has_refresh_token) else {
            tracing::warn!("refresh requested but no refresh token is stored");
            return Err(QboError::Unauthorized(
                "no QuickBooks refresh token is stored. Run `qblink auth-url` and `qblink exchange <code>` to re-authorize."
                    .to_string(),
            ));
        };

        let credentials = self.credentials.credentials().await?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", current.refresh_token.as_str()),
        ];
        let tokens = self
            .request_tokens(
                &credentials,
                &form,
                Some(current.refresh_token.as_str()),
                "token refresh",
            )
            .await?;
        self.vault.replace(tokens.clone()).await?;
        tracing::info!(expires_at = %tokens.expires_at, "QuickBooks access token refreshed");
        Ok(tokens)
    }

    /// Revoke the refresh token (best effort) and forget stored tokens.
    ///
    /// Stored tokens are cleared even when revocation cannot be attempted
    /// or is rejected.
    pub async fn disconnect(&self) -> Result<(), QboError> {
        if let Some(tokens) = self.vault.current().await? {
            match self.credentials.credentials().await {
                Ok(credentials) => self.revoke(&credentials, &tokens).await,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping token revocation; app credentials unavailable");
                }
            }
        }
        self.vault.clear().await
    }

    async fn revoke(&self, credentials: &OAuthCredentials, tokens: &TokenSet) {
        let token = if tokens.has_refresh_token() {
            tokens.refresh_token.as_str()
        } else {
            tokens.access_token.as_str()
        };
        let outcome = self
            .http
            .post(&self.endpoints.revocation_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await;
        match outcome {
            Ok(response) if response.status().is_success() => {
                tracing::info!("QuickBooks tokens revoked");
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status, body = %body, "token revocation rejected");
            }
            Err(err) => tracing::warn!(error = %err, "token revocation failed"),
        }
    }

    async fn request_tokens(
        &self,
        credentials: &OAuthCredentials,
        form: &[(&str, &str)],
        refresh_fallback: Option<&str>,
        operation: &str,
    ) -> Result<TokenSet, QboError> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "{operation} request failed");
                QboError::Exchange {
                    status: None,
                    detail: err.to_string(),
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            tracing::error!(status, body = %body, "{operation} rejected by token endpoint");
            return Err(QboError::Exchange {
                status: Some(status),
                detail: body,
            });
        }

        let payload: OAuthTokenResponse = serde_json::from_str(&body).map_err(|err| {
            tracing::error!(status, error = %err, "{operation} returned an unparsable body");
            QboError::Exchange {
                status: Some(status),
                detail: format!("unparsable token response: {err}"),
            }
        })?;
        token_set_from_response(payload, refresh_fallback).map_err(|detail| {
            tracing::error!(status, detail = %detail, "{operation} response incomplete");
            QboError::Exchange {
                status: Some(status),
                detail,
            }
        })
    }
}

/// Validate required fields and compute absolute expiry.
fn token_set_from_response(
    payload: OAuthTokenResponse,
    refresh_fallback: Option<&str>,
) -> Result<TokenSet, String> {
    let access_token = payload.access_token.unwrap_or_default().trim().to_string();
    if access_token.is_empty() {
        return Err("token response did not include access_token".to_string());
    }
    // Intuit normally rotates the refresh token, but keep the old one if omitted.
    let refresh_token = payload
        .refresh_token
        .or_else(|| refresh_fallback.map(str::to_string))
        .unwrap_or_default()
        .trim()
        .to_string();
    if refresh_token.is_empty() {
        return Err("token response did not include refresh_token".to_string());
    }
    if let Some(secs) = payload.x_refresh_token_expires_in {
        tracing::debug!(refresh_token_ttl_secs = secs, "refresh token lifetime");
    }

    let expires_in = payload
        .expires_in
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
        .max(60);
    let expires_at = Duration::try_seconds(expires_in)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| format!("token response expires_in {expires_in} is out of range"))?;
    Ok(TokenSet::new(access_token, refresh_token, expires_at))
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LEN)
        .map(char::from)
        .collect()
}

/// Deserialize optional integer durations encoded as string/number/null.
fn deserialize_i64_option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(num) => num
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("duration must be an integer"))
            .map(Some),
        serde_json::Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|err| serde::de::Error::custom(format!("invalid duration: {err}"))),
        _ => Err(serde::de::Error::custom(
            "duration must be string, number, or null",
        )),
    }
}
