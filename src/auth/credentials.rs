//! Lazy, single-flight loading of app credentials and realm settings.
//!
//! Each value resolves secret store first (when one is configured), then
//! `QUICKBOOKS_*` environment variables, then the settings file.

use std::sync::Arc;

use crate::config::{Environment, QuickBooksEnv, SettingsStore};
use crate::error::QboError;
use crate::secrets::{
    non_empty_secret, SecretStore, KEY_CLIENT_ID, KEY_CLIENT_SECRET, KEY_ENVIRONMENT,
    KEY_REALM_ID, KEY_REDIRECT_URI,
};
use crate::single_flight::SingleFlight;

use super::types::OAuthCredentials;

/// Resolves and caches [`OAuthCredentials`] for the process lifetime.
pub struct CredentialProvider {
    secrets: Option<Arc<dyn SecretStore>>,
    settings: Arc<SettingsStore>,
    env: QuickBooksEnv,
    credentials: SingleFlight<OAuthCredentials>,
}

impl CredentialProvider {
    pub fn new(
        secrets: Option<Arc<dyn SecretStore>>,
        settings: Arc<SettingsStore>,
        env: QuickBooksEnv,
    ) -> Self {
        Self {
            secrets,
            settings,
            env,
            credentials: SingleFlight::new(),
        }
    }

    /// Cached credentials, loading them on first use.
    ///
    /// Concurrent first callers share one load.
    pub async fn credentials(&self) -> Result<Arc<OAuthCredentials>, QboError> {
        self.credentials.get_or_try_init(|| self.load()).await
    }

    /// Drop the cached credentials and load them again.
    pub async fn reload(&self) -> Result<Arc<OAuthCredentials>, QboError> {
        self.credentials.invalidate().await;
        self.credentials().await
    }

    /// Realm (company) id. Read fresh on every call.
    pub async fn realm_id(&self) -> Result<Option<String>, QboError> {
        let settings = self.settings.snapshot().await;
        self.resolve(
            KEY_REALM_ID,
            self.env.realm_id.as_deref(),
            settings.quickbooks.realm_id.as_deref(),
        )
        .await
    }

    pub async fn environment(&self) -> Result<Environment, QboError> {
        if let Some(secrets) = self.secrets.as_deref() {
            if let Some(value) = non_empty_secret(secrets, KEY_ENVIRONMENT).await? {
                return Ok(value.parse::<Environment>()?);
            }
        }
        if let Some(environment) = self.env.environment {
            return Ok(environment);
        }
        Ok(self.settings.snapshot().await.quickbooks.environment)
    }

    /// Data API host: explicit override, else the environment's host.
    pub async fn api_base_url(&self) -> Result<String, QboError> {
        let settings = self.settings.snapshot().await;
        if let Some(base) = settings
            .quickbooks
            .api_base_url
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
        {
            return Ok(base.trim_end_matches('/').to_string());
        }
        Ok(self.environment().await?.api_base_url().to_string())
    }

    pub async fn minor_version(&self) -> u32 {
        self.settings.snapshot().await.quickbooks.minor_version
    }

    /// Persist client id/secret (and optionally realm) to the active backend.
    pub async fn store_credentials(
        &self,
        client_id: &str,
        client_secret: &str,
        realm_id: Option<&str>,
    ) -> Result<(), QboError> {
        match self.secrets.as_deref() {
            Some(secrets) => {
                let mut entries = vec![(KEY_CLIENT_ID, client_id), (KEY_CLIENT_SECRET, client_secret)];
                if let Some(realm) = realm_id {
                    entries.push((KEY_REALM_ID, realm));
                }
                secrets.set_secrets(&entries).await?;
            }
            None => {
                self.settings
                    .update(|settings| {
                        settings.quickbooks.client_id = Some(client_id.to_string());
                        settings.quickbooks.client_secret = Some(client_secret.to_string());
                        if let Some(realm) = realm_id {
                            settings.quickbooks.realm_id = Some(realm.to_string());
                        }
                    })
                    .await?;
            }
        }
        tracing::info!(client_id, "stored QuickBooks app credentials");
        self.credentials.invalidate().await;
        Ok(())
    }

    async fn load(&self) -> Result<OAuthCredentials, QboError> {
        let settings = self.settings.snapshot().await;
        let qb = &settings.quickbooks;

        let client_id = self
            .resolve(KEY_CLIENT_ID, self.env.client_id.as_deref(), qb.client_id.as_deref())
            .await?
            .ok_or_else(|| {
                QboError::MissingConfiguration(
                    "QuickBooks client id is not set. Run `qblink set-credentials` or set QUICKBOOKS_CLIENT_ID."
                        .to_string(),
                )
            })?;
        let client_secret = self
            .resolve(
                KEY_CLIENT_SECRET,
                self.env.client_secret.as_deref(),
                qb.client_secret.as_deref(),
            )
            .await?
            .ok_or_else(|| {
                QboError::MissingConfiguration(
                    "QuickBooks client secret is not set. Run `qblink set-credentials` or set QUICKBOOKS_CLIENT_SECRET."
                        .to_string(),
                )
            })?;
        let redirect_uri = self
            .resolve(
                KEY_REDIRECT_URI,
                self.env.redirect_uri.as_deref(),
                Some(qb.redirect_uri.as_str()),
            )
            .await?
            .unwrap_or_else(|| crate::config::DEFAULT_REDIRECT_URI.to_string());
        let environment = self.environment().await?;

        tracing::debug!(
            environment = %environment,
            from_secret_store = self.secrets.is_some(),
            "loaded QuickBooks credentials"
        );
        Ok(OAuthCredentials {
            client_id,
            client_secret,
            redirect_uri,
            environment,
        })
    }

    async fn resolve(
        &self,
        secret_key: &str,
        env_value: Option<&str>,
        settings_value: Option<&str>,
    ) -> Result<Option<String>, QboError> {
        if let Some(secrets) = self.secrets.as_deref() {
            if let Some(value) = non_empty_secret(secrets, secret_key).await? {
                return Ok(Some(value));
            }
        }
        let fallback = env_value
            .or(settings_value)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Ok(fallback)
    }
}
