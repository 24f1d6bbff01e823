//! Process-wide wiring of the QuickBooks components.
//!
//! Built once at startup and shared by reference; nothing here is global.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    CredentialProvider, OAuthEndpoints, ServiceContextBuilder, TokenExchangeClient, TokenVault,
};
use crate::config::{LoadedSettings, SettingsStore};
use crate::qbo::{build_http_client, QuickBooksService, RetryPolicy};
use crate::secrets::{EncryptedFileSecretStore, SecretStore};

/// Owns every long-lived component.
pub struct QuickBooksConnection {
    pub settings: Arc<SettingsStore>,
    pub secrets: Option<Arc<dyn SecretStore>>,
    pub credentials: Arc<CredentialProvider>,
    pub vault: Arc<TokenVault>,
    pub exchange: Arc<TokenExchangeClient>,
    pub contexts: Arc<ServiceContextBuilder>,
    pub service: Arc<QuickBooksService>,
}

impl QuickBooksConnection {
    /// Wire components from loaded settings.
    ///
    /// With `use_secret_store` (and `[secrets].enabled`), credentials and
    /// tokens live in the encrypted secret file; otherwise the settings
    /// file is the fallback store.
    pub fn open(loaded: LoadedSettings, use_secret_store: bool) -> Self {
        let secrets: Option<Arc<dyn SecretStore>> =
            if use_secret_store && loaded.settings.secrets.enabled {
                match loaded.secrets_path() {
                    Some(path) => {
                        tracing::debug!(path = %path.display(), "using encrypted secret store");
                        Some(Arc::new(EncryptedFileSecretStore::new(path)))
                    }
                    None => {
                        tracing::warn!("no config directory found; falling back to the settings file for secrets");
                        None
                    }
                }
            } else {
                None
            };
        Self::from_parts(loaded, secrets)
    }

    /// Wire components around an explicit (optional) secret store.
    pub fn from_parts(loaded: LoadedSettings, secrets: Option<Arc<dyn SecretStore>>) -> Self {
        let timeout = Duration::from_secs(loaded.http_timeout_secs());
        let endpoints = OAuthEndpoints::resolve(&loaded.settings.quickbooks, &loaded.env);
        let retry_policy = RetryPolicy::from_settings(&loaded.settings.network);
        let settings = Arc::new(SettingsStore::new(
            loaded.persist_path.clone(),
            loaded.settings,
        ));

        let http = build_http_client(timeout);
        let credentials = Arc::new(CredentialProvider::new(
            secrets.clone(),
            Arc::clone(&settings),
            loaded.env,
        ));
        let vault = Arc::new(TokenVault::new(secrets.clone(), Arc::clone(&settings)));
        let exchange = Arc::new(TokenExchangeClient::new(
            http.clone(),
            Arc::clone(&credentials),
            Arc::clone(&vault),
            endpoints,
        ));
        let contexts = Arc::new(ServiceContextBuilder::new(
            Arc::clone(&credentials),
            Arc::clone(&vault),
        ));
        let service = Arc::new(QuickBooksService::new(
            http,
            Arc::clone(&contexts),
            Arc::clone(&exchange),
            retry_policy,
        ));

        Self {
            settings,
            secrets,
            credentials,
            vault,
            exchange,
            contexts,
            service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QuickBooksEnv, Settings, SettingsSource};
    use crate::error::ErrorKind;
    use crate::secrets::{
        MemorySecretStore, KEY_ACCESS_TOKEN, KEY_CLIENT_ID, KEY_CLIENT_SECRET, KEY_REALM_ID,
        KEY_REFRESH_TOKEN,
    };
    use crate::testsupport::{ScriptedResponse, ScriptedServer, TestTempDir};

    fn loaded(settings: Settings, persist_path: Option<std::path::PathBuf>) -> LoadedSettings {
        LoadedSettings {
            settings,
            env: QuickBooksEnv::default(),
            source: SettingsSource::BuiltInDefaults,
            persist_path,
        }
    }

    #[tokio::test]
    async fn disabled_secret_store_persists_tokens_to_settings_file() {
        let dir = TestTempDir::new("connection-settings");
        let path = dir.child("qblink.toml");
        let mut settings = Settings::default();
        settings.secrets.enabled = false;

        let connection = QuickBooksConnection::open(loaded(settings, Some(path.clone())), true);
        assert!(connection.secrets.is_none());

        connection
            .vault
            .replace(crate::auth::TokenSet::new("at", "rt", chrono::Utc::now()))
            .await
            .unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[tokens]"), "written: {written}");
        assert!(written.contains("access_token = \"at\""));
    }

    #[tokio::test]
    async fn secret_store_path_comes_from_settings() {
        let dir = TestTempDir::new("connection-secrets");
        let mut settings = Settings::default();
        settings.secrets.path = Some(dir.child("secrets.json").display().to_string());

        let connection = QuickBooksConnection::open(loaded(settings, None), true);
        assert!(connection.secrets.is_some());
        assert!(QuickBooksConnection::open(loaded(Settings::default(), None), false)
            .secrets
            .is_none());
    }

    /// Connection whose token endpoint and data API both point at `server`.
    fn connect(server: &ScriptedServer, store: Arc<MemorySecretStore>) -> QuickBooksConnection {
        let mut settings = Settings::default();
        settings.quickbooks.api_base_url = Some(server.url(""));
        settings.quickbooks.token_url = Some(server.url("/oauth2/v1/tokens/bearer"));
        settings.network.initial_backoff_ms = 1;
        let secrets: Arc<dyn SecretStore> = store;
        QuickBooksConnection::from_parts(loaded(settings, None), Some(secrets))
    }

    fn app_store(extra: &[(&str, &str)]) -> Arc<MemorySecretStore> {
        let mut entries = vec![(KEY_CLIENT_ID, "client"), (KEY_CLIENT_SECRET, "secret")];
        entries.extend_from_slice(extra);
        Arc::new(MemorySecretStore::with_entries(entries))
    }

    #[tokio::test]
    async fn authorize_query_then_recover_from_revoked_token() {
        let server = ScriptedServer::start(vec![
            ScriptedResponse::json(
                200,
                r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":3600}"#,
            ),
            ScriptedResponse::json(
                200,
                r#"{"QueryResponse":{"Customer":[{"Id":"1","DisplayName":"Town of Wiley"}]}}"#,
            ),
            ScriptedResponse::json(401, r#"{"fault":{"error":[{"message":"Token revoked"}]}}"#),
            ScriptedResponse::json(
                200,
                r#"{"access_token":"at-2","refresh_token":"rt-2","expires_in":3600}"#,
            ),
            ScriptedResponse::json(
                200,
                r#"{"QueryResponse":{"Account":[{"Id":"35","Name":"Checking"}]}}"#,
            ),
        ])
        .await;
        let store = app_store(&[(KEY_REALM_ID, "4620816365")]);
        let connection = connect(&server, Arc::clone(&store));

        let status = connection.service.get_connection_status().await.unwrap();
        assert!(!status.is_connected);

        connection
            .exchange
            .exchange_code_for_token("code-from-redirect")
            .await
            .unwrap();
        assert_eq!(
            store.get_secret(KEY_ACCESS_TOKEN).await.unwrap().as_deref(),
            Some("at-1")
        );

        let customers = connection.service.get_customers().await.unwrap();
        assert_eq!(customers[0].display_name.as_deref(), Some("Town of Wiley"));

        let accounts = connection.service.get_chart_of_accounts().await.unwrap();
        assert_eq!(accounts[0].name.as_deref(), Some("Checking"));
        assert_eq!(
            store.get_secret(KEY_REFRESH_TOKEN).await.unwrap().as_deref(),
            Some("rt-2")
        );

        let paths: Vec<String> = server.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths.len(), 5);
        assert!(paths[1].starts_with("/v3/company/4620816365/query?"));
        assert_eq!(paths[3], "/oauth2/v1/tokens/bearer");

        let status = connection.service.get_connection_status().await.unwrap();
        assert!(status.is_connected);
        assert!(status.last_sync_time.is_some());
    }

    #[tokio::test]
    async fn failed_exchange_keeps_store_and_reports_transient() {
        let server =
            ScriptedServer::start(vec![ScriptedResponse::json(400, r#"{"error":"invalid_grant"}"#)])
                .await;
        let store = app_store(&[(KEY_REALM_ID, "4620816365")]);
        let connection = connect(&server, Arc::clone(&store));

        let err = connection
            .exchange
            .exchange_code_for_token("stale-code")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(store.get_secret(KEY_ACCESS_TOKEN).await.unwrap(), None);
        assert_eq!(store.get_secret(KEY_REFRESH_TOKEN).await.unwrap(), None);
    }

    #[tokio::test]
    async fn refresh_without_tokens_never_hits_the_network() {
        let server = ScriptedServer::start(vec![]).await;
        let connection = connect(&server, app_store(&[(KEY_REALM_ID, "4620816365")]));

        let err = connection.exchange.refresh_access_token().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn missing_realm_is_configuration_not_authentication() {
        let server = ScriptedServer::start(vec![]).await;
        let connection = connect(&server, app_store(&[]));

        let err = connection.contexts.create_service_context().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
