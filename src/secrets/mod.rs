//! Secret store contract and backends.
//!
//! The secret store is the source of truth for client credentials and tokens.
//! Callers hold it as `Option<Arc<dyn SecretStore>>`; `None` means the
//! settings file is used instead.

mod crypto;
mod file;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::error::SecretError;

pub use file::EncryptedFileSecretStore;

pub const KEY_ACCESS_TOKEN: &str = "QuickBooksAccessToken";
pub const KEY_REFRESH_TOKEN: &str = "QuickBooksRefreshToken";
pub const KEY_TOKEN_EXPIRY: &str = "QuickBooksTokenExpiry";
pub const KEY_CLIENT_ID: &str = "QuickBooksClientId";
pub const KEY_CLIENT_SECRET: &str = "QuickBooksClientSecret";
pub const KEY_REALM_ID: &str = "QuickBooksRealmId";
pub const KEY_ENVIRONMENT: &str = "QuickBooksEnvironment";
pub const KEY_REDIRECT_URI: &str = "QuickBooksRedirectUri";

/// Named string secrets with async access.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, SecretError>;

    async fn set_secret(&self, name: &str, value: &str) -> Result<(), SecretError>;

    async fn delete_secret(&self, name: &str) -> Result<(), SecretError>;

    /// Write several entries together.
    ///
    /// Backends that can persist in one step should override this; the
    /// default writes entries one by one.
    async fn set_secrets(&self, entries: &[(&str, &str)]) -> Result<(), SecretError> {
        for (name, value) in entries {
            self.set_secret(name, value).await?;
        }
        Ok(())
    }
}

/// Process-local secret store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, SecretError> {
        Ok(self.values.lock().await.get(name).cloned())
    }

    async fn set_secret(&self, name: &str, value: &str) -> Result<(), SecretError> {
        self.values
            .lock()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<(), SecretError> {
        self.values.lock().await.remove(name);
        Ok(())
    }

    async fn set_secrets(&self, entries: &[(&str, &str)]) -> Result<(), SecretError> {
        let mut values = self.values.lock().await;
        for (name, value) in entries {
            values.insert((*name).to_string(), (*value).to_string());
        }
        Ok(())
    }
}

/// Read a secret and treat blank values as absent.
pub async fn non_empty_secret(
    store: &dyn SecretStore,
    name: &str,
) -> Result<Option<String>, SecretError> {
    Ok(store
        .get_secret(name)
        .await?
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty()))
}

#[cfg(test)]
pub(crate) use crypto::fast_kdf_params;
