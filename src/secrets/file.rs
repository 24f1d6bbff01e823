//! Encrypted JSON-file secret store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::config::write_private_file_atomic;
use crate::error::SecretError;

use super::crypto::{EncryptedValue, EncryptionEnvelope, KdfParams, KeyMaterial};
use super::SecretStore;

const SECRET_FILE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct EncryptedSecretFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    encryption: EncryptionEnvelope,
    #[serde(default)]
    secrets: BTreeMap<String, EncryptedValue>,
}

/// Plaintext layout accepted for migration from hand-written files.
#[derive(Debug, Default, Deserialize)]
struct PlaintextSecretFile {
    #[serde(default)]
    secrets: BTreeMap<String, String>,
}

struct LoadedSecrets {
    key: Option<KeyMaterial>,
    values: BTreeMap<String, String>,
}

/// Secret store persisted as an encrypted JSON file with 0600 permissions.
///
/// Values are decrypted once on first access and cached; every mutation
/// rewrites the whole file so multi-key writes land together.
pub struct EncryptedFileSecretStore {
    path: PathBuf,
    kdf: KdfParams,
    state: Mutex<Option<LoadedSecrets>>,
}

impl EncryptedFileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_kdf_params(path, KdfParams::default())
    }

    pub(crate) fn with_kdf_params(path: impl Into<PathBuf>, kdf: KdfParams) -> Self {
        Self {
            path: path.into(),
            kdf,
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decrypt the file on first use; later calls reuse the cached map.
    async fn ensure_loaded(&self, state: &mut Option<LoadedSecrets>) -> Result<(), SecretError> {
        if state.is_none() {
            let path = self.path.clone();
            let kdf = self.kdf;
            *state = Some(run_blocking(move || load_secret_file(&path, kdf)).await?);
        }
        Ok(())
    }

    /// Apply `change` to the decrypted map and persist the result.
    async fn mutate<F>(&self, change: F) -> Result<(), SecretError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let mut guard = self.state.lock().await;
        self.ensure_loaded(&mut *guard).await?;
        let Some(state) = guard.as_mut() else {
            return Ok(());
        };

        let mut next = state.values.clone();
        if !change(&mut next) {
            return Ok(());
        }
        let key = match state.key.clone() {
            Some(key) => key,
            None => {
                let kdf = self.kdf;
                let key = run_blocking(move || KeyMaterial::generate(kdf)).await?;
                state.key = Some(key.clone());
                key
            }
        };
        let path = self.path.clone();
        state.values =
            run_blocking(move || write_secret_file(&path, &key, &next).map(|()| next)).await?;
        Ok(())
    }
}

/// File I/O and scrypt run on the blocking pool.
async fn run_blocking<T, F>(work: F) -> Result<T, SecretError>
where
    F: FnOnce() -> Result<T, SecretError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| SecretError::Invalid(format!("secret store task failed: {err}")))?
}

impl std::fmt::Debug for EncryptedFileSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileSecretStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SecretStore for EncryptedFileSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, SecretError> {
        let mut guard = self.state.lock().await;
        self.ensure_loaded(&mut *guard).await?;
        Ok(guard
            .as_ref()
            .and_then(|state| state.values.get(name).cloned()))
    }

    async fn set_secret(&self, name: &str, value: &str) -> Result<(), SecretError> {
        self.mutate(|values| {
            values.insert(name.to_string(), value.to_string());
            true
        })
        .await
    }

    async fn delete_secret(&self, name: &str) -> Result<(), SecretError> {
        self.mutate(|values| values.remove(name).is_some()).await
    }

    async fn set_secrets(&self, entries: &[(&str, &str)]) -> Result<(), SecretError> {
        self.mutate(|values| {
            for (name, value) in entries {
                values.insert((*name).to_string(), (*value).to_string());
            }
            true
        })
        .await
    }
}

fn load_secret_file(path: &Path, kdf: KdfParams) -> Result<LoadedSecrets, SecretError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(LoadedSecrets {
                key: None,
                values: BTreeMap::new(),
            });
        }
        Err(err) => return Err(SecretError::Io(err)),
    };

    let value: serde_json::Value = serde_json::from_str(&text).map_err(|err| {
        SecretError::Invalid(format!(
            "failed to parse secret store `{}`: {err}",
            path.display()
        ))
    })?;

    if value.get("encryption").and_then(|inner| inner.as_object()).is_some() {
        let file: EncryptedSecretFile = serde_json::from_value(value).map_err(|err| {
            SecretError::Invalid(format!(
                "failed to parse encrypted secret store `{}`: {err}",
                path.display()
            ))
        })?;
        let key = KeyMaterial::open(&file.encryption)?;
        let mut values = BTreeMap::new();
        for (name, record) in &file.secrets {
            values.insert(name.clone(), key.decrypt_value(name, record)?);
        }
        return Ok(LoadedSecrets {
            key: Some(key),
            values,
        });
    }

    let plain: PlaintextSecretFile = serde_json::from_value(value).map_err(|err| {
        SecretError::Invalid(format!(
            "failed to parse secret store `{}`: {err}",
            path.display()
        ))
    })?;
    let mut loaded = LoadedSecrets {
        key: None,
        values: plain.secrets,
    };
    if !loaded.values.is_empty() {
        // Best-effort migration to the encrypted layout.
        match KeyMaterial::generate(kdf)
            .and_then(|key| write_secret_file(path, &key, &loaded.values).map(|()| key))
        {
            Ok(key) => loaded.key = Some(key),
            Err(err) => tracing::warn!(error = %err, "could not encrypt plaintext secret store"),
        }
    }
    Ok(loaded)
}

fn write_secret_file(
    path: &Path,
    key: &KeyMaterial,
    values: &BTreeMap<String, String>,
) -> Result<(), SecretError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700));
        }
    }

    let mut secrets = BTreeMap::new();
    for (name, value) in values {
        secrets.insert(name.clone(), key.encrypt_value(value)?);
    }
    let file = EncryptedSecretFile {
        version: SECRET_FILE_VERSION,
        encryption: key.envelope.clone(),
        secrets,
    };
    let text = serde_json::to_string_pretty(&file)
        .map_err(|err| SecretError::Invalid(format!("failed to serialize secret store: {err}")))?;

    write_private_file_atomic(path, text.as_bytes())?;
    Ok(())
}
