//! Persisted settings store.
//!
//! This is the degraded fallback for token persistence when no secret store
//! is available. Every save rewrites the whole file through a temp file and
//! rename, so a crash mid-write leaves the previous contents intact.

use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::ConfigError;

use super::types::Settings;

/// Owns the current [`Settings`] and where to write them.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: Option<PathBuf>, settings: Settings) -> Self {
        Self {
            path,
            current: RwLock::new(settings),
        }
    }

    /// Store that never touches disk.
    pub fn in_memory(settings: Settings) -> Self {
        Self::new(None, settings)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn snapshot(&self) -> Settings {
        self.current.read().await.clone()
    }

    /// Apply `change` and persist the result.
    ///
    /// The in-memory copy is only swapped after the file write succeeds.
    pub async fn update<F>(&self, change: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut guard = self.current.write().await;
        let mut next = guard.clone();
        change(&mut next);
        if let Some(path) = self.path.as_deref() {
            write_settings_atomic(path, &next)?;
        }
        *guard = next;
        Ok(())
    }
}

/// Serialize `settings` to `path` via a sibling temp file.
pub fn write_settings_atomic(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let text = toml::to_string_pretty(settings)?;
    // Settings may carry a client secret and tokens.
    write_private_file_atomic(path, text.as_bytes())?;
    Ok(())
}

/// Replace `path` with `bytes` through a synced 0600 sibling `.tmp` file and
/// a rename, so readers see either the old or the new contents.
pub(crate) fn write_private_file_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut options = std::fs::OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp)?;
    #[cfg(unix)]
    {
        // A stale temp file keeps its old mode through `open`.
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);

    let result = written.and_then(|()| std::fs::rename(&tmp, path));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}
