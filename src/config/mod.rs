//! Settings loading from TOML files and environment variables.
//!
//! Connection values resolve in this order (highest wins):
//! 1. Secret store entries (see `crate::secrets`).
//! 2. `QUICKBOOKS_*` environment variables.
//! 3. TOML file given via `--config`, else `./qblink.toml`, else
//!    `$XDG_CONFIG_HOME/qblink/qblink.toml` (or `~/.config/qblink/qblink.toml`).
//! 4. Built-in defaults.
//!
//! This module only handles 2–4; the secret-store layer sits in `auth`.

use std::path::PathBuf;

mod env;
mod loader;
mod sources;
mod store;
mod types;

pub use env::{
    QuickBooksEnv, ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_ENVIRONMENT, ENV_HTTP_TIMEOUT_SECS,
    ENV_PRE_LOGIN_URL, ENV_REALM_ID, ENV_REDIRECT_URI,
};
pub use loader::{load_settings, LoadedSettings};
pub use sources::SettingsSource;
pub use store::{write_settings_atomic, SettingsStore};
pub(crate) use store::write_private_file_atomic;
pub use types::{
    Environment, NetworkSettings, QuickBooksSettings, SecretsSettings, Settings, StoredTokens,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_MINOR_VERSION, DEFAULT_REDIRECT_URI,
};

/// Base directory for per-user config (`$XDG_CONFIG_HOME` or `~/.config`).
pub fn config_root_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".config"))
        .or_else(dirs::config_dir)
}

/// Default encrypted secret file (`~/.config/qblink/secrets.json`).
pub fn default_secrets_path() -> Option<PathBuf> {
    config_root_dir().map(|dir| dir.join("qblink").join("secrets.json"))
}

impl LoadedSettings {
    /// Secret file location honoring `[secrets].path`.
    pub fn secrets_path(&self) -> Option<PathBuf> {
        self.settings
            .secrets
            .path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .or_else(default_secrets_path)
    }
}
