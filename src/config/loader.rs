//! Top-level settings loading pipeline.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::env::QuickBooksEnv;
use super::sources::{read_settings_text_with_sources, SettingsSource};
use super::types::Settings;

/// Settings as read from disk plus the env overrides captured alongside.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub env: QuickBooksEnv,
    pub source: SettingsSource,
    /// Destination for settings-store writes, if one could be resolved.
    pub persist_path: Option<PathBuf>,
}

impl LoadedSettings {
    /// HTTP timeout after applying `QBLINK_HTTP_TIMEOUT_SECS`.
    pub fn http_timeout_secs(&self) -> u64 {
        self.env
            .http_timeout_secs
            .unwrap_or(self.settings.network.http_timeout_secs)
            .max(1)
    }
}

/// Load settings from disk and capture environment overrides.
///
/// `path_override` is an explicit settings file path (from `--config`).
pub fn load_settings(path_override: Option<&str>) -> Result<LoadedSettings, ConfigError> {
    load_settings_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        super::config_root_dir,
    )
}

pub(super) fn load_settings_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<LoadedSettings, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (text, source) = read_settings_text_with_sources(path_override, &read_file, &config_root)?;
    let settings: Settings = toml::from_str(&text)?;
    let env = QuickBooksEnv::from_lookup(env_lookup)?;
    let persist_path = source.persist_path(config_root());
    tracing::debug!(source = ?source, "loaded settings");

    Ok(LoadedSettings {
        settings,
        env,
        source,
        persist_path,
    })
}
