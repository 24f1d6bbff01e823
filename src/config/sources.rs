//! Settings-file discovery.
//!
//! Precedence: explicit path > `./qblink.toml` > global file > built-in defaults.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub(super) const LOCAL_SETTINGS_FILE: &str = "qblink.toml";

/// Where the active settings came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsSource {
    /// `--config <path>`.
    Explicit(PathBuf),
    /// `./qblink.toml`.
    Local,
    /// `<config root>/qblink/qblink.toml`.
    Global(PathBuf),
    /// Nothing on disk yet.
    BuiltInDefaults,
}

impl SettingsSource {
    /// File that saves should go to.
    ///
    /// Built-in defaults persist to the global location so a later run picks
    /// the saved tokens up again.
    pub fn persist_path(&self, config_root: Option<PathBuf>) -> Option<PathBuf> {
        match self {
            Self::Explicit(path) | Self::Global(path) => Some(path.clone()),
            Self::Local => Some(PathBuf::from(LOCAL_SETTINGS_FILE)),
            Self::BuiltInDefaults => config_root.map(|root| global_settings_path(&root)),
        }
    }
}

pub(super) fn global_settings_path(root: &Path) -> PathBuf {
    root.join("qblink").join(LOCAL_SETTINGS_FILE)
}

/// Read settings text from the highest-precedence available source.
pub(super) fn read_settings_text_with_sources<FRead, FRoot>(
    path_override: Option<&str>,
    read_file: &FRead,
    config_root: &FRoot,
) -> Result<(String, SettingsSource), ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FRoot: Fn() -> Option<PathBuf>,
{
    if let Some(p) = path_override {
        let path = PathBuf::from(p);
        // An explicit path that does not exist yet is created on first save.
        return match read_file(&path) {
            Ok(text) => Ok((text, SettingsSource::Explicit(path))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok((String::new(), SettingsSource::Explicit(path)))
            }
            Err(err) => Err(ConfigError::Io(err)),
        };
    }

    if let Ok(text) = read_file(Path::new(LOCAL_SETTINGS_FILE)) {
        return Ok((text, SettingsSource::Local));
    }
    if let Some(root) = config_root() {
        let global = global_settings_path(&root);
        if let Ok(text) = read_file(&global) {
            return Ok((text, SettingsSource::Global(global)));
        }
    }

    Ok((String::new(), SettingsSource::BuiltInDefaults))
}
