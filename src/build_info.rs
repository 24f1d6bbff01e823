//! Compile-time build metadata for `qblink --version`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// VCS commit hash captured at build time.
pub const GIT_COMMIT: &str = env!("QBLINK_BUILD_GIT_HASH");

pub const BUILD_TIMESTAMP: &str = env!("QBLINK_BUILD_TIMESTAMP");

/// Multi-line block printed by `qblink --version`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("QBLINK_BUILD_GIT_HASH"),
    "\nbuilt: ",
    env!("QBLINK_BUILD_TIMESTAMP")
);

/// One-line summary for debug logs.
pub fn metadata_line() -> String {
    format!("qblink v{VERSION} ({GIT_COMMIT}, built {BUILD_TIMESTAMP})")
}
