//! Stamps build metadata into `qblink --version`.
//!
//! Missing git or date tooling yields "unknown" markers instead of failing the build.

use std::env;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    if let Some(reference) = head_reference() {
        println!("cargo:rerun-if-changed=.git/{reference}");
    }

    let git_hash = stamp("QBLINK_BUILD_GIT_HASH", || {
        command_output("git", &["rev-parse", "--short=12", "HEAD"])
            .unwrap_or_else(|| "unknown".to_string())
    });
    let timestamp = stamp("QBLINK_BUILD_TIMESTAMP", || {
        command_output("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"]).unwrap_or_else(|| {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|delta| delta.as_secs())
                .unwrap_or(0);
            format!("unix:{secs}")
        })
    });

    println!("cargo:rustc-env=QBLINK_BUILD_GIT_HASH={git_hash}");
    println!("cargo:rustc-env=QBLINK_BUILD_TIMESTAMP={timestamp}");
}

/// Env var wins over the computed fallback so packagers can pin reproducible values.
fn stamp(var: &str, fallback: impl FnOnce() -> String) -> String {
    println!("cargo:rerun-if-env-changed={var}");
    env::var(var).unwrap_or_else(|_| fallback())
}

fn head_reference() -> Option<String> {
    let head = std::fs::read_to_string(".git/HEAD").ok()?;
    head.trim().strip_prefix("ref: ").map(str::to_string)
}

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
