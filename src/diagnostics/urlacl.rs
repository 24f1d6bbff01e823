//! Windows HTTP.sys URL reservation check for the OAuth redirect URI.
//!
//! A localhost redirect only works on Windows when the listener prefix is
//! reserved for the current user. This only inspects the reservation; it
//! never adds or removes one.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use super::preflight::is_localhost_endpoint;

/// Outcome of a URL ACL inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UrlAclStatus {
    Ready,
    NotReserved,
    /// Not Windows; HTTP.sys reservations do not exist.
    NotApplicable,
    CheckFailed,
}

impl fmt::Display for UrlAclStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ready => "ready",
            Self::NotReserved => "not-reserved",
            Self::NotApplicable => "not-applicable",
            Self::CheckFailed => "check-failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlAclReport {
    pub status: UrlAclStatus,
    /// Prefix that was (or would be) checked, e.g. `http://localhost:8080/callback/`.
    pub prefix: Option<String>,
    pub guidance: String,
}

/// Captured result of one external command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs OS tools; swapped out in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Runs commands with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Inspect the reservation for `redirect_uri` on this machine.
pub async fn check_redirect_urlacl(redirect_uri: &str) -> UrlAclReport {
    check_redirect_urlacl_with(redirect_uri, &SystemCommandRunner, cfg!(windows)).await
}

pub async fn check_redirect_urlacl_with(
    redirect_uri: &str,
    runner: &dyn CommandRunner,
    is_windows: bool,
) -> UrlAclReport {
    let Some(prefix) = listener_prefix(redirect_uri) else {
        return UrlAclReport {
            status: UrlAclStatus::CheckFailed,
            prefix: None,
            guidance: format!("redirect URI `{redirect_uri}` is not a valid http(s) URL"),
        };
    };
    if !is_localhost_endpoint(redirect_uri) {
        return UrlAclReport {
            status: UrlAclStatus::Ready,
            prefix: Some(prefix),
            guidance: "redirect URI is not on localhost; no local listener reservation is needed"
                .to_string(),
        };
    }
    if !is_windows {
        return UrlAclReport {
            status: UrlAclStatus::NotApplicable,
            prefix: Some(prefix),
            guidance: "URL reservations only apply on Windows".to_string(),
        };
    }

    let args = vec![
        "http".to_string(),
        "show".to_string(),
        "urlacl".to_string(),
        format!("url={prefix}"),
    ];
    let report = match runner.run("netsh", &args).await {
        Ok(output) if output.stdout.contains("Reserved URL") => UrlAclReport {
            status: UrlAclStatus::Ready,
            guidance: format!("{prefix} is reserved"),
            prefix: Some(prefix),
        },
        Ok(output) => {
            tracing::debug!(stdout = %output.stdout, stderr = %output.stderr, "netsh found no reservation");
            UrlAclReport {
                status: UrlAclStatus::NotReserved,
                guidance: reservation_guidance(&prefix),
                prefix: Some(prefix),
            }
        }
        Err(err) => UrlAclReport {
            status: UrlAclStatus::CheckFailed,
            guidance: format!(
                "could not run `netsh http show urlacl`: {err}. {}",
                reservation_guidance(&prefix)
            ),
            prefix: Some(prefix),
        },
    };
    tracing::info!(status = %report.status, prefix = ?report.prefix, "redirect URL ACL check");
    report
}

/// `scheme://host:port/path/` with a trailing slash, as HTTP.sys expects.
fn listener_prefix(redirect_uri: &str) -> Option<String> {
    let mut url = reqwest::Url::parse(redirect_uri.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    let mut prefix = url.to_string();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    Some(prefix)
}

fn reservation_guidance(prefix: &str) -> String {
    let user = std::env::var("USERNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "Everyone".to_string());
    format!(
        "Reserve it from an elevated prompt: netsh http add urlacl url={prefix} user={user}"
    )
}
