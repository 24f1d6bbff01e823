//! Setup validation run before talking to Intuit.
//!
//! These checks surface common configuration mistakes as actionable errors
//! instead of raw OAuth or API failures.

use std::net::IpAddr;

use crate::auth::CredentialProvider;

/// Validate that credentials, redirect URI, realm and API host are usable.
pub async fn validate_setup(credentials: &CredentialProvider) -> Result<(), String> {
    let creds = credentials
        .credentials()
        .await
        .map_err(|err| err.to_string())?;
    validate_http_url("redirect_uri", &creds.redirect_uri)?;

    match credentials.realm_id().await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(
                "No QuickBooks realm id configured. Set `quickbooks.realm_id` in qblink.toml, QUICKBOOKS_REALM_ID, or run `qblink set-credentials --realm-id <id>`."
                    .to_string(),
            );
        }
        Err(err) => return Err(format!("failed to read realm id: {err}")),
    }

    let base_url = credentials
        .api_base_url()
        .await
        .map_err(|err| err.to_string())?;
    validate_http_url("api_base_url", &base_url)?;
    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("`{field}` is empty"));
    }
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|err| format!("invalid {field} `{trimmed}`: {err}"))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(format!(
                "invalid {field} `{trimmed}`: unsupported scheme `{other}` (expected http or https)"
            ));
        }
    }
    if parsed.host_str().is_none() {
        return Err(format!("invalid {field} `{trimmed}`: missing host"));
    }
    Ok(())
}

/// True for `localhost` and loopback IP hosts.
pub fn is_localhost_endpoint(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url.trim()) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()
        .is_some_and(|ip| ip.is_loopback())
}
