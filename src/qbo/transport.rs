//! HTTP transport helpers for the QuickBooks v3 REST API.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use std::time::{Duration, SystemTime};

use crate::error::QboError;

/// Build an HTTP client with timeout applied.
pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    // Fall back to reqwest defaults if builder creation fails for any reason.
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("qblink/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// One authenticated GET returning the decoded JSON document.
///
/// Non-2xx becomes `QboError::Status`; a `Fault` document becomes
/// `QboError::InvalidResponse` even when the status was 200.
pub(super) async fn get_json(
    http: &reqwest::Client,
    url: &str,
    params: &[(&str, &str)],
    bearer: &str,
) -> Result<Value, QboError> {
    let response = http
        .get(url)
        .query(params)
        .bearer_auth(bearer)
        .header("Accept", "application/json")
        .send()
        .await?;

    let status = response.status().as_u16();
    if !response.status().is_success() {
        let retry_after_secs = parse_retry_after_secs(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(QboError::status(status, body, retry_after_secs));
    }

    let body = response.text().await?;
    let document: Value = serde_json::from_str(&body).map_err(|err| {
        QboError::InvalidResponse(format!("response body is not JSON ({err})"))
    })?;
    if let Some(fault) = document.get("Fault") {
        return Err(QboError::InvalidResponse(describe_fault(fault)));
    }
    Ok(document)
}

/// `Retry-After` as delay-seconds or an HTTP date.
pub(super) fn parse_retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    let at = httpdate::parse_http_date(raw).ok()?;
    Some(
        at.duration_since(SystemTime::now())
            .unwrap_or_default()
            .as_secs(),
    )
}

/// Flatten `{"Fault":{"type":..,"Error":[{"Message":..,"Detail":..,"code":..}]}}`.
fn describe_fault(fault: &Value) -> String {
    let kind = fault
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("Fault");
    let errors: Vec<String> = fault
        .get("Error")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|error| {
                    let message = error.get("Message").and_then(Value::as_str).unwrap_or("");
                    let code = error.get("code").and_then(Value::as_str).unwrap_or("?");
                    match error.get("Detail").and_then(Value::as_str) {
                        Some(detail) if !detail.is_empty() => {
                            format!("[{code}] {message}: {detail}")
                        }
                        _ => format!("[{code}] {message}"),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    if errors.is_empty() {
        kind.to_string()
    } else {
        format!("{kind}: {}", errors.join("; "))
    }
}
