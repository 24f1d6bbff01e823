//! Unified error types for the QuickBooks link.

use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading, parsing, or persisting settings.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Serialize(toml::ser::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Toml(e) => write!(f, "toml: {e}"),
            Self::Serialize(e) => write!(f, "toml write: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        Self::Serialize(e)
    }
}

// ---------------------------------------------------------------------------
// SecretError
// ---------------------------------------------------------------------------

/// Errors raised by secret store backends.
#[derive(Debug)]
pub enum SecretError {
    Io(std::io::Error),
    Invalid(String),
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for SecretError {}

impl From<std::io::Error> for SecretError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Coarse failure classification shared by every outward-facing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Missing client id/secret/realm or unreadable settings. Not retried.
    Configuration,
    /// No usable access or refresh token; the user must re-authorize.
    Authentication,
    /// Network or HTTP failure that may succeed on a later attempt.
    Transient,
    /// The remote side returned something this client cannot recover from.
    Unexpected,
    /// Caller-supplied argument was rejected before any I/O.
    InvalidInput,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Configuration => "configuration",
            Self::Authentication => "authentication",
            Self::Transient => "transient",
            Self::Unexpected => "unexpected",
            Self::InvalidInput => "invalid-input",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// QboError
// ---------------------------------------------------------------------------

/// Errors surfaced by the token lifecycle and the QuickBooks data facade.
#[derive(Debug)]
pub enum QboError {
    Config(ConfigError),
    Secret(SecretError),
    /// A required setting (client id, secret, realm) is absent.
    MissingConfiguration(String),
    /// No usable token; carries re-authorization guidance.
    Unauthorized(String),
    InvalidInput(String),
    /// Token endpoint rejected the exchange/refresh or returned an unparsable body.
    Exchange { status: Option<u16>, detail: String },
    /// Network / reqwest-level error.
    Http(reqwest::Error),
    /// Non-2xx status from the QuickBooks data API.
    Status {
        code: u16,
        body: String,
        retry_after_secs: Option<u64>,
    },
    /// QuickBooks returned a `Fault` document or a body that did not decode.
    InvalidResponse(String),
}

impl QboError {
    pub fn status(code: u16, body: String, retry_after_secs: Option<u64>) -> Self {
        Self::Status {
            code,
            body,
            retry_after_secs,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            Self::Exchange { status, .. } => *status,
            _ => None,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Status {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// Classify this error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::MissingConfiguration(_) => ErrorKind::Configuration,
            Self::Unauthorized(_) => ErrorKind::Authentication,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Exchange { .. } | Self::Http(_) => ErrorKind::Transient,
            Self::Status { code, .. } => match *code {
                401 | 403 => ErrorKind::Authentication,
                408 | 429 | 500..=599 => ErrorKind::Transient,
                _ => ErrorKind::Unexpected,
            },
            Self::Secret(_) | Self::InvalidResponse(_) => ErrorKind::Unexpected,
        }
    }
}

impl fmt::Display for QboError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Secret(e) => write!(f, "secret store: {e}"),
            Self::MissingConfiguration(msg) => write!(f, "missing configuration: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Exchange {
                status: Some(code),
                detail,
            } => write!(f, "token endpoint returned {code}: {detail}"),
            Self::Exchange {
                status: None,
                detail,
            } => write!(f, "token exchange failed: {detail}"),
            Self::Http(e) => write!(f, "http: {e}"),
            Self::Status { code, body, .. } => write!(f, "status {code}: {body}"),
            Self::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for QboError {}

impl From<ConfigError> for QboError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<SecretError> for QboError {
    fn from(e: SecretError) -> Self {
        Self::Secret(e)
    }
}

impl From<reqwest::Error> for QboError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

// ---------------------------------------------------------------------------
// OperationReport
// ---------------------------------------------------------------------------

/// Flat `{success, kind, message}` view of an operation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    pub success: bool,
    pub kind: Option<ErrorKind>,
    pub message: String,
}

impl OperationReport {
    pub fn from_result<T>(result: &Result<T, QboError>, success_message: &str) -> Self {
        match result {
            Ok(_) => Self {
                success: true,
                kind: None,
                message: success_message.to_string(),
            },
            Err(err) => Self {
                success: false,
                kind: Some(err.kind()),
                message: err.to_string(),
            },
        }
    }
}
