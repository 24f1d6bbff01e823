//! QuickBooks Online OAuth2 token lifecycle.
//!
//! Credentials are loaded lazily once per process, tokens live in a
//! [`TokenVault`] backed by the secret store (or the settings file), and
//! [`TokenExchangeClient`] talks to Intuit's token endpoint.

mod context;
mod credentials;
mod exchange;
mod types;
mod vault;

pub use context::ServiceContextBuilder;
pub use credentials::CredentialProvider;
pub use exchange::{
    OAuthEndpoints, TokenExchangeClient, ACCOUNTING_SCOPE, INTUIT_AUTHORIZATION_URL,
    INTUIT_REVOCATION_URL, INTUIT_TOKEN_URL,
};
pub use types::{AuthorizationRequest, ConnectionStatus, OAuthCredentials, RealmContext, TokenSet};
pub use vault::TokenVault;
