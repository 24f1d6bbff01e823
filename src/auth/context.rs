//! Builds the per-call [`RealmContext`] handed to the data API layer.

use std::sync::Arc;

use crate::error::QboError;

use super::credentials::CredentialProvider;
use super::types::RealmContext;
use super::vault::TokenVault;

/// Combines the realm id and current access token into a ready context.
pub struct ServiceContextBuilder {
    credentials: Arc<CredentialProvider>,
    vault: Arc<TokenVault>,
}

impl ServiceContextBuilder {
    pub fn new(credentials: Arc<CredentialProvider>, vault: Arc<TokenVault>) -> Self {
        Self { credentials, vault }
    }

    /// Build a context from the stored realm and token.
    ///
    /// Expiry is not checked here; a stale token surfaces as a 401 from the
    /// data API, which triggers one refresh there.
    pub async fn create_service_context(&self) -> Result<RealmContext, QboError> {
        let realm_id = self.credentials.realm_id().await?.ok_or_else(|| {
            QboError::MissingConfiguration(
                "QuickBooks realm id is not set. Run `qblink set-credentials --realm-id <id>` or set QUICKBOOKS_REALM_ID."
                    .to_string(),
            )
        })?;

        let tokens = self
            .vault
            .current()
            .await?
            .filter(|tokens| tokens.has_access_token())
            .ok_or_else(|| {
                QboError::Unauthorized(
                    "no QuickBooks access token is stored. Re-authenticate with `qblink auth-url` then `qblink exchange <code>`."
                        .to_string(),
                )
            })?;

        Ok(RealmContext {
            realm_id,
            tokens,
            api_base_url: self.credentials.api_base_url().await?,
            minor_version: self.credentials.minor_version().await,
        })
    }
}
