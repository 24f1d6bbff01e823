//! Single source of truth for the current [`TokenSet`].
//!
//! The snapshot is only swapped after the backing store accepted all three
//! fields, and the swap happens under the write lock, so readers never see a
//! new access token paired with an old refresh token.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::SettingsStore;
use crate::error::QboError;
use crate::secrets::{
    non_empty_secret, SecretStore, KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_TOKEN_EXPIRY,
};

use super::types::TokenSet;

#[derive(Debug, Default)]
struct TokenSlot {
    loaded: bool,
    tokens: Option<TokenSet>,
    generation: u64,
}

/// Holds the current token pair and persists replacements.
pub struct TokenVault {
    secrets: Option<Arc<dyn SecretStore>>,
    settings: Arc<SettingsStore>,
    slot: RwLock<TokenSlot>,
}

impl TokenVault {
    pub fn new(secrets: Option<Arc<dyn SecretStore>>, settings: Arc<SettingsStore>) -> Self {
        Self {
            secrets,
            settings,
            slot: RwLock::new(TokenSlot::default()),
        }
    }

    /// Current tokens, reading the backing store on first use.
    pub async fn current(&self) -> Result<Option<TokenSet>, QboError> {
        {
            let slot = self.slot.read().await;
            if slot.loaded {
                return Ok(slot.tokens.clone());
            }
        }

        let mut slot = self.slot.write().await;
        if !slot.loaded {
            slot.tokens = self.load_persisted().await?;
            slot.loaded = true;
        }
        Ok(slot.tokens.clone())
    }

    /// Number of successful replacements since this vault was created.
    pub async fn generation(&self) -> u64 {
        self.slot.read().await.generation
    }

    /// Persist `tokens` and make them current.
    ///
    /// On a persistence error the previous tokens stay current.
    pub async fn replace(&self, tokens: TokenSet) -> Result<u64, QboError> {
        let mut slot = self.slot.write().await;
        self.persist(Some(&tokens)).await?;
        slot.tokens = Some(tokens);
        slot.loaded = true;
        slot.generation += 1;
        tracing::debug!(generation = slot.generation, "token set replaced");
        Ok(slot.generation)
    }

    /// Remove stored tokens.
    pub async fn clear(&self) -> Result<(), QboError> {
        let mut slot = self.slot.write().await;
        self.persist(None).await?;
        slot.tokens = None;
        slot.loaded = true;
        slot.generation += 1;
        Ok(())
    }

    async fn persist(&self, tokens: Option<&TokenSet>) -> Result<(), QboError> {
        match (self.secrets.as_deref(), tokens) {
            (Some(secrets), Some(tokens)) => {
                let expiry = tokens.expires_at.to_rfc3339();
                secrets
                    .set_secrets(&[
                        (KEY_ACCESS_TOKEN, tokens.access_token.as_str()),
                        (KEY_REFRESH_TOKEN, tokens.refresh_token.as_str()),
                        (KEY_TOKEN_EXPIRY, expiry.as_str()),
                    ])
                    .await?;
            }
            (Some(secrets), None) => {
                for key in [KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_TOKEN_EXPIRY] {
                    secrets.delete_secret(key).await?;
                }
            }
            (None, tokens) => {
                self.settings
                    .update(|settings| {
                        settings.tokens.access_token = tokens.map(|t| t.access_token.clone());
                        settings.tokens.refresh_token = tokens.map(|t| t.refresh_token.clone());
                        settings.tokens.expires_at = tokens.map(|t| t.expires_at);
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn load_persisted(&self) -> Result<Option<TokenSet>, QboError> {
        let (access, refresh, expires_at) = match self.secrets.as_deref() {
            Some(secrets) => {
                let access = non_empty_secret(secrets, KEY_ACCESS_TOKEN).await?;
                let refresh = non_empty_secret(secrets, KEY_REFRESH_TOKEN).await?;
                let expiry = non_empty_secret(secrets, KEY_TOKEN_EXPIRY).await?;
                (access, refresh, expiry.as_deref().and_then(parse_expiry))
            }
            None => {
                let stored = self.settings.snapshot().await.tokens;
                (stored.access_token, stored.refresh_token, stored.expires_at)
            }
        };

        if access.is_none() && refresh.is_none() {
            return Ok(None);
        }
        // Unknown expiry is treated as already expired (the default is the epoch).
        let expires_at = expires_at.unwrap_or_default();
        Ok(Some(TokenSet::new(
            access.unwrap_or_default(),
            refresh.unwrap_or_default(),
            expires_at,
        )))
    }
}

/// Accept RFC 3339 or bare unix seconds.
fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}
