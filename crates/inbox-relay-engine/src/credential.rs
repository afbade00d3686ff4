use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::RelayError;
use crate::store::KeyValueStore;

pub const CREDENTIAL_KEY: &str = "token.json";

/// Persisted OAuth token set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Tokens issued by the provider in a single exchange or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl TokenGrant {
    pub fn access_only(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
            scope: None,
            token_type: None,
        }
    }
}

impl Credential {
    pub fn from_grant(grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: expiry_from(grant.expires_in, now),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            scope: grant.scope,
            token_type: grant.token_type,
        }
    }

    /// Folds a rotation into this credential. Fields the grant leaves out
    /// keep their stored value, so a refresh token is never dropped.
    pub fn merge(&self, grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: expiry_from(grant.expires_in, now).or(self.expires_at),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or_else(|| self.refresh_token.clone()),
            scope: grant.scope.or_else(|| self.scope.clone()),
            token_type: grant.token_type.or_else(|| self.token_type.clone()),
        }
    }

    /// True when the access token is unknown-lived or expires within `margin`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let Some(expires_at) = self.expires_at else {
            return true;
        };
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        expires_at <= now + margin
    }
}

fn expiry_from(expires_in: Option<Duration>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let expires_in = chrono::Duration::from_std(expires_in?).ok()?;
    now.checked_add_signed(expires_in)
}

/// Durable home of the [`Credential`]. All read-modify-write sequences go
/// through one lock so the refresh timer and the OAuth callback cannot
/// interleave.
pub struct CredentialStore<S> {
    store: S,
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> CredentialStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<Option<Credential>, RelayError> {
        let raw = self
            .store
            .get(CREDENTIAL_KEY)
            .await
            .map_err(RelayError::storage)?;

        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|error| RelayError::Storage(format!("stored credential is invalid: {error}"))),
            None => Ok(None),
        }
    }

    /// Replaces the stored record, as after a fresh authorization.
    pub async fn replace(&self, credential: &Credential) -> Result<(), RelayError> {
        let _guard = self.write_lock.lock().await;
        self.write(credential).await
    }

    /// Merges a rotation into the stored record and writes it through.
    pub async fn merge_rotation(
        &self,
        grant: TokenGrant,
        now: DateTime<Utc>,
    ) -> Result<Credential, RelayError> {
        let _guard = self.write_lock.lock().await;
        let merged = match self.load().await? {
            Some(existing) => existing.merge(grant, now),
            None => Credential::from_grant(grant, now),
        };
        self.write(&merged).await?;
        Ok(merged)
    }

    pub async fn clear(&self) -> Result<(), RelayError> {
        let _guard = self.write_lock.lock().await;
        self.store
            .delete(CREDENTIAL_KEY)
            .await
            .map_err(RelayError::storage)
    }

    async fn write(&self, credential: &Credential) -> Result<(), RelayError> {
        let content = serde_json::to_string_pretty(credential)
            .map_err(|error| RelayError::Storage(format!("cannot encode credential: {error}")))?;
        self.store
            .set(CREDENTIAL_KEY, &content)
            .await
            .map_err(RelayError::storage)
    }
}
