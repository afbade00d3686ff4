use std::sync::Arc;
use tokio::sync::RwLock;

use crate::credential::Credential;
use crate::error::RelayError;

/// The active credential shared by the token manager (writer) and the
/// provider clients (readers). Cloning yields another handle to the same
/// session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    credential: Arc<RwLock<Option<Credential>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, credential: Credential) {
        *self.credential.write().await = Some(credential);
    }

    pub async fn clear(&self) {
        *self.credential.write().await = None;
    }

    pub async fn credential(&self) -> Option<Credential> {
        self.credential.read().await.clone()
    }

    pub async fn is_authorized(&self) -> bool {
        self.credential.read().await.is_some()
    }

    /// Bearer token for provider calls; fails with `AuthInvalid` while the
    /// relay is waiting for a new authorization.
    pub async fn access_token(&self) -> Result<String, RelayError> {
        self.credential
            .read()
            .await
            .as_ref()
            .map(|credential| credential.access_token.clone())
            .ok_or_else(|| RelayError::AuthInvalid("no active credential".to_owned()))
    }
}
