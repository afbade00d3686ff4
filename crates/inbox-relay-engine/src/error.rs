use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The refresh credential was revoked or expired; a new authorization is required.
    #[error("authorization is no longer valid: {0}")]
    AuthInvalid(String),

    /// Token refresh failed for a reason that may resolve on its own.
    #[error("token refresh failed: {0}")]
    AuthTransient(String),

    #[error("provider request failed: {0}")]
    ProviderFetch(String),

    /// The start cursor is older than the history the provider retains.
    #[error("history cursor {0} expired")]
    HistoryExpired(u64),

    #[error("malformed notification: {0}")]
    MalformedNotification(String),

    #[error("state storage failed: {0}")]
    Storage(String),
}

impl RelayError {
    pub fn storage(error: anyhow::Error) -> Self {
        RelayError::Storage(format!("{error:#}"))
    }

    pub fn provider(error: anyhow::Error) -> Self {
        RelayError::ProviderFetch(format!("{error:#}"))
    }

    pub fn is_auth_invalid(&self) -> bool {
        matches!(self, RelayError::AuthInvalid(_))
    }
}
