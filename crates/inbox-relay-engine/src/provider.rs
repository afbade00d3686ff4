use std::future::Future;
use url::Url;

use crate::checkpoint::HistoryId;
use crate::credential::{Credential, TokenGrant};
use crate::error::RelayError;
use crate::gmail::api::{GmailMessage, HistoryRecord, WatchResponse};

pub trait MailProvider: Send + Sync {
    fn create_or_renew_watch(
        &self,
        topic_name: &str,
        label_ids: &[String],
    ) -> impl Future<Output = Result<WatchResponse, RelayError>> + Send;

    /// All change records after `start`, in provider order, across pages.
    /// `start` itself is not re-delivered.
    fn list_history_since(
        &self,
        start: HistoryId,
    ) -> impl Future<Output = Result<Vec<HistoryRecord>, RelayError>> + Send;

    fn get_message(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<GmailMessage, RelayError>> + Send;
}

pub trait AuthProvider: Send + Sync {
    /// Consent URL the operator must visit to grant offline access.
    fn authorization_url(&self) -> Result<Url, RelayError>;

    fn exchange_auth_code(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<TokenGrant, RelayError>> + Send;

    /// Fails with `AuthInvalid` when the provider reports `invalid_grant`
    /// or `unauthorized_client`, and `AuthTransient` otherwise.
    fn refresh_access_token(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<TokenGrant, RelayError>> + Send;
}
