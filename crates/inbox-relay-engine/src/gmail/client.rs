use anyhow::{Context, anyhow};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::api::{
    GmailMessage, GoogleErrorEnvelope, HistoryRecord, HistoryResponse, WatchRequest,
    WatchResponse,
};
use crate::checkpoint::HistoryId;
use crate::error::RelayError;
use crate::provider::MailProvider;
use crate::session::Session;

pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Gmail REST client authenticated through the shared [`Session`].
#[derive(Clone)]
pub struct GmailApi {
    http: Client,
    base_url: String,
    session: Session,
}

impl GmailApi {
    pub fn new(session: Session) -> Self {
        Self::with_base_url(session, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(session: Session, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            session,
        }
    }

    async fn history_page(
        &self,
        start: HistoryId,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse, RelayError> {
        let access_token = self.session.access_token().await?;
        let mut query = vec![
            ("startHistoryId", start.to_string()),
            ("historyTypes", "messageAdded".to_owned()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_owned()));
        }

        let request = self
            .http
            .get(format!("{}/users/me/history", self.base_url))
            .query(&query)
            .bearer_auth(access_token);

        match send_google_json(request, "Gmail history list").await {
            Err(GoogleCallError::Status(StatusCode::NOT_FOUND, _)) => {
                Err(RelayError::HistoryExpired(start.get()))
            }
            other => other.map_err(RelayError::from),
        }
    }
}

impl MailProvider for GmailApi {
    async fn create_or_renew_watch(
        &self,
        topic_name: &str,
        label_ids: &[String],
    ) -> Result<WatchResponse, RelayError> {
        let access_token = self.session.access_token().await?;
        let body = WatchRequest {
            topic_name: topic_name.to_owned(),
            label_ids: label_ids.to_vec(),
        };

        let request = self
            .http
            .post(format!("{}/users/me/watch", self.base_url))
            .json(&body)
            .bearer_auth(access_token);

        Ok(send_google_json(request, "Gmail watch").await?)
    }

    async fn list_history_since(&self, start: HistoryId) -> Result<Vec<HistoryRecord>, RelayError> {
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.history_page(start, page_token.as_deref()).await?;
            records.extend(page.history.unwrap_or_default());

            match page.next_page_token {
                Some(token) => {
                    debug!(%start, "following history page token");
                    page_token = Some(token);
                }
                None => break,
            }
        }

        Ok(records)
    }

    async fn get_message(&self, id: &str) -> Result<GmailMessage, RelayError> {
        let access_token = self.session.access_token().await?;
        let request = self
            .http
            .get(format!("{}/users/me/messages/{id}", self.base_url))
            .query(&[("format", "full")])
            .bearer_auth(access_token);

        Ok(send_google_json(request, "Gmail message get").await?)
    }
}

#[derive(Debug)]
enum GoogleCallError {
    Status(StatusCode, String),
    Other(anyhow::Error),
}

impl From<GoogleCallError> for RelayError {
    fn from(error: GoogleCallError) -> Self {
        match error {
            GoogleCallError::Status(StatusCode::UNAUTHORIZED, message) => {
                RelayError::AuthInvalid(message)
            }
            GoogleCallError::Status(_, message) => RelayError::ProviderFetch(message),
            GoogleCallError::Other(error) => RelayError::provider(error),
        }
    }
}

async fn send_google_json<T>(request: RequestBuilder, endpoint: &str) -> Result<T, GoogleCallError>
where
    T: DeserializeOwned,
{
    let response = request
        .send()
        .await
        .with_context(|| format!("{endpoint} request failed"))
        .map_err(GoogleCallError::Other)?;
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("{endpoint} response could not be read"))
        .map_err(GoogleCallError::Other)?;

    if !status.is_success() {
        let mut msg = format!("{endpoint} returned HTTP {status}");
        if let Some(detail) = google_error_detail(&body) {
            msg.push_str(&format!(": {detail}"));
            if let Some(hint) = google_error_hint(&detail) {
                msg.push_str(&format!(" (hint: {hint})"));
            }
        } else {
            let raw = body.lines().next().unwrap_or("").trim();
            if !raw.is_empty() {
                msg.push_str(&format!(": {raw}"));
            }
        }
        return Err(GoogleCallError::Status(status, msg));
    }

    serde_json::from_str(&body)
        .map_err(|error| GoogleCallError::Other(anyhow!("{endpoint} returned invalid JSON: {error}")))
}

fn google_error_detail(body: &str) -> Option<String> {
    let parsed: GoogleErrorEnvelope = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let mut detail = error.message?;

    if let Some(first_reason) = error
        .errors
        .and_then(|items| items.into_iter().find_map(|item| item.reason))
    {
        detail.push_str(&format!(" (reason: {first_reason})"));
    }

    Some(detail)
}

fn google_error_hint(detail: &str) -> Option<&'static str> {
    let lowered = detail.to_ascii_lowercase();

    if lowered.contains("has not been used in project") || lowered.contains("is disabled") {
        return Some("enable the Gmail API in the project that owns the OAuth client");
    }

    if lowered.contains("insufficient authentication scopes")
        || lowered.contains("insufficientpermissions")
        || lowered.contains("insufficient permission")
    {
        return Some("re-authorize so the gmail.readonly scope is granted again");
    }

    if lowered.contains("topic") && lowered.contains("permission") {
        return Some("grant gmail-api-push@system.gserviceaccount.com publish rights on the topic");
    }

    None
}
