//! Pub/Sub push envelope parsing.
//!
//! Google Cloud Pub/Sub POSTs `{"message": {"data": <base64 JSON>, ...}}`
//! where the decoded JSON is the Gmail notification
//! `{"emailAddress": ..., "historyId": ...}`.

use serde::Deserialize;
use std::collections::HashMap;

use crate::checkpoint::HistoryId;
use crate::decode::decode_base64_lenient;
use crate::error::RelayError;

#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    pub message: Option<PushMessage>,
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub data: Option<String>,
    pub message_id: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxNotification {
    pub email_address: Option<String>,
    pub history_id: HistoryId,
}

/// Parses a raw push request body. Every failure is `MalformedNotification`
/// and nothing else is touched.
pub fn parse_push_body(body: &[u8]) -> Result<MailboxNotification, RelayError> {
    let envelope: PushEnvelope = serde_json::from_slice(body)
        .map_err(|error| RelayError::MalformedNotification(format!("invalid envelope: {error}")))?;
    parse_envelope(envelope)
}

pub fn parse_envelope(envelope: PushEnvelope) -> Result<MailboxNotification, RelayError> {
    let data = envelope
        .message
        .and_then(|message| message.data)
        .filter(|data| !data.trim().is_empty())
        .ok_or_else(|| RelayError::MalformedNotification("missing message.data".to_owned()))?;

    let decoded = decode_base64_lenient(&data).ok_or_else(|| {
        RelayError::MalformedNotification("message.data is not base64".to_owned())
    })?;

    serde_json::from_slice(&decoded)
        .map_err(|error| RelayError::MalformedNotification(format!("invalid payload: {error}")))
}
