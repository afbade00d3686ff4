//! Gmail REST integration

mod client;

pub use client::{DEFAULT_BASE_URL, GmailApi};

/// Gmail API request and response types
pub mod api {
    use serde::{Deserialize, Serialize};

    use crate::checkpoint::HistoryId;

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WatchRequest {
        pub topic_name: String,
        pub label_ids: Vec<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WatchResponse {
        /// Cursor at which the new subscription starts.
        pub history_id: HistoryId,
        /// Expiry in milliseconds since the epoch, as a string.
        pub expiration: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<HistoryId>,
    }

    /// One change entry. Records without added messages are legal.
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: Option<HistoryId>,
        pub messages_added: Option<Vec<HistoryMessage>>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct HistoryMessage {
        pub message: MessageRef,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: Option<String>,
        pub payload: Option<MessagePayload>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub mime_type: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Body segment; `data` is web-safe base64.
    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct MessageBody {
        pub size: Option<u64>,
        pub data: Option<String>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub body: Option<MessageBody>,
    }

    #[derive(Debug, Deserialize)]
    pub(crate) struct GoogleErrorEnvelope {
        pub error: Option<GoogleErrorResponse>,
    }

    #[derive(Debug, Deserialize)]
    pub(crate) struct GoogleErrorResponse {
        pub message: Option<String>,
        pub errors: Option<Vec<GoogleErrorItem>>,
    }

    #[derive(Debug, Deserialize)]
    pub(crate) struct GoogleErrorItem {
        pub reason: Option<String>,
    }
}
