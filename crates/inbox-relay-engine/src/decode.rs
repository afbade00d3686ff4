use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use regex::Regex;
use std::borrow::Cow;
use std::sync::{Arc, LazyLock};
use tracing::warn;

use crate::error::RelayError;
use crate::gmail::api::{GmailMessage, MessagePayload};
use crate::provider::MailProvider;

pub const UNKNOWN_SENDER: &str = "Unknown";
pub const NO_SUBJECT: &str = "No subject";

/// Web-safe alphabet, padding optional, tolerant of trailing bits.
const TRANSPORT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

static HTML_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"</?[^>]+(>|$)").ok());

static REPLY_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^On .* wrote:",
        r"^>+",
        r"^From:",
        r"^Sent:",
        r"^To:",
        r"^Subject:",
        r"^______",
        r"^P \{",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub id: String,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub body: String,
}

impl DecodedMessage {
    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or(UNKNOWN_SENDER)
    }

    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or(NO_SUBJECT)
    }

    /// Only messages with a sender and some new text are worth emitting;
    /// the rest are reply-only or header-only artifacts.
    pub fn is_new_content(&self) -> bool {
        self.from.as_deref().is_some_and(|from| !from.is_empty()) && !self.body.is_empty()
    }
}

pub struct MessageDecoder<P> {
    provider: Arc<P>,
}

impl<P: MailProvider> MessageDecoder<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Fetches and decodes one message. Fetch failures propagate unchanged.
    pub async fn decode(&self, message_id: &str) -> Result<DecodedMessage, RelayError> {
        let message = self.provider.get_message(message_id).await?;
        Ok(decode_message(&message))
    }
}

pub fn decode_message(message: &GmailMessage) -> DecodedMessage {
    let payload = message.payload.as_ref();
    let raw = decode_transport(&raw_body(payload));

    DecodedMessage {
        id: message.id.clone(),
        from: header_value(payload, "From"),
        subject: header_value(payload, "Subject"),
        body: strip_quoted_reply(&raw),
    }
}

/// First header whose name matches exactly.
fn header_value(payload: Option<&MessagePayload>, name: &str) -> Option<String> {
    payload?
        .headers
        .as_ref()?
        .iter()
        .find(|header| header.name == name)
        .map(|header| header.value.clone())
}

/// Transport-encoded body text. Multipart messages contribute every part's
/// data in order, joined before decoding.
fn raw_body(payload: Option<&MessagePayload>) -> String {
    let Some(payload) = payload else {
        return String::new();
    };

    match &payload.parts {
        Some(parts) => parts
            .iter()
            .filter_map(|part| part.body.as_ref()?.data.as_deref())
            .collect(),
        None => payload
            .body
            .as_ref()
            .and_then(|body| body.data.clone())
            .unwrap_or_default(),
    }
}

/// Reverses the provider's base64 transport encoding. Both alphabets are
/// accepted and whitespace is ignored. Decoding stops at the first padding
/// character, so of several padded parts only the first is read. Data that
/// still cannot be decoded yields an empty string.
pub fn decode_transport(data: &str) -> String {
    match decode_base64_lenient(data) {
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => {
            warn!(len = data.len(), "message body is not valid base64");
            String::new()
        }
    }
}

pub(crate) fn decode_base64_lenient(data: &str) -> Option<Vec<u8>> {
    let mut normalized: String = data
        .chars()
        .take_while(|c| *c != '=')
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    // a single dangling sextet carries no complete byte
    if normalized.len() % 4 == 1 {
        normalized.pop();
    }

    TRANSPORT.decode(normalized.as_bytes()).ok()
}

/// Drops HTML tags, then keeps lines up to the first reply marker
/// (attribution line, `>` quote, forwarded headers, separators).
///
/// Applying this to its own output returns the output unchanged.
pub fn strip_quoted_reply(text: &str) -> String {
    let without_tags = match HTML_TAG.as_ref() {
        Some(tag) => tag.replace_all(text, ""),
        None => Cow::Borrowed(text),
    };

    let kept: Vec<&str> = without_tags
        .split('\n')
        .take_while(|line| !is_reply_marker(line.trim()))
        .collect();

    kept.join("\n").trim().to_owned()
}

fn is_reply_marker(line: &str) -> bool {
    REPLY_MARKERS.iter().any(|pattern| pattern.is_match(line))
}
