#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use inbox_relay_engine::gmail::api::{
    GmailMessage, Header, HistoryMessage, HistoryRecord, MessageBody, MessagePayload, MessageRef,
    WatchResponse,
};
use inbox_relay_engine::{
    AuthProvider, Credential, DecodedMessage, HistoryId, MailProvider, MemoryStore, MessageSink,
    OAuthSettings, Relay, RelayConfig, RelayError, RelayParts, Session, StateBackend, TokenGrant,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub type TestRelay = Relay<FakeMail, FakeAuth, MemoryStore, Arc<CollectingSink>>;

/// In-memory mailbox. Every call requires an active session, like the
/// real client.
#[derive(Default)]
pub struct FakeMail {
    pub session: Session,
    records: Mutex<Vec<(u64, Vec<String>)>>,
    messages: Mutex<HashMap<String, GmailMessage>>,
    failing: Mutex<HashSet<String>>,
    watch_start: Mutex<Option<u64>>,
    rejects_token: Mutex<bool>,
    retained_from: Mutex<Option<u64>>,
    pub history_calls: Mutex<Vec<u64>>,
    pub fetches: Mutex<Vec<String>>,
    pub watch_calls: Mutex<usize>,
}

impl FakeMail {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            ..Self::default()
        }
    }

    pub fn add_record(&self, id: u64, message_ids: &[&str]) {
        self.records
            .lock()
            .unwrap()
            .push((id, message_ids.iter().map(|id| id.to_string()).collect()));
    }

    pub fn add_message(&self, message: GmailMessage) {
        self.messages
            .lock()
            .unwrap()
            .insert(message.id.clone(), message);
    }

    pub fn fail_message(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_owned());
    }

    pub fn heal_message(&self, id: &str) {
        self.failing.lock().unwrap().remove(id);
    }

    pub fn set_watch_start(&self, start: Option<u64>) {
        *self.watch_start.lock().unwrap() = start;
    }

    /// Answers the watch call as if the access token had been revoked.
    pub fn set_rejects_token(&self, rejects: bool) {
        *self.rejects_token.lock().unwrap() = rejects;
    }

    /// History before `start` is reported as expired.
    pub fn retain_history_from(&self, start: u64) {
        *self.retained_from.lock().unwrap() = Some(start);
    }

    pub fn history_calls(&self) -> Vec<u64> {
        self.history_calls.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn watch_calls(&self) -> usize {
        *self.watch_calls.lock().unwrap()
    }
}

impl MailProvider for FakeMail {
    async fn create_or_renew_watch(
        &self,
        _topic_name: &str,
        _label_ids: &[String],
    ) -> Result<WatchResponse, RelayError> {
        self.session.access_token().await?;
        *self.watch_calls.lock().unwrap() += 1;
        if *self.rejects_token.lock().unwrap() {
            return Err(RelayError::AuthInvalid("Invalid Credentials".to_owned()));
        }

        let start = *self.watch_start.lock().unwrap();
        match start {
            Some(start) => Ok(WatchResponse {
                history_id: HistoryId::new(start),
                expiration: Some("1700000000000".to_owned()),
            }),
            None => Err(RelayError::ProviderFetch("topic not found".to_owned())),
        }
    }

    async fn list_history_since(&self, start: HistoryId) -> Result<Vec<HistoryRecord>, RelayError> {
        self.session.access_token().await?;
        self.history_calls.lock().unwrap().push(start.get());

        if let Some(retained) = *self.retained_from.lock().unwrap()
            && start.get() < retained
        {
            return Err(RelayError::HistoryExpired(start.get()));
        }

        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|(id, _)| *id > start.get())
            .map(|(id, message_ids)| HistoryRecord {
                id: Some(HistoryId::new(*id)),
                messages_added: (!message_ids.is_empty()).then(|| {
                    message_ids
                        .iter()
                        .map(|message_id| HistoryMessage {
                            message: MessageRef {
                                id: message_id.clone(),
                                thread_id: None,
                            },
                        })
                        .collect()
                }),
            })
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<GmailMessage, RelayError> {
        self.session.access_token().await?;
        self.fetches.lock().unwrap().push(id.to_owned());

        if self.failing.lock().unwrap().contains(id) {
            return Err(RelayError::ProviderFetch(format!("message {id} unavailable")));
        }
        self.messages
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::ProviderFetch(format!("message {id} not found")))
    }
}

#[derive(Debug, Clone)]
pub enum RefreshBehavior {
    Grant(TokenGrant),
    InvalidGrant,
    Unavailable,
}

pub struct FakeAuth {
    refresh: Mutex<RefreshBehavior>,
    pub refresh_calls: Mutex<usize>,
}

impl FakeAuth {
    pub fn new(refresh: RefreshBehavior) -> Self {
        Self {
            refresh: Mutex::new(refresh),
            refresh_calls: Mutex::new(0),
        }
    }

    pub fn set_refresh(&self, refresh: RefreshBehavior) {
        *self.refresh.lock().unwrap() = refresh;
    }

    pub fn refresh_calls(&self) -> usize {
        *self.refresh_calls.lock().unwrap()
    }
}

impl AuthProvider for FakeAuth {
    fn authorization_url(&self) -> Result<Url, RelayError> {
        Url::parse("https://accounts.example.com/o/oauth2/auth?client_id=test")
            .map_err(|err| RelayError::AuthInvalid(err.to_string()))
    }

    async fn exchange_auth_code(&self, code: &str) -> Result<TokenGrant, RelayError> {
        if code != "good-code" {
            return Err(RelayError::AuthInvalid("invalid_grant".to_owned()));
        }
        Ok(TokenGrant {
            access_token: "A-fresh".to_owned(),
            refresh_token: Some("R-fresh".to_owned()),
            expires_in: Some(Duration::from_secs(3600)),
            scope: None,
            token_type: Some("Bearer".to_owned()),
        })
    }

    async fn refresh_access_token(&self, _credential: &Credential) -> Result<TokenGrant, RelayError> {
        *self.refresh_calls.lock().unwrap() += 1;
        match self.refresh.lock().unwrap().clone() {
            RefreshBehavior::Grant(grant) => Ok(grant),
            RefreshBehavior::InvalidGrant => {
                Err(RelayError::AuthInvalid("invalid_grant".to_owned()))
            }
            RefreshBehavior::Unavailable => {
                Err(RelayError::AuthTransient("503 Service Unavailable".to_owned()))
            }
        }
    }
}

#[derive(Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<DecodedMessage>>,
}

impl CollectingSink {
    pub fn messages(&self) -> Vec<DecodedMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.messages().into_iter().map(|message| message.id).collect()
    }
}

impl MessageSink for CollectingSink {
    fn emit(&self, message: &DecodedMessage) {
        self.messages.lock().unwrap().push(message.clone());
    }
}

pub fn config() -> RelayConfig {
    RelayConfig {
        oauth: OAuthSettings {
            client_id: "client".to_owned(),
            client_secret: Some("secret".to_owned()),
            redirect_uri: Url::parse("http://localhost:3000/gmail/oauth2callback").unwrap(),
        },
        topic_name: "projects/p/topics/gmail".to_owned(),
        label_ids: vec!["INBOX".to_owned(), "SPAM".to_owned()],
        state: StateBackend::Files(".inbox-relay".into()),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        refresh_interval: Duration::from_secs(3600),
    }
}

pub fn message(id: &str, from: Option<&str>, subject: &str, body: &str) -> GmailMessage {
    let mut headers = vec![Header {
        name: "Subject".to_owned(),
        value: subject.to_owned(),
    }];
    if let Some(from) = from {
        headers.push(Header {
            name: "From".to_owned(),
            value: from.to_owned(),
        });
    }

    GmailMessage {
        id: id.to_owned(),
        thread_id: Some(format!("thread-{id}")),
        payload: Some(MessagePayload {
            mime_type: Some("text/plain".to_owned()),
            headers: Some(headers),
            body: Some(MessageBody {
                size: Some(body.len() as u64),
                data: Some(URL_SAFE_NO_PAD.encode(body)),
            }),
            parts: None,
        }),
    }
}

/// A credential that is due for refresh right away.
pub fn expiring_credential() -> Credential {
    Credential {
        access_token: "A".to_owned(),
        refresh_token: Some("R".to_owned()),
        expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
        scope: None,
        token_type: Some("Bearer".to_owned()),
    }
}

pub fn valid_credential() -> Credential {
    Credential {
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        ..expiring_credential()
    }
}

pub struct Harness {
    pub relay: Arc<TestRelay>,
    pub mail: Arc<FakeMail>,
    pub auth: Arc<FakeAuth>,
    pub store: MemoryStore,
    pub session: Session,
    pub sink: Arc<CollectingSink>,
}

impl Harness {
    pub fn new(refresh: RefreshBehavior) -> Self {
        Self::with_store(MemoryStore::new(), refresh)
    }

    pub fn with_store(store: MemoryStore, refresh: RefreshBehavior) -> Self {
        let session = Session::new();
        let mail = Arc::new(FakeMail::new(session.clone()));
        let auth = Arc::new(FakeAuth::new(refresh));
        let sink = Arc::new(CollectingSink::default());

        let relay = Arc::new(Relay::new(
            &config(),
            RelayParts {
                provider: Arc::clone(&mail),
                auth: Arc::clone(&auth),
                store: store.clone(),
                session: session.clone(),
                sink: Arc::clone(&sink),
            },
        ));

        Self {
            relay,
            mail,
            auth,
            store,
            session,
            sink,
        }
    }
}
