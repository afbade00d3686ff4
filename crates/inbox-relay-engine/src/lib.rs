//! Relays Gmail push notifications into decoded message summaries.

pub mod checkpoint;
pub mod config;
pub mod credential;
pub mod decode;
pub mod error;
pub mod gmail;
pub mod notification;
pub mod oauth;
pub mod provider;
pub mod reconcile;
pub mod relay;
pub mod session;
pub mod store;
pub mod token;
pub mod watch;

pub use checkpoint::{CheckpointStore, HistoryId};
pub use config::{OAuthSettings, RelayConfig, StateBackend};
pub use credential::{Credential, CredentialStore, TokenGrant};
pub use decode::{DecodedMessage, MessageDecoder, decode_message, strip_quoted_reply};
pub use error::RelayError;
pub use gmail::GmailApi;
pub use notification::{MailboxNotification, parse_push_body};
pub use oauth::GoogleOAuth;
pub use provider::{AuthProvider, MailProvider};
pub use reconcile::{HistoryReconciler, LogSink, MessageSink, ReconcileReport};
pub use relay::{NotificationSender, Relay, RelayParts, spawn_worker};
pub use session::Session;
pub use store::{FileStore, KeyValueStore, LibsqlStore, MemoryStore, StateStore};
pub use token::{AuthState, RefreshOutcome, RefreshTask, TokenManager};
pub use watch::WatchRegistrar;
