//! Runtime configuration. Environment variables win over the credentials file.

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_REDIRECT_URL: &str = "http://localhost:3000/gmail/oauth2callback";
const DEFAULT_STATE_DIR: &str = ".inbox-relay";
const DEFAULT_DB_FILE: &str = "state.db";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60 * 60;
pub const DEFAULT_LABEL_IDS: &[&str] = &["INBOX", "SPAM"];

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateBackend {
    /// One file per record inside the directory.
    Files(PathBuf),
    /// Embedded libsql database file.
    Libsql(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub oauth: OAuthSettings,
    pub topic_name: String,
    pub label_ids: Vec<String>,
    pub state: StateBackend,
    pub listen_addr: SocketAddr,
    pub refresh_interval: Duration,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).and_then(empty_to_none);

        let file = match var("RELAY_CREDENTIALS_FILE") {
            Some(path) => Some(load_credentials_file(Path::new(&path))?),
            None => None,
        };

        let client_id = var("RELAY_GOOGLE_CLIENT_ID")
            .or_else(|| file.as_ref().map(|creds| creds.client_id.clone()))
            .and_then(empty_to_none)
            .ok_or_else(|| {
                anyhow!("no OAuth client configured: set RELAY_GOOGLE_CLIENT_ID or RELAY_CREDENTIALS_FILE")
            })?;

        let client_secret = var("RELAY_GOOGLE_CLIENT_SECRET").or_else(|| {
            file.as_ref()
                .and_then(|creds| creds.client_secret.clone())
                .and_then(empty_to_none)
        });

        let redirect_raw = var("RELAY_OAUTH_REDIRECT_URI")
            .or_else(|| file.as_ref().and_then(|creds| creds.redirect_uris.first().cloned()))
            .unwrap_or_else(|| DEFAULT_REDIRECT_URL.to_owned());
        let redirect_uri = Url::parse(&redirect_raw)
            .with_context(|| format!("invalid RELAY_OAUTH_REDIRECT_URI: {redirect_raw}"))?;

        let topic_name = var("RELAY_TOPIC_NAME")
            .ok_or_else(|| anyhow!("RELAY_TOPIC_NAME is not set"))?;

        let label_ids = match var("RELAY_LABEL_IDS") {
            Some(raw) => parse_label_ids(&raw)?,
            None => DEFAULT_LABEL_IDS.iter().map(|id| (*id).to_owned()).collect(),
        };

        let state = parse_state_backend(
            var("RELAY_STATE_BACKEND").as_deref(),
            var("RELAY_STATE_PATH"),
        )?;

        let listen_raw = var("RELAY_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned());
        let listen_addr = listen_raw
            .parse()
            .with_context(|| format!("invalid RELAY_LISTEN_ADDR: {listen_raw}"))?;

        let refresh_interval = match var("RELAY_REFRESH_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .with_context(|| format!("invalid RELAY_REFRESH_INTERVAL_SECS: {raw}"))?;
                if secs == 0 {
                    bail!("RELAY_REFRESH_INTERVAL_SECS must be positive");
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
        };

        Ok(Self {
            oauth: OAuthSettings {
                client_id,
                client_secret,
                redirect_uri,
            },
            topic_name,
            label_ids,
            state,
            listen_addr,
            refresh_interval,
        })
    }
}

fn load_credentials_file(path: &Path) -> Result<InstalledCredentials> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read credentials file: {}", path.display()))?;
    parse_credentials(&content)
        .with_context(|| format!("cannot parse credentials file: {}", path.display()))
}

fn parse_credentials(json: &str) -> Result<InstalledCredentials> {
    let file: GoogleCredentialFile = serde_json::from_str(json)?;
    file.installed
        .or(file.web)
        .context("credentials file has no 'installed' or 'web' section")
}

fn parse_label_ids(raw: &str) -> Result<Vec<String>> {
    let labels: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_owned)
        .collect();
    if labels.is_empty() {
        bail!("RELAY_LABEL_IDS contains no labels");
    }
    Ok(labels)
}

fn parse_state_backend(kind: Option<&str>, path: Option<String>) -> Result<StateBackend> {
    match kind.map(str::to_ascii_lowercase).as_deref() {
        None | Some("files") => Ok(StateBackend::Files(
            path.map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
        )),
        Some("libsql") => Ok(StateBackend::Libsql(path.map(PathBuf::from).unwrap_or_else(
            || Path::new(DEFAULT_STATE_DIR).join(DEFAULT_DB_FILE),
        ))),
        Some(other) => bail!("unknown RELAY_STATE_BACKEND: {other} (expected files or libsql)"),
    }
}

fn empty_to_none(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
