//! OAuth token lifecycle

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::credential::{Credential, CredentialStore};
use crate::error::RelayError;
use crate::provider::AuthProvider;
use crate::session::Session;
use crate::store::KeyValueStore;

/// Access tokens expiring within this window are refreshed early.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// A stored credential was loaded into the session.
    Restored,
    /// No usable credential; an operator must visit `url`.
    AwaitingAuthorization { url: Url },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Access token is still comfortably valid.
    Fresh,
    /// Provider issued new tokens; they were merged and persisted.
    Rotated,
    /// Nothing to refresh until an authorization completes.
    Unauthorized,
}

pub struct TokenManager<A, S> {
    auth: Arc<A>,
    credentials: CredentialStore<S>,
    session: Session,
}

impl<A, S> TokenManager<A, S>
where
    A: AuthProvider,
    S: KeyValueStore,
{
    pub fn new(auth: Arc<A>, store: S, session: Session) -> Self {
        Self {
            auth,
            credentials: CredentialStore::new(store),
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Loads the persisted credential into the session, or publishes the
    /// authorization URL and waits for [`exchange_code`](Self::exchange_code).
    pub async fn initialize(&self) -> Result<AuthState, RelayError> {
        match self.credentials.load().await {
            Ok(Some(credential)) => {
                self.session.set(credential).await;
                info!("restored stored credential");
                return Ok(AuthState::Restored);
            }
            Ok(None) => {}
            Err(err) => {
                warn!("discarding unreadable credential: {err}");
                self.credentials.clear().await?;
            }
        }

        self.session.clear().await;
        let url = self.auth.authorization_url()?;
        warn!("authorize this relay by visiting: {url}");
        Ok(AuthState::AwaitingAuthorization { url })
    }

    pub fn authorization_url(&self) -> Result<Url, RelayError> {
        self.auth.authorization_url()
    }

    /// Completes the authorization flow. The new token set replaces whatever
    /// was stored before.
    pub async fn exchange_code(&self, code: &str) -> Result<Credential, RelayError> {
        let grant = self.auth.exchange_auth_code(code).await?;
        if grant.refresh_token.is_none() {
            warn!("authorization returned no refresh token; access will lapse at expiry");
        }

        let credential = Credential::from_grant(grant, Utc::now());
        self.credentials.replace(&credential).await?;
        self.session.set(credential.clone()).await;
        info!("authorization complete, credential stored");
        Ok(credential)
    }

    /// One refresh tick. `AuthInvalid` clears the stored credential and
    /// re-enters the authorization flow before returning the error; other
    /// failures are returned as `AuthTransient` for the next tick to retry.
    pub async fn ensure_fresh(&self) -> Result<RefreshOutcome, RelayError> {
        let Some(credential) = self.session.credential().await else {
            debug!("no credential to refresh");
            return Ok(RefreshOutcome::Unauthorized);
        };

        if !credential.needs_refresh(Utc::now(), REFRESH_MARGIN) {
            debug!("access token still valid");
            return Ok(RefreshOutcome::Fresh);
        }

        self.refresh(&credential).await
    }

    /// Refreshes regardless of the recorded expiry, for when the provider has
    /// already rejected the access token. Failures are handled as in
    /// [`ensure_fresh`](Self::ensure_fresh).
    pub async fn force_refresh(&self) -> Result<RefreshOutcome, RelayError> {
        let Some(credential) = self.session.credential().await else {
            return Ok(RefreshOutcome::Unauthorized);
        };
        self.refresh(&credential).await
    }

    async fn refresh(&self, credential: &Credential) -> Result<RefreshOutcome, RelayError> {
        match self.auth.refresh_access_token(credential).await {
            Ok(grant) => {
                if grant.refresh_token.is_some() {
                    info!("provider rotated the refresh token");
                }
                let merged = self.credentials.merge_rotation(grant, Utc::now()).await?;
                self.session.set(merged).await;
                info!("access token refreshed");
                Ok(RefreshOutcome::Rotated)
            }
            Err(err @ RelayError::AuthInvalid(_)) => {
                error!("refresh credential rejected: {err}");
                self.invalidate().await?;
                Err(err)
            }
            Err(RelayError::AuthTransient(detail)) => {
                warn!("token refresh failed, retrying next tick: {detail}");
                Err(RelayError::AuthTransient(detail))
            }
            Err(other) => {
                warn!("token refresh failed, retrying next tick: {other}");
                Err(RelayError::AuthTransient(other.to_string()))
            }
        }
    }

    /// Forgets the credential everywhere and restarts authorization.
    pub async fn invalidate(&self) -> Result<AuthState, RelayError> {
        warn!("removing stored credential");
        self.session.clear().await;
        self.credentials.clear().await?;
        self.initialize().await
    }
}

impl<A, S> TokenManager<A, S>
where
    A: AuthProvider + 'static,
    S: KeyValueStore + 'static,
{
    /// Runs [`ensure_fresh`](Self::ensure_fresh) every `period`, first tick
    /// one period from now. Failures are logged and never retried early.
    pub fn spawn_refresh(self: &Arc<Self>, period: Duration) -> RefreshTask {
        let manager = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("refreshing access token");
                        // outcome already logged inside ensure_fresh
                        let _ = manager.ensure_fresh().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("token refresh task stopped");
        });

        RefreshTask {
            shutdown: shutdown_tx,
            handle,
        }
    }
}

/// Handle to the periodic refresh task.
pub struct RefreshTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RefreshTask {
    /// Signals the task and waits for it to exit; an in-flight refresh is
    /// allowed to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            warn!("token refresh task ended abnormally: {err}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
