use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, HistoryId};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::gmail::api::WatchResponse;
use crate::provider::{AuthProvider, MailProvider};
use crate::reconcile::{HistoryReconciler, MessageSink, ReconcileReport};
use crate::session::Session;
use crate::store::KeyValueStore;
use crate::token::{AuthState, RefreshTask, TokenManager};
use crate::watch::WatchRegistrar;

const NOTIFICATION_QUEUE: usize = 64;

pub struct RelayParts<P, A, S, K> {
    pub provider: Arc<P>,
    pub auth: Arc<A>,
    pub store: S,
    pub session: Session,
    pub sink: K,
}

pub struct Relay<P, A, S, K> {
    tokens: Arc<TokenManager<A, S>>,
    registrar: WatchRegistrar<P, S>,
    reconciler: HistoryReconciler<P, S, K>,
    refresh_interval: Duration,
    refresh_task: Mutex<Option<RefreshTask>>,
}

impl<P, A, S, K> Relay<P, A, S, K>
where
    P: MailProvider + 'static,
    A: AuthProvider + 'static,
    S: KeyValueStore + Clone + 'static,
    K: MessageSink + 'static,
{
    pub fn new(config: &RelayConfig, parts: RelayParts<P, A, S, K>) -> Self {
        let RelayParts {
            provider,
            auth,
            store,
            session,
            sink,
        } = parts;

        Self {
            tokens: Arc::new(TokenManager::new(auth, store.clone(), session)),
            registrar: WatchRegistrar::new(
                Arc::clone(&provider),
                CheckpointStore::new(store.clone()),
                config.topic_name.clone(),
                config.label_ids.clone(),
            ),
            reconciler: HistoryReconciler::new(provider, CheckpointStore::new(store), sink),
            refresh_interval: config.refresh_interval,
            refresh_task: Mutex::new(None),
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager<A, S>> {
        &self.tokens
    }

    /// Restores the credential, refreshes it once, starts the refresh timer
    /// and registers the watch. Without a stored credential this only
    /// publishes the authorization URL.
    pub async fn start(&self) -> Result<AuthState, RelayError> {
        let state = self.tokens.initialize().await?;
        if state != AuthState::Restored {
            return Ok(state);
        }

        if let Err(err) = self.tokens.ensure_fresh().await {
            if err.is_auth_invalid() {
                return self.awaiting_authorization();
            }
            warn!("initial token refresh failed: {err}");
        }

        self.start_refresh().await;
        // failures are logged by the registrar; the next restart or
        // authorization retries
        let _ = self.register_watch().await;
        Ok(AuthState::Restored)
    }

    /// OAuth callback: exchange the code, then resume normal operation.
    pub async fn authorize(&self, code: &str) -> Result<(), RelayError> {
        self.tokens.exchange_code(code).await?;
        self.start_refresh().await;
        let _ = self.register_watch().await;
        Ok(())
    }

    /// Registers or renews the watch. A rejected access token forces a
    /// refresh; a rejected refresh credential then resets authorization.
    pub async fn register_watch(&self) -> Result<WatchResponse, RelayError> {
        let result = self.registrar.register_watch().await;
        if let Err(err) = &result
            && err.is_auth_invalid()
            && self.tokens.session().is_authorized().await
        {
            match self.tokens.force_refresh().await {
                Ok(outcome) => debug!(?outcome, "credential refreshed after watch rejection"),
                Err(refresh_err) => warn!("refresh after watch rejection failed: {refresh_err}"),
            }
        }
        result
    }

    /// One reconciliation pass for a notification. An expired history cursor
    /// re-registers the watch, which reseeds the checkpoint.
    pub async fn handle_notification(
        &self,
        history_id: HistoryId,
    ) -> Result<ReconcileReport, RelayError> {
        let result = self.reconciler.reconcile(history_id).await;

        if let Err(RelayError::HistoryExpired(start)) = &result {
            warn!(start, "history cursor expired, re-registering watch");
            let _ = self.register_watch().await;
        }
        result
    }

    /// A previously running refresh timer is stopped first.
    pub async fn start_refresh(&self) {
        let mut slot = self.refresh_task.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        *slot = Some(self.tokens.spawn_refresh(self.refresh_interval));
        debug!(period_secs = self.refresh_interval.as_secs(), "token refresh scheduled");
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.refresh_task.lock().await.take() {
            task.stop().await;
        }
        info!("relay stopped");
    }

    pub async fn refresh_running(&self) -> bool {
        self.refresh_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn awaiting_authorization(&self) -> Result<AuthState, RelayError> {
        let url = self.tokens.authorization_url()?;
        Ok(AuthState::AwaitingAuthorization { url })
    }
}

/// Sending half of the notification queue, handed to the webhook layer.
#[derive(Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<HistoryId>,
}

impl NotificationSender {
    /// Bounded queue; the receiving half belongs to a single consumer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<HistoryId>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queues a notification without waiting. Returns false when the queue
    /// is full or the worker is gone; a later notification re-covers the
    /// range from the checkpoint.
    pub fn enqueue(&self, history_id: HistoryId) -> bool {
        match self.tx.try_send(history_id) {
            Ok(()) => true,
            Err(err) => {
                warn!(%history_id, "dropping notification: {err}");
                false
            }
        }
    }
}

/// Starts the single worker that runs reconciliation passes one at a time.
/// The worker exits once every sender has been dropped.
pub fn spawn_worker<P, A, S, K>(
    relay: Arc<Relay<P, A, S, K>>,
) -> (NotificationSender, JoinHandle<()>)
where
    P: MailProvider + 'static,
    A: AuthProvider + 'static,
    S: KeyValueStore + Clone + 'static,
    K: MessageSink + 'static,
{
    let (sender, mut rx) = NotificationSender::channel(NOTIFICATION_QUEUE);

    let handle = tokio::spawn(async move {
        while let Some(history_id) = rx.recv().await {
            // failures are logged by the reconciler
            let _ = relay.handle_notification(history_id).await;
        }
        debug!("notification worker stopped");
    });

    (sender, handle)
}
