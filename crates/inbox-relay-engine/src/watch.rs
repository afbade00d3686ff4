use std::sync::Arc;
use tracing::{error, info};

use crate::checkpoint::CheckpointStore;
use crate::error::RelayError;
use crate::gmail::api::WatchResponse;
use crate::provider::MailProvider;
use crate::store::KeyValueStore;

/// Creates or renews the mailbox push subscription.
pub struct WatchRegistrar<P, S> {
    provider: Arc<P>,
    checkpoint: CheckpointStore<S>,
    topic_name: String,
    label_ids: Vec<String>,
}

impl<P: MailProvider, S: KeyValueStore> WatchRegistrar<P, S> {
    pub fn new(
        provider: Arc<P>,
        checkpoint: CheckpointStore<S>,
        topic_name: impl Into<String>,
        label_ids: Vec<String>,
    ) -> Self {
        Self {
            provider,
            checkpoint,
            topic_name: topic_name.into(),
            label_ids,
        }
    }

    /// Safe to call repeatedly. On success the returned start cursor
    /// overwrites the checkpoint unconditionally, since history before a new
    /// watch's start point is not delivered. On failure the checkpoint is
    /// left alone and retrying is up to the caller.
    pub async fn register_watch(&self) -> Result<WatchResponse, RelayError> {
        let response = match self
            .provider
            .create_or_renew_watch(&self.topic_name, &self.label_ids)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(topic = %self.topic_name, "watch registration failed: {err}");
                return Err(err);
            }
        };

        self.checkpoint.save(response.history_id).await?;
        info!(
            history_id = %response.history_id,
            expiration = response.expiration.as_deref().unwrap_or("unknown"),
            labels = ?self.label_ids,
            "watch registered"
        );
        Ok(response)
    }
}
