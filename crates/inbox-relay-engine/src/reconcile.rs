//! Incremental history reconciliation. The checkpoint advances only after
//! every added message in the range has been decoded.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, HistoryId};
use crate::decode::{DecodedMessage, MessageDecoder};
use crate::error::RelayError;
use crate::provider::MailProvider;
use crate::store::KeyValueStore;

/// Receives decoded messages. Delivery is fire-and-forget.
pub trait MessageSink: Send + Sync {
    fn emit(&self, message: &DecodedMessage);
}

impl<T: MessageSink + ?Sized> MessageSink for Arc<T> {
    fn emit(&self, message: &DecodedMessage) {
        (**self).emit(message);
    }
}

/// Writes decoded messages to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn emit(&self, message: &DecodedMessage) {
        info!(
            message_id = %message.id,
            from = message.sender(),
            subject = message.subject(),
            "new message: {}",
            message.body
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStage {
    Received,
    DeltaFetched,
    MessagesProcessed,
    CheckpointAdvanced,
}

impl fmt::Display for PassStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassStage::Received => "received",
            PassStage::DeltaFetched => "delta_fetched",
            PassStage::MessagesProcessed => "messages_processed",
            PassStage::CheckpointAdvanced => "checkpoint_advanced",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Cursor the delta was fetched from.
    pub start: HistoryId,
    /// Checkpoint after the pass.
    pub checkpoint: HistoryId,
    pub records: usize,
    pub decoded: usize,
    pub emitted: usize,
}

pub struct HistoryReconciler<P, S, K> {
    provider: Arc<P>,
    checkpoint: CheckpointStore<S>,
    decoder: MessageDecoder<P>,
    sink: K,
}

impl<P, S, K> HistoryReconciler<P, S, K>
where
    P: MailProvider,
    S: KeyValueStore,
    K: MessageSink,
{
    pub fn new(provider: Arc<P>, checkpoint: CheckpointStore<S>, sink: K) -> Self {
        Self {
            decoder: MessageDecoder::new(Arc::clone(&provider)),
            provider,
            checkpoint,
            sink,
        }
    }

    pub async fn reconcile(&self, new_cursor: HistoryId) -> Result<ReconcileReport, RelayError> {
        let mut stage = PassStage::Received;
        let result = self.run_pass(new_cursor, &mut stage).await;

        match &result {
            Ok(report) => info!(
                start = %report.start,
                checkpoint = %report.checkpoint,
                records = report.records,
                decoded = report.decoded,
                emitted = report.emitted,
                "reconciliation complete"
            ),
            Err(err) => warn!(
                history_id = %new_cursor,
                stage = %stage,
                "reconciliation failed, checkpoint not advanced: {err}"
            ),
        }

        result
    }

    async fn run_pass(
        &self,
        new_cursor: HistoryId,
        stage: &mut PassStage,
    ) -> Result<ReconcileReport, RelayError> {
        let stored = self.checkpoint.load().await?;
        let start = stored.unwrap_or_else(|| new_cursor.previous());
        debug!(%start, history_id = %new_cursor, baseline = stored.is_none(), "fetching history delta");

        let records = self.provider.list_history_since(start).await?;
        *stage = PassStage::DeltaFetched;

        let mut seen = HashSet::new();
        let message_ids: Vec<String> = records
            .iter()
            .filter_map(|record| record.messages_added.as_ref())
            .flatten()
            .map(|entry| entry.message.id.clone())
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let mut decoded = 0;
        let mut emitted = 0;
        for id in &message_ids {
            let message = self.decoder.decode(id).await?;
            decoded += 1;

            if message.is_new_content() {
                self.sink.emit(&message);
                emitted += 1;
            } else {
                debug!(message_id = %id, "skipping message without new content");
            }
        }
        *stage = PassStage::MessagesProcessed;

        // never move the watermark backwards on a late, out-of-order notification
        let checkpoint = match stored {
            Some(current) if current > new_cursor => current,
            _ => new_cursor,
        };
        self.checkpoint.save(checkpoint).await?;
        *stage = PassStage::CheckpointAdvanced;

        Ok(ReconcileReport {
            start,
            checkpoint,
            records: records.len(),
            decoded,
            emitted,
        })
    }
}
