use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::RelayError;
use crate::store::KeyValueStore;

pub const CHECKPOINT_KEY: &str = "last_history_id";

/// Position in the mailbox change log.
///
/// Gmail sends this as a JSON number in push notifications and as a string
/// in REST responses; both forms deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HistoryId(u64);

impl HistoryId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Baseline used when nothing has been processed yet.
    pub const fn previous(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HistoryId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<u64> for HistoryId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for HistoryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for HistoryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(Self(value)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// The last fully reconciled cursor, stored as decimal text.
#[derive(Clone)]
pub struct CheckpointStore<S> {
    store: S,
}

impl<S: KeyValueStore> CheckpointStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns `None` when nothing has been processed yet. An unreadable
    /// value is treated the same way so a corrupt file cannot wedge the relay.
    pub async fn load(&self) -> Result<Option<HistoryId>, RelayError> {
        let raw = self
            .store
            .get(CHECKPOINT_KEY)
            .await
            .map_err(RelayError::storage)?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }

        match raw.parse() {
            Ok(id) => Ok(Some(id)),
            Err(error) => {
                warn!(value = %raw.trim(), "ignoring unreadable checkpoint: {error}");
                Ok(None)
            }
        }
    }

    pub async fn save(&self, id: HistoryId) -> Result<(), RelayError> {
        self.store
            .set(CHECKPOINT_KEY, &id.to_string())
            .await
            .map_err(RelayError::storage)
    }
}
