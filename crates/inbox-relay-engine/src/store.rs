use anyhow::{Context, Result, bail};
use libsql::Builder;
use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::StateBackend;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    /// Removes the record. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// One file per key inside a state directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            bail!("invalid state key: {key:?}");
        }
        Ok(self.dir.join(key))
    }
}

impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => {
                Err(error).with_context(|| format!("cannot read state file {}", path.display()))
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("cannot create state directory {}", self.dir.display()))?;

        // rename keeps readers from ever seeing a half-written record
        let tmp = self.dir.join(format!(".{key}.tmp"));
        tokio::fs::write(&tmp, value)
            .await
            .with_context(|| format!("cannot write state file {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("cannot replace state file {}", path.display()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(error).with_context(|| format!("cannot remove state file {}", path.display()))
            }
        }
    }
}

/// Embedded libsql database holding a single `kv_state` table.
#[derive(Clone)]
pub struct LibsqlStore {
    db: Arc<libsql::Database>,
}

impl LibsqlStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create database directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("cannot open state database {}", path.display()))?;
        let store = Self { db: Arc::new(db) };
        ensure_schema(&store.connect()?).await?;
        Ok(store)
    }

    fn connect(&self) -> Result<libsql::Connection> {
        self.db.connect().context("cannot connect to state database")
    }
}

async fn ensure_schema(conn: &libsql::Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv_state (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        )",
        (),
    )
    .await?;
    Ok(())
}

impl KeyValueStore for LibsqlStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT value FROM kv_state WHERE key = ?1",
                libsql::params![key],
            )
            .await?;

        let value = match rows.next().await? {
            Some(row) => Some(row.get::<String>(0)?),
            None => None,
        };
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO kv_state (key, value)
             VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value",
            libsql::params![key, value],
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM kv_state WHERE key = ?1", libsql::params![key])
            .await?;
        Ok(())
    }
}

/// In-process store, mainly for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Backend selected from configuration at startup.
#[derive(Clone)]
pub enum StateStore {
    Files(FileStore),
    Libsql(LibsqlStore),
}

impl StateStore {
    pub async fn open(backend: &StateBackend) -> Result<Self> {
        let store = match backend {
            StateBackend::Files(dir) => StateStore::Files(FileStore::new(dir.clone())),
            StateBackend::Libsql(path) => StateStore::Libsql(LibsqlStore::open(path).await?),
        };
        Ok(store)
    }
}

impl KeyValueStore for StateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            StateStore::Files(store) => store.get(key).await,
            StateStore::Libsql(store) => store.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        match self {
            StateStore::Files(store) => store.set(key, value).await,
            StateStore::Libsql(store) => store.set(key, value).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            StateStore::Files(store) => store.delete(key).await,
            StateStore::Libsql(store) => store.delete(key).await,
        }
    }
}
