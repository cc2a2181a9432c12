//! The sink-side persistent blob: topic map plus message-id map, written
//! atomically by a file-backed or KV-backed store. The sink client is the
//! blob's sole writer, so there is no read-modify-write race to guard
//! against here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize blob: {0}")]
    Serde(#[from] serde_json::Error),
    #[cfg(feature = "kv")]
    #[error("kv store error: {0}")]
    Kv(#[from] redis::RedisError),
}

/// The single JSON document persisted by the sink, either to a KV key or a
/// local file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedBlob {
    pub topics: HashMap<String, i64>,
    pub messages: HashMap<String, i64>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Storage-agnostic blob persistence. Implementations must make `save`
/// atomic from the perspective of a reader: a `load` never observes a
/// partially written blob.
#[async_trait::async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn load(&self) -> Result<PersistedBlob, PersistenceError>;
    async fn save(&self, blob: &PersistedBlob) -> Result<(), PersistenceError>;
}

/// Writes the blob to a local JSON file by full overwrite. A missing file
/// is treated as an empty blob rather than an error.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl PersistenceStore for FileStore {
    async fn load(&self) -> Result<PersistedBlob, PersistenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedBlob::default()),
            Err(e) => Err(PersistenceError::Read {
                path: self.path.display().to_string(),
                source: e,
            }),
        }
    }

    async fn save(&self, blob: &PersistedBlob) -> Result<(), PersistenceError> {
        let body = serde_json::to_vec_pretty(blob)?;
        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|source| PersistenceError::Write {
                path: tmp_path.display().to_string(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| PersistenceError::Write {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "telegram_data.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(feature = "kv")]
pub mod kv {
    use super::*;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;
    use tokio::sync::Mutex;

    const BLOB_KEY: &str = "telegram_data";

    /// Redis-backed blob store. The design note in the spec flags a plain
    /// `cache_ttl_seconds` TTL as dangerous for topic state that must outlive
    /// a short cache window; this store takes the larger of `cache_ttl_seconds`
    /// and `message_ttl_seconds` rather than the raw configured value.
    pub struct RedisStore {
        conn: Mutex<ConnectionManager>,
        ttl_seconds: u64,
    }

    impl RedisStore {
        pub async fn connect(
            url: &str,
            cache_ttl_seconds: u64,
            message_ttl_seconds: u64,
        ) -> Result<Self, PersistenceError> {
            let client = redis::Client::open(url)?;
            let conn = ConnectionManager::new(client).await?;
            Ok(Self {
                conn: Mutex::new(conn),
                ttl_seconds: cache_ttl_seconds.max(message_ttl_seconds),
            })
        }
    }

    #[async_trait::async_trait]
    impl PersistenceStore for RedisStore {
        async fn load(&self) -> Result<PersistedBlob, PersistenceError> {
            let mut conn = self.conn.lock().await;
            let raw: Option<String> = conn.get(BLOB_KEY).await?;
            match raw {
                Some(body) => Ok(serde_json::from_str(&body)?),
                None => Ok(PersistedBlob::default()),
            }
        }

        async fn save(&self, blob: &PersistedBlob) -> Result<(), PersistenceError> {
            let body = serde_json::to_string(blob)?;
            let mut conn = self.conn.lock().await;
            let _: () = conn.set_ex(BLOB_KEY, body, self.ttl_seconds).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_as_empty_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("telegram_data.json"));
        let blob = store.load().await.unwrap();
        assert!(blob.topics.is_empty());
        assert!(blob.messages.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("telegram_data.json"));
        let mut blob = PersistedBlob::default();
        blob.topics.insert("Alpha".to_string(), 77);
        blob.messages.insert("2024-01-01T00:00:00Z".to_string(), 555);
        blob.last_updated = Some(Utc::now());

        store.save(&blob).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.topics.get("Alpha"), Some(&77));
        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn save_overwrites_atomically_via_tmp_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telegram_data.json");
        let store = FileStore::new(&path);

        let mut first = PersistedBlob::default();
        first.topics.insert("A".to_string(), 1);
        store.save(&first).await.unwrap();

        let mut second = PersistedBlob::default();
        second.topics.insert("B".to_string(), 2);
        store.save(&second).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.topics.len(), 1);
        assert_eq!(loaded.topics.get("B"), Some(&2));
        assert!(!tmp_path_for(&path).exists());
    }
}
