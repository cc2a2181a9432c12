//! Sink-side client for the bridge: forum topic lookup/creation, formatted
//! message delivery, existence-verification reconciliation, and persistence
//! of the topic/message mappings.

pub mod api;
pub mod client;
pub mod persistence;

pub use api::{ApiError, HttpTelegramApi, TelegramApi};
pub use client::{SinkClient, SinkConfig, SinkError};
pub use persistence::{FileStore, PersistedBlob, PersistenceError, PersistenceStore};

#[cfg(feature = "kv")]
pub use persistence::kv::RedisStore;
