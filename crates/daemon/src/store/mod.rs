// Shared key/value store: the slow side channel every context may read.
//
// Values are JSON blobs, last write wins per key, no transactions across
// keys. Two backends: in-memory (tests, offline) and SQLite.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;
use std::fmt;

use annotator_common::types::{DocumentRecord, Session, TrajectoryEntry};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub trait SharedStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    fn put(&self, key: &str, value: serde_json::Value) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Well-known store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKey {
    Session,
    /// URL → document record map for one session.
    Documents(String),
    /// Capped trajectory log for one session.
    Trajectory(String),
    Onboarding,
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::Documents(session_id) => write!(f, "documents:{session_id}"),
            Self::Trajectory(session_id) => write!(f, "trajectory:{session_id}"),
            Self::Onboarding => f.write_str("onboarding"),
        }
    }
}

pub type DocumentMap = BTreeMap<String, DocumentRecord>;

pub fn load_json<T: DeserializeOwned>(
    store: &dyn SharedStore,
    key: &StoreKey,
) -> Result<Option<T>> {
    let key = key.to_string();
    match store.get(&key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .with_context(|| format!("failed to decode store value `{key}`")),
        None => Ok(None),
    }
}

pub fn save_json<T: Serialize>(store: &dyn SharedStore, key: &StoreKey, value: &T) -> Result<()> {
    let key = key.to_string();
    let value = serde_json::to_value(value)
        .with_context(|| format!("failed to encode store value `{key}`"))?;
    store.put(&key, value)
}

pub fn load_session(store: &dyn SharedStore) -> Result<Option<Session>> {
    load_json(store, &StoreKey::Session)
}

pub fn load_documents(store: &dyn SharedStore, session_id: &str) -> Result<DocumentMap> {
    Ok(load_json(store, &StoreKey::Documents(session_id.to_string()))?.unwrap_or_default())
}

pub fn load_trajectory(store: &dyn SharedStore, session_id: &str) -> Result<Vec<TrajectoryEntry>> {
    Ok(load_json(store, &StoreKey::Trajectory(session_id.to_string()))?.unwrap_or_default())
}

/// One-time UI hints already shown to the reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OnboardingFlags {
    pub welcome_seen: bool,
    pub pdf_hint_seen: bool,
}

impl OnboardingFlags {
    pub fn load(store: &dyn SharedStore) -> Result<Self> {
        Ok(load_json(store, &StoreKey::Onboarding)?.unwrap_or_default())
    }

    pub fn save(&self, store: &dyn SharedStore) -> Result<()> {
        save_json(store, &StoreKey::Onboarding, self)
    }
}
