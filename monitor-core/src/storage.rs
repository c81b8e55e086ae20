use crate::model::{MarketSnapshotDocument, SymbolUniverseDocument};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const SYMBOLS_DOCUMENT: &str = "symbols";
pub const MARKET_SNAPSHOT_DOCUMENT: &str = "symbols-track";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {0} does not exist")]
    Missing(String),

    #[error("document {name} is corrupt: {source}")]
    Corrupt {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on document {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Missing and corrupt documents are both treated as "no document".
    pub fn is_absent(&self) -> bool {
        matches!(self, StoreError::Missing(_) | StoreError::Corrupt { .. })
    }
}

/// Whole-document byte storage keyed by document name.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn read(&self, name: &str) -> Result<Vec<u8>, StoreError>;
    async fn write(&self, name: &str, contents: Vec<u8>) -> Result<(), StoreError>;
    async fn remove(&self, name: &str) -> Result<(), StoreError>;
}

/// Stores each document as `<data_dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        match tokio::fs::read(self.path(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::Missing(name.to_string())),
            Err(e) => Err(StoreError::Io {
                name: name.to_string(),
                source: e,
            }),
        }
    }

    async fn write(&self, name: &str, contents: Vec<u8>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            name: name.to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.data_dir).await.map_err(io_err)?;
        tokio::fs::write(self.path(name), contents).await.map_err(io_err)?;

        debug!("Wrote document {} to {}", name, self.data_dir.display());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                name: name.to_string(),
                source: e,
            }),
        }
    }
}

/// Process-local store backed by a map. Nothing is written to disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.documents.lock().contains_key(name)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        self.documents
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::Missing(name.to_string()))
    }

    async fn write(&self, name: &str, contents: Vec<u8>) -> Result<(), StoreError> {
        self.documents.lock().insert(name.to_string(), contents);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.documents.lock().remove(name);
        Ok(())
    }
}

/// Typed access to the two persisted documents.
#[derive(Clone)]
pub struct DocumentStore {
    backend: Arc<dyn SnapshotStore>,
}

impl DocumentStore {
    pub fn new(backend: Arc<dyn SnapshotStore>) -> Self {
        Self { backend }
    }

    pub async fn load_market_snapshot(&self) -> Result<MarketSnapshotDocument, StoreError> {
        self.load(MARKET_SNAPSHOT_DOCUMENT).await
    }

    pub async fn save_market_snapshot(&self, doc: &MarketSnapshotDocument) -> Result<(), StoreError> {
        self.save(MARKET_SNAPSHOT_DOCUMENT, doc).await
    }

    pub async fn clear_market_snapshot(&self) -> Result<(), StoreError> {
        self.backend.remove(MARKET_SNAPSHOT_DOCUMENT).await?;
        info!("Cleared {} document", MARKET_SNAPSHOT_DOCUMENT);
        Ok(())
    }

    pub async fn load_symbol_universe(&self) -> Result<SymbolUniverseDocument, StoreError> {
        self.load(SYMBOLS_DOCUMENT).await
    }

    pub async fn save_symbol_universe(&self, doc: &SymbolUniverseDocument) -> Result<(), StoreError> {
        self.save(SYMBOLS_DOCUMENT, doc).await
    }

    async fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T, StoreError> {
        let bytes = self.backend.read(name).await?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            name: name.to_string(),
            source,
        })
    }

    async fn save<T: Serialize + Sync>(&self, name: &str, doc: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(doc).map_err(|source| StoreError::Corrupt {
            name: name.to_string(),
            source,
        })?;
        self.backend.write(name, bytes).await
    }
}
