//! Store registry: names the configured stores, hands out one live
//! [`Database`] per name, and owns teardown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;

use barrel_core::error::{BarrelError, Result};
use barrel_core::kv::Kv;
use barrel_kv_memory::MemoryKv;
use barrel_kv_redb::RedbKv;

use crate::database::Database;
use crate::store::Store;

/// Startup configuration: one entry per store.
#[derive(Debug, Clone, Deserialize)]
pub struct BarrelConfig {
    pub stores: Vec<StoreDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreDef {
    pub name: String,
    #[serde(flatten)]
    pub backend: Backend,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Redb { path: PathBuf },
}

struct StoreRef {
    store: Store,
    databases: RwLock<HashMap<String, Arc<Database>>>,
}

/// Top-level handle: the configured stores and their open databases.
pub struct Barrel {
    stores: HashMap<String, Arc<StoreRef>>,
}

impl Barrel {
    pub const DEFAULT_STORE: &'static str = "default";

    pub fn new(config: BarrelConfig) -> Result<Self> {
        let mut stores = HashMap::new();
        for def in config.stores {
            let kv: Arc<dyn Kv> = match def.backend {
                Backend::Memory => Arc::new(MemoryKv::new()),
                Backend::Redb { path } => Arc::new(RedbKv::open(path)?),
            };
            let previous = stores.insert(
                def.name.clone(),
                Arc::new(StoreRef {
                    store: Store::new(kv),
                    databases: RwLock::new(HashMap::new()),
                }),
            );
            if previous.is_some() {
                return Err(BarrelError::Storage(format!(
                    "store declared twice: {}",
                    def.name
                )));
            }
            tracing::debug!(store = %def.name, "store registered");
        }
        Ok(Self { stores })
    }

    /// A single in-memory store named [`Self::DEFAULT_STORE`].
    pub fn memory() -> Self {
        let mut stores = HashMap::new();
        stores.insert(
            Self::DEFAULT_STORE.to_string(),
            Arc::new(StoreRef {
                store: Store::new(Arc::new(MemoryKv::new())),
                databases: RwLock::new(HashMap::new()),
            }),
        );
        Self { stores }
    }

    pub fn store_names(&self) -> Vec<&str> {
        self.stores.keys().map(String::as_str).collect()
    }

    fn store_ref(&self, store: &str) -> Result<&Arc<StoreRef>> {
        self.stores
            .get(store)
            .ok_or_else(|| BarrelError::UnknownStore(store.to_string()))
    }

    /// Open `name` in `store`, creating it on first open. Repeated opens
    /// return the same handle: one writer per name.
    pub async fn open(&self, store: &str, name: &str) -> Result<Arc<Database>> {
        self.open_with(store, name, true).await
    }

    pub async fn open_with(
        &self,
        store: &str,
        name: &str,
        create_if_missing: bool,
    ) -> Result<Arc<Database>> {
        let store_ref = self.store_ref(store)?;

        if let Some(db) = store_ref.databases.read().await.get(name) {
            return Ok(db.clone());
        }

        let mut databases = store_ref.databases.write().await;
        // Re-check: another opener may have won while we waited.
        if let Some(db) = databases.get(name) {
            return Ok(db.clone());
        }

        let db = Database::open(store_ref.store.clone(), name, create_if_missing).await?;
        databases.insert(name.to_string(), db.clone());
        tracing::debug!(store, db = name, seq = db.update_seq(), "database opened");
        Ok(db)
    }

    /// Stop the database's writer and delete everything it stored.
    pub async fn clean(&self, store: &str, name: &str) -> Result<()> {
        let store_ref = self.store_ref(store)?;

        let db = store_ref.databases.write().await.remove(name);
        match db {
            Some(db) => {
                db.close().await;
                store_ref.store.clean_db(name, db.id()).await?;
            }
            None => {
                // Never opened in this process; wipe any persisted state.
                match store_ref.store.open_db(name, false).await {
                    Ok((id, _)) => store_ref.store.clean_db(name, &id).await?,
                    Err(BarrelError::NotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        tracing::debug!(store, db = name, "database cleaned");
        Ok(())
    }
}
