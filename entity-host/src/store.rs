//! Durable snapshot persistence
//!
//! A [`StateStore`] keeps exactly one snapshot per [`EntityKey`]. Snapshots are
//! opaque bytes (the host encodes them), and `commit` replaces the previous
//! snapshot atomically: a reader never sees a mixture of old and new fields.
//!
//! # Backends
//!
//! - [`MemoryStateStore`] - process-local, for tests and ephemeral hosts
//! - [`RocksDbStateStore`] - `snapshots` column family, key = canonical entity key

use crate::{
    config::{StoreBackend, StoreConfig},
    error::{Error, Result},
    Config, EntityKey,
};
use async_trait::async_trait;
use dashmap::DashMap;
use rocksdb::{ColumnFamilyDescriptor, Options, WriteOptions, DB};
use std::path::Path;
use std::sync::Arc;

/// Column family holding entity snapshots
const CF_SNAPSHOTS: &str = "snapshots";

/// Snapshot persistence contract used by the actor host
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the last committed snapshot, if any
    async fn load(&self, key: &EntityKey) -> Result<Option<Vec<u8>>>;

    /// Atomically replace the snapshot for `key`
    async fn commit(&self, key: &EntityKey, snapshot: Vec<u8>) -> Result<()>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Open the backend selected by the configuration
pub fn open_store(config: &Config) -> Result<Arc<dyn StateStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory snapshot store; state will not survive restart");
            Ok(Arc::new(MemoryStateStore::new()))
        }
        StoreBackend::RocksDb => Ok(Arc::new(RocksDbStateStore::open(
            &config.data_dir,
            &config.store,
        )?)),
    }
}

/// In-memory snapshot store
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    snapshots: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Whether a snapshot exists for `key`
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.snapshots.contains_key(&key.canonical())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &EntityKey) -> Result<Option<Vec<u8>>> {
        Ok(self
            .snapshots
            .get(&key.canonical())
            .map(|entry| entry.value().clone()))
    }

    async fn commit(&self, key: &EntityKey, snapshot: Vec<u8>) -> Result<()> {
        self.snapshots.insert(key.canonical(), snapshot);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// RocksDB-backed snapshot store
pub struct RocksDbStateStore {
    db: Arc<DB>,
    sync_writes: bool,
}

impl std::fmt::Debug for RocksDbStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbStateStore")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl RocksDbStateStore {
    /// Open or create database
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let mut cf_opts = Options::default();
        // Snapshots are read on every activation, use LZ4 for speed
        cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open_cf_descriptors(
            &db_opts,
            path,
            vec![ColumnFamilyDescriptor::new(CF_SNAPSHOTS, cf_opts)],
        )?;

        tracing::info!(path = ?path, "Opened RocksDB snapshot store");

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    fn get_blocking(db: &DB, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = db
            .cf_handle(CF_SNAPSHOTS)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_SNAPSHOTS)))?;
        Ok(db.get_cf(&cf, key)?)
    }

    fn put_blocking(db: &DB, key: &[u8], value: &[u8], sync: bool) -> Result<()> {
        let cf = db
            .cf_handle(CF_SNAPSHOTS)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_SNAPSHOTS)))?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(sync);
        db.put_cf_opt(&cf, key, value, &write_opts)?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for RocksDbStateStore {
    async fn load(&self, key: &EntityKey) -> Result<Option<Vec<u8>>> {
        let db = Arc::clone(&self.db);
        let raw_key = key.canonical().into_bytes();
        tokio::task::spawn_blocking(move || Self::get_blocking(&db, &raw_key)).await?
    }

    async fn commit(&self, key: &EntityKey, snapshot: Vec<u8>) -> Result<()> {
        let db = Arc::clone(&self.db);
        let raw_key = key.canonical().into_bytes();
        let sync = self.sync_writes;
        tokio::task::spawn_blocking(move || Self::put_blocking(&db, &raw_key, &snapshot, sync))
            .await??;

        tracing::trace!(key = %key, "Snapshot committed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rocksdb"
    }
}
