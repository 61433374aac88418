//! Database handle.
//!
//! Owns one storage backend, its catalog and the statement executor. A handle
//! is `Send + Sync`; statements run on the caller's thread.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::catalog::Catalog;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::query::statement::{CreateTable, Delete, Insert, Select, Statement, Update};
use crate::query::{QueryExecutor, QueryOutcome, ResultCursor};
use crate::storage::{self, KvPair, StorageEngine};

pub struct Database {
    config: StoreConfig,
    storage: Arc<dyn StorageEngine>,
    executor: QueryExecutor,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .finish()
    }
}

impl Database {
    /// Opens the store described by `config`
    #[instrument(skip(config), fields(backend = %config.backend, name = %config.name))]
    pub fn open(config: StoreConfig) -> Result<Self> {
        let storage = storage::open_storage(&config)?;
        Self::with_storage(config, storage)
    }

    /// Wraps an already opened backend
    pub fn with_storage(config: StoreConfig, storage: Arc<dyn StorageEngine>) -> Result<Self> {
        let catalog = Arc::new(Catalog::open(Arc::clone(&storage))?);
        let executor = QueryExecutor::new(Arc::clone(&storage), catalog);
        info!(store = %config.store_dir().display(), "Database ready");
        Ok(Self {
            config,
            storage,
            executor,
        })
    }

    /// Fresh volatile database
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::default())
    }

    pub fn execute(&self, stmt: &Statement) -> Result<QueryOutcome> {
        self.executor.execute(stmt)
    }

    /// Runs a non-select statement; returns rows affected.
    pub fn exec(&self, stmt: &Statement) -> Result<u64> {
        self.executor.exec(stmt)
    }

    /// Runs a select statement.
    pub fn query(&self, stmt: &Statement) -> Result<ResultCursor> {
        self.executor.query(stmt)
    }

    pub fn create_table(&self, stmt: &CreateTable) -> Result<bool> {
        self.executor.create_table(stmt)
    }

    pub fn insert(&self, stmt: Insert) -> Result<u64> {
        self.exec(&stmt.into())
    }

    pub fn select(&self, stmt: &Select) -> Result<ResultCursor> {
        self.executor.select(stmt)
    }

    pub fn update(&self, stmt: Update) -> Result<u64> {
        self.exec(&stmt.into())
    }

    pub fn delete(&self, stmt: Delete) -> Result<u64> {
        self.exec(&stmt.into())
    }

    /// First `limit` raw key/value pairs of the whole store, in key order.
    pub fn scan_limit(&self, limit: usize) -> Result<Vec<KvPair>> {
        self.storage.scan(b"", None, limit)
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.executor.catalog()
    }

    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }

    pub fn compact(&self) -> Result<()> {
        self.storage.compact()
    }

    pub fn close(&self) -> Result<()> {
        info!(store = %self.config.store_dir().display(), "Closing database");
        self.storage.close()
    }
}
