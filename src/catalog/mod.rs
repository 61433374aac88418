//! Table catalog.
//!
//! Schemas, per-table counters and the table id roster are ordinary records
//! in the same store as the rows:
//!
//! ```text
//! tableinfo_<name>     → TableSchema JSON
//! tableinfoids_<name>  → TableCounters JSON
//! tableIds             → [1, 2, 3]
//! ```
//!
//! The roster and a schema cache live behind one reader/writer lock that is
//! never held across storage I/O. Table creation is serialized by a separate
//! mutex. Cached schemas are never invalidated: tables cannot be altered or
//! dropped.

pub mod schema;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::codec;
use crate::error::{Error, Result};
use crate::storage::{StorageEngine, WriteBatch};

pub use schema::{
    validate_name, Column, ColumnDef, ColumnType, Constraint, ConstraintKind, IndexKind, Row,
    TableCounters, TableSchema,
};

#[derive(Debug, Default)]
struct CatalogState {
    table_ids: Vec<u64>,
    next_table_id: u64,
    schemas: HashMap<String, Arc<TableSchema>>,
}

/// Table metadata for one open store.
pub struct Catalog {
    storage: Arc<dyn StorageEngine>,
    state: RwLock<CatalogState>,
    create_lock: Mutex<()>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Catalog")
            .field("table_ids", &state.table_ids)
            .field("next_table_id", &state.next_table_id)
            .finish()
    }
}

impl Catalog {
    /// Loads the table id roster from `storage`
    #[instrument(skip(storage))]
    pub fn open(storage: Arc<dyn StorageEngine>) -> Result<Self> {
        let table_ids: Vec<u64> = match storage.get(&codec::table_ids_key())? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };
        let next_table_id = table_ids.iter().max().map_or(1, |max| max + 1);

        info!(tables = table_ids.len(), next_table_id, "Loaded catalog");
        Ok(Self {
            storage,
            state: RwLock::new(CatalogState {
                table_ids,
                next_table_id,
                schemas: HashMap::new(),
            }),
            create_lock: Mutex::new(()),
        })
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        if self.state.read().schemas.contains_key(name) {
            return Ok(true);
        }
        Ok(self.storage.get(&codec::table_info_key(name))?.is_some())
    }

    /// Reserves the next table id. Ids are never handed out twice, even when
    /// the creation they were reserved for fails.
    pub fn allocate_table_id(&self) -> u64 {
        let mut state = self.state.write();
        let id = state.next_table_id;
        state.next_table_id += 1;
        id
    }

    /// Persists a new table.
    ///
    /// Writes the schema, zeroed counters and the roster including the new
    /// id. Returns `false` when the table already exists and `if_not_exists`
    /// is set.
    #[instrument(skip(self, schema), fields(table = %schema.table_name, table_id = schema.table_id))]
    pub fn create_table(&self, schema: TableSchema, if_not_exists: bool) -> Result<bool> {
        let _creating = self.create_lock.lock();

        if self.table_exists(&schema.table_name)? {
            if if_not_exists {
                debug!("Table already exists, skipping");
                return Ok(false);
            }
            return Err(Error::SchemaViolation(format!(
                "table {} already exists",
                schema.table_name
            )));
        }

        let mut table_ids = self.list_table_ids();
        if table_ids.contains(&schema.table_id) {
            return Err(Error::SchemaViolation(format!(
                "table id {} is already in use",
                schema.table_id
            )));
        }
        table_ids.push(schema.table_id);

        let mut batch = WriteBatch::with_capacity(3);
        batch
            .put(
                codec::table_info_key(&schema.table_name),
                serde_json::to_vec(&schema)?,
            )
            .put(
                codec::table_counters_key(&schema.table_name),
                serde_json::to_vec(&TableCounters::default())?,
            )
            .put(codec::table_ids_key(), serde_json::to_vec(&table_ids)?);
        self.storage.write_batch(batch)?;

        let mut state = self.state.write();
        if state.table_ids.len() + 1 != table_ids.len() {
            return Err(Error::Storage(format!(
                "table roster changed while creating {}",
                schema.table_name
            )));
        }
        state.table_ids = table_ids;
        state.next_table_id = state.next_table_id.max(schema.table_id + 1);
        info!(columns = schema.columns.len(), "Created table");
        state
            .schemas
            .insert(schema.table_name.clone(), Arc::new(schema));
        Ok(true)
    }

    /// Schema of `name`, cached after the first read.
    pub fn get_schema(&self, name: &str) -> Result<Arc<TableSchema>> {
        if let Some(schema) = self.state.read().schemas.get(name) {
            return Ok(Arc::clone(schema));
        }

        let bytes = self
            .storage
            .get(&codec::table_info_key(name))?
            .ok_or_else(|| Error::NotFound(format!("table {}", name)))?;
        let schema: Arc<TableSchema> = Arc::new(serde_json::from_slice(&bytes)?);

        debug!(table = name, "Cached table schema");
        let mut state = self.state.write();
        Ok(Arc::clone(
            state.schemas.entry(name.to_string()).or_insert(schema),
        ))
    }

    pub fn get_counters(&self, name: &str) -> Result<TableCounters> {
        let bytes = self
            .storage
            .get(&codec::table_counters_key(name))?
            .ok_or_else(|| Error::NotFound(format!("counters of table {}", name)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn set_counters(&self, name: &str, counters: &TableCounters) -> Result<()> {
        self.storage.put(
            &codec::table_counters_key(name),
            &serde_json::to_vec(counters)?,
        )
    }

    /// Ids of every created table, in creation order.
    pub fn list_table_ids(&self) -> Vec<u64> {
        self.state.read().table_ids.clone()
    }
}
