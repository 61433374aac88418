//! Registry of open stores.
//!
//! Opening the same (backend, directory) twice through one registry returns
//! the same shared [`Database`], so a durable log is never appended to by two
//! handles at once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::{BackendKind, StoreConfig};
use crate::database::Database;
use crate::error::Result;

type StoreKey = (BackendKind, PathBuf);

#[derive(Debug, Default)]
pub struct StoreRegistry {
    handles: DashMap<StoreKey, Arc<Database>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the open handle for `config`, opening it on first use.
    pub fn open(&self, config: &StoreConfig) -> Result<Arc<Database>> {
        let key = (config.backend, config.store_dir());
        match self.handles.entry(key) {
            Entry::Occupied(entry) => {
                debug!(store = %entry.key().1.display(), "Reusing open store");
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let db = Arc::new(Database::open(config.clone())?);
                entry.insert(Arc::clone(&db));
                Ok(db)
            }
        }
    }

    pub fn get(&self, backend: BackendKind, dir: &Path) -> Option<Arc<Database>> {
        self.handles
            .get(&(backend, dir.to_path_buf()))
            .map(|db| Arc::clone(db.value()))
    }

    /// Closes and forgets one store. Returns `false` if it was not open.
    pub fn close(&self, backend: BackendKind, dir: &Path) -> Result<bool> {
        match self.handles.remove(&(backend, dir.to_path_buf())) {
            Some((_, db)) => {
                db.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes every open store, returning the first error after trying all.
    pub fn close_all(&self) -> Result<()> {
        let keys: Vec<StoreKey> = self.handles.iter().map(|e| e.key().clone()).collect();
        let mut first_error = None;
        for (backend, dir) in keys {
            if let Err(e) = self.close(backend, &dir) {
                first_error.get_or_insert(e);
            }
        }
        info!("Closed all stores");
        first_error.map_or(Ok(()), Err)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
