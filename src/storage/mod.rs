//! Storage layer
//!
//! # Architecture
//!
//! Tables are flattened into a single ordered key space (see [`crate::codec`]):
//!
//! ```text
//! StorageEngine (ordered by KeyComparator)
//!   ├─→ tableinfo_* / tableinfoids_* / tableIds   catalog records
//!   ├─→ t_r_<tid>_<rowid>                         rows
//!   └─→ t_i_<tid>_<idx>_<value>[_<rowid>]         index entries
//! ```
//!
//! ## Backends
//!
//! - [`MemoryStorage`]: volatile `BTreeMap` ordered by the comparator
//! - [`LogStorage`]: append-only batch log with an in-memory index, optional zstd
//!
//! [`open_storage`] picks one from a [`StoreConfig`].

pub mod compression;
pub mod engine;
pub mod log;
pub mod memory;

use std::sync::Arc;

use tracing::info;

use crate::config::{BackendKind, StoreConfig};
use crate::error::Result;

pub use compression::CompressionAlgorithm;
pub use engine::{BatchOp, KvPair, StorageEngine, StorageIterator, WriteBatch};
pub use log::{LogOptions, LogStorage};
pub use memory::MemoryStorage;

/// Opens the backend named by `config.backend`.
pub fn open_storage(config: &StoreConfig) -> Result<Arc<dyn StorageEngine>> {
    let storage: Arc<dyn StorageEngine> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryStorage::with_comparator(config.comparator)),
        BackendKind::Log => Arc::new(LogStorage::open(
            config.store_dir(),
            LogOptions {
                comparator: config.comparator,
                compression: config.compression,
                sync_writes: config.sync_writes,
            },
        )?),
    };

    info!(
        backend = %config.backend,
        store = %config.store_dir().display(),
        comparator = config.comparator.name(),
        "Opened storage"
    );
    Ok(storage)
}
