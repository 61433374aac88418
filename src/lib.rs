// kvtable - SQL table semantics over an ordered key-value store
// Primary keys, unique indexes and secondary indexes encoded as ordered keys

#![warn(rust_2018_idioms)]

pub mod catalog;
pub mod codec;
pub mod config;
pub mod database;
pub mod query;
pub mod registry;
pub mod storage;

// Re-exports for convenience
pub use catalog::{Catalog, Column, ColumnType, Row, TableCounters, TableSchema};
pub use config::{BackendKind, StoreConfig};
pub use database::Database;
pub use query::{ResultCursor, Statement};
pub use registry::StoreRegistry;
pub use storage::{StorageEngine, StorageIterator, WriteBatch};

/// kvtable error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        /// Missing table, row or unique-key entry
        #[error("Not found: {0}")]
        NotFound(String),

        /// Statement is inconsistent with the table schema
        #[error("Schema violation: {0}")]
        SchemaViolation(String),

        /// Operator or statement kind the engine does not support
        #[error("Unsupported operation: {0}")]
        UnsupportedOperation(String),

        /// Literal cannot be interpreted with the required type
        #[error("Type error: {0}")]
        TypeError(String),

        /// Backend failure, propagated unchanged
        #[error("Storage error: {0}")]
        Storage(String),

        #[error("Serialization error: {0}")]
        Serialization(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    impl From<serde_json::Error> for Error {
        fn from(e: serde_json::Error) -> Self {
            Error::Serialization(e.to_string())
        }
    }

    impl From<std::io::Error> for Error {
        fn from(e: std::io::Error) -> Self {
            Error::Storage(e.to_string())
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;

    #[test]
    fn test_error_display() {
        let err = Error::SchemaViolation("delete must have a where condition".to_string());
        assert_eq!(
            err.to_string(),
            "Schema violation: delete must have a where condition"
        );
    }

    #[test]
    fn test_json_error_converts() {
        let parse: std::result::Result<u64, _> = serde_json::from_str("not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
