//! Statement executor.
//!
//! Dispatches parsed statements to the catalog, the planner and the mutation
//! engine.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use kvtable::catalog::{Catalog, ColumnDef, Constraint};
//! use kvtable::query::statement::{CreateTable, Insert, Literal, Select};
//! use kvtable::query::QueryExecutor;
//! use kvtable::storage::{MemoryStorage, StorageEngine};
//!
//! # fn main() -> kvtable::error::Result<()> {
//! let storage: Arc<dyn StorageEngine> = Arc::new(MemoryStorage::new());
//! let catalog = Arc::new(Catalog::open(Arc::clone(&storage))?);
//! let executor = QueryExecutor::new(storage, catalog);
//!
//! executor.create_table(
//!     &CreateTable::new("users")
//!         .column(ColumnDef::numeric("id"))
//!         .column(ColumnDef::text("name"))
//!         .constraint(Constraint::primary_key("id")),
//! )?;
//! executor.exec(&Insert::into_table("users").row([Literal::from(1), "ada".into()]).into())?;
//!
//! let mut rows = executor.select(&Select::from("users").where_eq("id", 1))?;
//! assert_eq!(rows.next_row().unwrap().get("name"), Some("ada"));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::catalog::{Catalog, TableSchema};
use crate::error::{Error, Result};
use crate::query::cursor::ResultCursor;
use crate::query::mutation::MutationEngine;
use crate::query::planner::AccessPlanner;
use crate::query::statement::{CreateTable, Select, Statement};
use crate::storage::StorageEngine;

/// Result of [`QueryExecutor::execute`].
#[derive(Debug)]
pub enum QueryOutcome {
    /// `false` when the table already existed and creation was skipped.
    Created(bool),
    /// Rows inserted, updated or deleted.
    Affected(u64),
    Rows(ResultCursor),
}

impl QueryOutcome {
    pub fn affected(&self) -> Option<u64> {
        match self {
            QueryOutcome::Affected(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_rows(self) -> Option<ResultCursor> {
        match self {
            QueryOutcome::Rows(cursor) => Some(cursor),
            _ => None,
        }
    }
}

/// Statement executor
pub struct QueryExecutor {
    storage: Arc<dyn StorageEngine>,
    catalog: Arc<Catalog>,
    mutations: MutationEngine,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("catalog", &self.catalog)
            .finish()
    }
}

impl QueryExecutor {
    /// Create a new executor over `storage`
    pub fn new(storage: Arc<dyn StorageEngine>, catalog: Arc<Catalog>) -> Self {
        let mutations = MutationEngine::new(Arc::clone(&storage), Arc::clone(&catalog));
        Self {
            storage,
            catalog,
            mutations,
        }
    }

    /// Execute any statement
    pub fn execute(&self, stmt: &Statement) -> Result<QueryOutcome> {
        debug!(kind = stmt.kind(), table = stmt.table(), "Executing statement");

        match stmt {
            Statement::CreateTable(create) => self.create_table(create).map(QueryOutcome::Created),
            Statement::Insert(insert) => self.mutations.insert(insert).map(QueryOutcome::Affected),
            Statement::Update(update) => self.mutations.update(update).map(QueryOutcome::Affected),
            Statement::Delete(delete) => self.mutations.delete(delete).map(QueryOutcome::Affected),
            Statement::Select(select) => self.select(select).map(QueryOutcome::Rows),
        }
    }

    /// Execute a statement that produces no rows; returns rows affected
    /// (1 or 0 for a create).
    pub fn exec(&self, stmt: &Statement) -> Result<u64> {
        let outcome = match stmt {
            Statement::Select(_) => None,
            other => Some(self.execute(other)?),
        };
        match outcome {
            Some(QueryOutcome::Created(created)) => Ok(u64::from(created)),
            Some(QueryOutcome::Affected(n)) => Ok(n),
            Some(QueryOutcome::Rows(_)) | None => Err(Error::UnsupportedOperation(
                "select statements must be run as a query".to_string(),
            )),
        }
    }

    /// Execute a select statement
    pub fn query(&self, stmt: &Statement) -> Result<ResultCursor> {
        match stmt {
            Statement::Select(select) => self.select(select),
            other => Err(Error::UnsupportedOperation(format!(
                "{} statements do not return rows",
                other.kind()
            ))),
        }
    }

    /// Creates a table; `Ok(false)` when it exists and `if_not_exists` is set.
    #[instrument(skip(self, stmt), fields(table = %stmt.table))]
    pub fn create_table(&self, stmt: &CreateTable) -> Result<bool> {
        if self.catalog.table_exists(&stmt.table)? {
            if stmt.if_not_exists {
                return Ok(false);
            }
            return Err(Error::SchemaViolation(format!(
                "table {} already exists",
                stmt.table
            )));
        }

        let table_id = self.catalog.allocate_table_id();
        let schema = TableSchema::build(table_id, &stmt.table, &stmt.columns, &stmt.constraints)?;
        self.catalog.create_table(schema, stmt.if_not_exists)
    }

    /// Plans and opens a cursor for `stmt`
    #[instrument(skip(self, stmt), fields(table = %stmt.table))]
    pub fn select(&self, stmt: &Select) -> Result<ResultCursor> {
        let schema = self.catalog.get_schema(&stmt.table)?;
        let columns = match &stmt.columns {
            None => schema.column_names(),
            Some(names) => names
                .iter()
                .map(|name| schema.require_column(name).map(|c| c.name.clone()))
                .collect::<Result<Vec<_>>>()?,
        };

        let counters = self.catalog.get_counters(&schema.table_name)?;
        let path = AccessPlanner::plan(
            &schema,
            counters.auto_inc_id,
            stmt.predicate.as_ref(),
            stmt.limit,
        )?;
        ResultCursor::open(Arc::clone(&self.storage), schema.table_id, path, columns)
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, Constraint};
    use crate::query::statement::{Delete, Insert, Literal, Operator, Predicate};
    use crate::storage::MemoryStorage;

    fn executor() -> Result<QueryExecutor> {
        let storage: Arc<dyn StorageEngine> = Arc::new(MemoryStorage::new());
        let catalog = Arc::new(Catalog::open(Arc::clone(&storage))?);
        let executor = QueryExecutor::new(storage, catalog);
        executor.create_table(
            &CreateTable::new("items")
                .column(ColumnDef::numeric("id"))
                .column(ColumnDef::text("label"))
                .constraint(Constraint::primary_key("id")),
        )?;
        Ok(executor)
    }

    #[test]
    fn test_dispatch() -> Result<()> {
        let executor = executor()?;

        let insert: Statement = Insert::into_table("items")
            .row([Literal::from(1), "a".into()])
            .into();
        assert_eq!(executor.execute(&insert)?.affected(), Some(1));

        let select: Statement = Select::from("items").into();
        let rows = executor
            .execute(&select)?
            .into_rows()
            .map(|cursor| cursor.count())
            .unwrap_or_default();
        assert_eq!(rows, 1);
        Ok(())
    }

    #[test]
    fn test_exec_and_query_reject_wrong_kind() -> Result<()> {
        let executor = executor()?;
        let select: Statement = Select::from("items").into();
        assert!(matches!(executor.exec(&select), Err(Error::UnsupportedOperation(_))));

        let delete: Statement = Delete::from("items")
            .filter(Predicate::new("id", Operator::Eq, 1))
            .into();
        assert!(matches!(executor.query(&delete), Err(Error::UnsupportedOperation(_))));
        assert_eq!(executor.exec(&delete)?, 0);
        Ok(())
    }

    #[test]
    fn test_create_table_twice() -> Result<()> {
        let executor = executor()?;
        let create = CreateTable::new("items")
            .column(ColumnDef::numeric("id"))
            .constraint(Constraint::primary_key("id"));
        assert!(matches!(executor.create_table(&create), Err(Error::SchemaViolation(_))));
        assert!(!executor.create_table(&create.if_not_exists())?);
        Ok(())
    }

    #[test]
    fn test_select_validates_columns() -> Result<()> {
        let executor = executor()?;
        let bad = Select::from("items").columns(["nope"]);
        assert!(matches!(executor.select(&bad), Err(Error::SchemaViolation(_))));

        let missing = Select::from("ghost");
        assert!(matches!(executor.select(&missing), Err(Error::NotFound(_))));
        Ok(())
    }
}
