//! Insert, update and delete.
//!
//! Row entries and index entries are always written together, so that every
//! live row has exactly one row key and one entry per indexed column.
//!
//! Counter read-allocate-write is serialized by a store-wide mutex. Updates
//! and deletes resolve their target rows through the planner and materialize
//! them before touching anything.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::catalog::{Catalog, Column, ColumnType, Row, TableCounters, TableSchema};
use crate::codec;
use crate::error::{Error, Result};
use crate::query::cursor::ResultCursor;
use crate::query::planner::AccessPlanner;
use crate::query::statement::{Delete, Insert, Limit, Literal, Predicate, Update};
use crate::storage::{StorageEngine, WriteBatch};

/// Row count above which insert batches are encoded in parallel.
const PARALLEL_ENCODE_THRESHOLD: usize = 100;

pub struct MutationEngine {
    storage: Arc<dyn StorageEngine>,
    catalog: Arc<Catalog>,
    counter_lock: Mutex<()>,
}

impl MutationEngine {
    pub fn new(storage: Arc<dyn StorageEngine>, catalog: Arc<Catalog>) -> Self {
        Self {
            storage,
            catalog,
            counter_lock: Mutex::new(()),
        }
    }

    /// Inserts every row of `stmt` as one write batch. Returns rows inserted.
    #[instrument(skip(self, stmt), fields(table = %stmt.table, rows = stmt.rows.len()))]
    pub fn insert(&self, stmt: &Insert) -> Result<u64> {
        let schema = self.catalog.get_schema(&stmt.table)?;
        let targets = insert_targets(&schema, stmt.columns.as_deref())?;
        if stmt.rows.is_empty() {
            return Ok(0);
        }

        let _guard = self.counter_lock.lock();
        let mut counters = self.catalog.get_counters(&schema.table_name)?;

        let rows = stmt
            .rows
            .iter()
            .map(|values| build_row(&schema, &targets, values, &mut counters))
            .collect::<Result<Vec<_>>>()?;
        self.check_unique(&schema, &rows)?;

        let entries: Vec<Vec<(Vec<u8>, Vec<u8>)>> = if rows.len() > PARALLEL_ENCODE_THRESHOLD {
            rows.par_iter()
                .map(|row| row_entries(&schema, row))
                .collect::<Result<_>>()?
        } else {
            rows.iter()
                .map(|row| row_entries(&schema, row))
                .collect::<Result<_>>()?
        };

        let mut batch = WriteBatch::with_capacity(entries.iter().map(Vec::len).sum());
        for (key, value) in entries.into_iter().flatten() {
            batch.put(key, value);
        }

        counters.rows += rows.len() as u64;
        self.catalog.set_counters(&schema.table_name, &counters)?;
        self.storage.write_batch(batch)?;

        info!(
            inserted = rows.len(),
            next_row_id = counters.auto_inc_id,
            "Inserted rows"
        );
        Ok(rows.len() as u64)
    }

    /// Rejects unique values already taken, either in the store or by an
    /// earlier row of the same statement.
    fn check_unique(&self, schema: &TableSchema, rows: &[Row]) -> Result<()> {
        for (name, column) in &schema.unique_indices {
            let mut seen = HashSet::with_capacity(rows.len());
            for row in rows {
                let value = row.get(name).unwrap_or_default();
                if !seen.insert(value)
                    || self
                        .storage
                        .get(&codec::unique_key(schema.table_id, column.index, value))?
                        .is_some()
                {
                    return Err(Error::SchemaViolation(format!(
                        "duplicate value '{}' for unique column {}",
                        value, name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Deletes matching rows, one batch per row. Returns rows deleted.
    #[instrument(skip(self, stmt), fields(table = %stmt.table))]
    pub fn delete(&self, stmt: &Delete) -> Result<u64> {
        let predicate = stmt.predicate.as_ref().ok_or_else(|| {
            Error::SchemaViolation("delete must have a where condition".to_string())
        })?;
        let schema = self.catalog.get_schema(&stmt.table)?;
        let rows = self.matching_rows(&schema, predicate, stmt.limit)?;

        let mut deleted = 0u64;
        let outcome = rows.iter().try_for_each(|row| -> Result<()> {
            let mut keys = vec![codec::row_key(schema.table_id, row.row_id)];
            keys.extend(index_keys(&schema, row));
            self.storage.batch_delete(keys)?;
            deleted += 1;
            Ok(())
        });

        if deleted > 0 {
            let _guard = self.counter_lock.lock();
            let mut counters = self.catalog.get_counters(&schema.table_name)?;
            counters.rows = counters.rows.saturating_sub(deleted);
            self.catalog.set_counters(&schema.table_name, &counters)?;
        }
        outcome?;

        info!(deleted, predicate = %predicate, "Deleted rows");
        Ok(deleted)
    }

    /// Applies assignments to matching rows, one batch per row. Returns rows
    /// updated.
    #[instrument(skip(self, stmt), fields(table = %stmt.table))]
    pub fn update(&self, stmt: &Update) -> Result<u64> {
        let predicate = stmt.predicate.as_ref().ok_or_else(|| {
            Error::SchemaViolation("update must have a where condition".to_string())
        })?;
        if stmt.assignments.is_empty() {
            return Err(Error::SchemaViolation(
                "update must assign at least one column".to_string(),
            ));
        }

        let schema = self.catalog.get_schema(&stmt.table)?;
        let mut touches_unique = false;
        for assignment in &stmt.assignments {
            let column = schema.require_column(&assignment.column)?;
            if column.name == schema.primary_key.name {
                return Err(Error::SchemaViolation(format!(
                    "primary key {} cannot be updated",
                    column.name
                )));
            }
            touches_unique |= schema.unique_indices.contains_key(&column.name);
        }

        let rows = self.matching_rows(&schema, predicate, stmt.limit)?;
        // unique checks and their writes must not interleave with inserts
        let _guard = touches_unique.then(|| self.counter_lock.lock());
        let mut updated = 0u64;
        for row in rows {
            let mut new_row = row.clone();
            for assignment in &stmt.assignments {
                new_row.set(assignment.column.clone(), assignment.value.to_text());
            }
            let batch = self.update_batch(&schema, &row, &new_row)?;
            self.storage.write_batch(batch)?;
            updated += 1;
        }

        info!(updated, predicate = %predicate, "Updated rows");
        Ok(updated)
    }

    /// Index deletes for changed values, then index puts, then the row.
    fn update_batch(&self, schema: &TableSchema, old: &Row, new: &Row) -> Result<WriteBatch> {
        let row_id = old.row_id;
        let id = row_id.to_string();
        let mut deletes = Vec::new();
        let mut puts = Vec::new();

        for (name, column) in &schema.unique_indices {
            let (before, after) = changed_values(old, new, name);
            if before == after {
                continue;
            }
            let new_key = codec::unique_key(schema.table_id, column.index, after);
            if let Some(owner) = self.storage.get(&new_key)? {
                if owner != id.as_bytes() {
                    return Err(Error::SchemaViolation(format!(
                        "duplicate value '{}' for unique column {}",
                        after, name
                    )));
                }
            }
            deletes.push(codec::unique_key(schema.table_id, column.index, before));
            puts.push((new_key, id.clone().into_bytes()));
        }

        for (name, column) in &schema.indices {
            let (before, after) = changed_values(old, new, name);
            if before == after {
                continue;
            }
            deletes.push(codec::secondary_key(schema.table_id, column.index, before, row_id));
            puts.push((
                codec::secondary_key(schema.table_id, column.index, after, row_id),
                id.clone().into_bytes(),
            ));
        }

        debug!(row_id, index_changes = puts.len(), "Built update batch");
        let mut batch = WriteBatch::with_capacity(deletes.len() + puts.len() + 1);
        for key in deletes {
            batch.delete(key);
        }
        for (key, value) in puts {
            batch.put(key, value);
        }
        batch.put(codec::row_key(schema.table_id, row_id), new.to_json()?);
        Ok(batch)
    }

    fn matching_rows(
        &self,
        schema: &TableSchema,
        predicate: &Predicate,
        limit: Option<Limit>,
    ) -> Result<Vec<Row>> {
        let counters = self.catalog.get_counters(&schema.table_name)?;
        let path = AccessPlanner::plan(schema, counters.auto_inc_id, Some(predicate), limit)?;
        ResultCursor::open(
            Arc::clone(&self.storage),
            schema.table_id,
            path,
            schema.column_names(),
        )?
        .collect_rows()
    }
}

fn changed_values<'a>(old: &'a Row, new: &'a Row, column: &str) -> (&'a str, &'a str) {
    (
        old.get(column).unwrap_or_default(),
        new.get(column).unwrap_or_default(),
    )
}

/// Columns receiving values, in value order.
fn insert_targets<'a>(schema: &'a TableSchema, columns: Option<&[String]>) -> Result<Vec<&'a Column>> {
    let Some(names) = columns else {
        return Ok(schema.columns.iter().collect());
    };
    let mut seen = HashSet::with_capacity(names.len());
    names
        .iter()
        .map(|name| {
            if !seen.insert(name.as_str()) {
                return Err(Error::SchemaViolation(format!(
                    "column {} listed twice",
                    name
                )));
            }
            schema.require_column(name)
        })
        .collect()
}

fn build_row(
    schema: &TableSchema,
    targets: &[&Column],
    values: &[Literal],
    counters: &mut TableCounters,
) -> Result<Row> {
    if values.len() != targets.len() {
        return Err(Error::SchemaViolation(format!(
            "column count mismatch: {} columns, {} values",
            targets.len(),
            values.len()
        )));
    }

    let primary = &schema.primary_key;
    let mut row = Row::new(0);
    let mut row_id = None;

    for (column, literal) in targets.iter().zip(values) {
        if column.name == primary.name {
            let id = literal.as_u64()?;
            if id < counters.auto_inc_id {
                return Err(Error::SchemaViolation(format!(
                    "primary key {} smaller than auto-increment {}",
                    id, counters.auto_inc_id
                )));
            }
            counters.auto_inc_id = id
                .checked_add(1)
                .ok_or_else(|| Error::TypeError(format!("primary key {} out of range", id)))?;
            row_id = Some(id);
        } else {
            row.set(column.name.clone(), literal.to_text());
        }
    }

    let row_id = match row_id {
        Some(id) => id,
        None if primary.column_type == ColumnType::Numeric => {
            let id = counters.auto_inc_id;
            counters.auto_inc_id += 1;
            id
        }
        None => {
            return Err(Error::TypeError(format!(
                "primary key {} is not numeric and must be supplied",
                primary.name
            )))
        }
    };
    row.row_id = row_id;
    row.set(primary.name.clone(), row_id.to_string());

    for column in &schema.columns {
        row.column_value.entry(column.name.clone()).or_default();
    }
    Ok(row)
}

/// Row entry plus one entry per unique and secondary column.
fn row_entries(schema: &TableSchema, row: &Row) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let id = row.row_id.to_string();
    let mut entries = Vec::with_capacity(1 + schema.unique_indices.len() + schema.indices.len());
    entries.push((codec::row_key(schema.table_id, row.row_id), row.to_json()?));
    for (name, column) in &schema.unique_indices {
        let value = row.get(name).unwrap_or_default();
        entries.push((
            codec::unique_key(schema.table_id, column.index, value),
            id.clone().into_bytes(),
        ));
    }
    for (name, column) in &schema.indices {
        let value = row.get(name).unwrap_or_default();
        entries.push((
            codec::secondary_key(schema.table_id, column.index, value, row.row_id),
            id.clone().into_bytes(),
        ));
    }
    Ok(entries)
}

/// Every index key derived from the row's current values.
fn index_keys(schema: &TableSchema, row: &Row) -> Vec<Vec<u8>> {
    let unique = schema.unique_indices.iter().map(|(name, column)| {
        codec::unique_key(schema.table_id, column.index, row.get(name).unwrap_or_default())
    });
    let secondary = schema.indices.iter().map(|(name, column)| {
        codec::secondary_key(
            schema.table_id,
            column.index,
            row.get(name).unwrap_or_default(),
            row.row_id,
        )
    });
    unique.chain(secondary).collect()
}
