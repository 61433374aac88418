//! Result cursor.
//!
//! One "fetch next row" contract over point results and streaming scans. A
//! cursor is lazy, finite and single-pass; once it reports no more rows it
//! keeps doing so, and its backend iterator has already been released.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{error, warn};

use crate::catalog::Row;
use crate::codec::comparator::is_decimal;
use crate::codec::{self, KeyComparator};
use crate::error::{Error, Result};
use crate::query::planner::{AccessPath, PointLookup, ScanPlan, ScanSource};
use crate::storage::{StorageEngine, StorageIterator};

struct Stream {
    iter: Box<dyn StorageIterator>,
    storage: Arc<dyn StorageEngine>,
    comparator: KeyComparator,
    table_id: u64,
    source: ScanSource,
    end: Option<Vec<u8>>,
    prefix: Vec<u8>,
    exact_prefix: bool,
    numeric_values: bool,
    to_skip: u64,
    /// `None` when uncapped.
    remaining: Option<u64>,
}

enum Verdict {
    Stop,
    Skip,
    Take,
}

impl Stream {
    fn verdict(&self) -> Verdict {
        if !self.iter.valid() {
            return Verdict::Stop;
        }
        let key = self.iter.key();
        if !key.starts_with(&self.prefix) {
            return Verdict::Stop;
        }
        if let Some(end) = &self.end {
            if self.comparator.compare(key, end) != Ordering::Less {
                return Verdict::Stop;
            }
        }
        // value containing the separator, e.g. `ab_c` while scanning `ab`
        let rest = &key[self.prefix.len()..];
        if self.exact_prefix && codec::contains_separator(rest) {
            return Verdict::Skip;
        }
        if self.numeric_values {
            let value = codec::split_segments(rest).first().copied().unwrap_or_default();
            // decimals sort between empty and text values
            if value.is_empty() {
                return Verdict::Skip;
            }
            if !is_decimal(value) {
                return Verdict::Stop;
            }
        }
        Verdict::Take
    }

    fn row_id_of_entry(&self) -> Result<u64> {
        std::str::from_utf8(self.iter.value())
            .ok()
            .and_then(|v| v.parse().ok())
            .or_else(|| codec::trailing_row_id(self.iter.key()))
            .ok_or_else(|| {
                Error::Serialization(format!(
                    "index entry {} holds no row id",
                    String::from_utf8_lossy(self.iter.key())
                ))
            })
    }

    /// Next qualifying row, `Ok(None)` when exhausted.
    fn step(&mut self) -> Result<Option<Row>> {
        loop {
            if self.remaining == Some(0) {
                return Ok(None);
            }
            match self.verdict() {
                Verdict::Stop => {
                    self.iter.status()?;
                    return Ok(None);
                }
                Verdict::Skip => {
                    self.iter.next();
                    continue;
                }
                Verdict::Take => {}
            }
            if self.to_skip > 0 {
                self.to_skip -= 1;
                self.iter.next();
                continue;
            }

            let row = match self.source {
                ScanSource::Rows => Row::from_json(self.iter.value())?,
                ScanSource::Index => {
                    let row_id = self.row_id_of_entry()?;
                    match self.storage.get(&codec::row_key(self.table_id, row_id))? {
                        Some(bytes) => Row::from_json(&bytes)?,
                        None => {
                            warn!(
                                table_id = self.table_id,
                                row_id, "Index entry points at a missing row"
                            );
                            self.iter.next();
                            continue;
                        }
                    }
                }
            };

            self.iter.next();
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Ok(Some(row));
        }
    }
}

enum State {
    Point(Option<Row>),
    Stream(Box<Stream>),
    Done,
}

/// Rows produced by a select.
pub struct ResultCursor {
    columns: Vec<String>,
    state: State,
    point: bool,
    returned: u64,
    error: Option<Error>,
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("columns", &self.columns)
            .field("point", &self.point)
            .field("returned", &self.returned)
            .field("done", &matches!(self.state, State::Done))
            .finish()
    }
}

impl ResultCursor {
    /// Executes `path` against `storage`.
    ///
    /// Point lookups are read immediately; scans open a backend iterator and
    /// read lazily.
    pub fn open(
        storage: Arc<dyn StorageEngine>,
        table_id: u64,
        path: AccessPath,
        columns: Vec<String>,
    ) -> Result<Self> {
        let (state, point) = match path {
            AccessPath::Empty => (State::Point(None), true),
            AccessPath::Point(lookup) => (State::Point(Self::lookup(&*storage, table_id, lookup)?), true),
            AccessPath::Scan(plan) => (State::Stream(Box::new(Self::start(storage, table_id, plan)?)), false),
        };
        Ok(Self {
            columns,
            state,
            point,
            returned: 0,
            error: None,
        })
    }

    /// Cursor that yields nothing.
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            state: State::Done,
            point: true,
            returned: 0,
            error: None,
        }
    }

    fn lookup(storage: &dyn StorageEngine, table_id: u64, lookup: PointLookup) -> Result<Option<Row>> {
        let row_key = match lookup {
            PointLookup::Row(key) => key,
            PointLookup::Unique(key) => match storage.get(&key)? {
                Some(value) => {
                    let row_id = std::str::from_utf8(&value)
                        .ok()
                        .and_then(|v| v.parse::<u64>().ok())
                        .ok_or_else(|| {
                            Error::Serialization(format!(
                                "unique entry {} holds no row id",
                                String::from_utf8_lossy(&key)
                            ))
                        })?;
                    codec::row_key(table_id, row_id)
                }
                None => return Ok(None),
            },
        };
        storage
            .get(&row_key)?
            .map(|bytes| Row::from_json(&bytes))
            .transpose()
    }

    fn start(storage: Arc<dyn StorageEngine>, table_id: u64, plan: ScanPlan) -> Result<Stream> {
        let comparator = storage.comparator();
        let mut iter = storage.iter(&plan.start, plan.end.as_deref())?;
        if plan.exclusive_start
            && iter.valid()
            && comparator.compare(iter.key(), &plan.start) == Ordering::Equal
        {
            iter.next();
        }
        Ok(Stream {
            iter,
            storage,
            comparator,
            table_id,
            source: plan.source,
            end: plan.end,
            prefix: plan.prefix,
            exact_prefix: plan.exact_prefix,
            numeric_values: plan.numeric_values,
            to_skip: plan.offset,
            remaining: (plan.count > 0).then_some(plan.count),
        })
    }

    /// Next row, or `None` once the result is exhausted or failed.
    pub fn next_row(&mut self) -> Option<Row> {
        let row = match &mut self.state {
            State::Done => return None,
            State::Point(row) => {
                let row = row.take();
                self.finish();
                row
            }
            State::Stream(stream) => match stream.step() {
                Ok(Some(row)) => Some(row),
                Ok(None) => {
                    self.finish();
                    None
                }
                Err(e) => {
                    error!("Scan aborted: {}", e);
                    self.error = Some(e);
                    self.finish();
                    None
                }
            },
        }?;

        self.returned += 1;
        Some(row.project(&self.columns))
    }

    fn finish(&mut self) {
        if let State::Stream(stream) = &mut self.state {
            stream.iter.close();
        }
        self.state = State::Done;
    }

    /// Error that ended the scan early, if any. Exhaustion is not an error.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    pub fn is_point(&self) -> bool {
        self.point
    }

    pub fn rows_returned(&self) -> u64 {
        self.returned
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Drains the cursor, failing if the scan ended on an error.
    pub fn collect_rows(mut self) -> Result<Vec<Row>> {
        let rows: Vec<Row> = self.by_ref().collect();
        match self.take_error() {
            Some(e) => Err(e),
            None => Ok(rows),
        }
    }
}

impl Iterator for ResultCursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.next_row()
    }
}

impl Drop for ResultCursor {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::planner::AccessPath;
    use crate::storage::MemoryStorage;

    fn seeded() -> Result<MemoryStorage> {
        let storage = MemoryStorage::new();
        for id in 1..=5u64 {
            let mut row = Row::new(id);
            row.set("id", id.to_string());
            row.set("name", format!("n{}", id));
            storage.put(&codec::row_key(1, id), &row.to_json()?)?;
        }
        Ok(storage)
    }

    fn rows_plan(offset: u64, count: u64) -> AccessPath {
        AccessPath::Scan(ScanPlan {
            source: ScanSource::Rows,
            start: codec::row_key(1, 1),
            exclusive_start: false,
            end: Some(codec::row_key(1, 6)),
            prefix: codec::row_prefix(1),
            exact_prefix: false,
            numeric_values: false,
            offset,
            count,
        })
    }

    fn columns() -> Vec<String> {
        vec!["id".to_string(), "name".to_string()]
    }

    #[test]
    fn test_point_produced_once() -> Result<()> {
        let storage = seeded()?;
        let path = AccessPath::Point(PointLookup::Row(codec::row_key(1, 3)));
        let mut cursor = ResultCursor::open(Arc::new(storage), 1, path, columns())?;

        assert!(cursor.is_point());
        let row = cursor.next_row().expect("row 3");
        assert_eq!(row.get("name"), Some("n3"));
        assert!(cursor.next_row().is_none());
        assert!(cursor.next_row().is_none());
        assert_eq!(cursor.rows_returned(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_point_is_empty() -> Result<()> {
        let storage = Arc::new(seeded()?);
        let path = AccessPath::Point(PointLookup::Row(codec::row_key(1, 99)));
        let mut cursor = ResultCursor::open(storage.clone(), 1, path, columns())?;
        assert!(cursor.next_row().is_none());

        let path = AccessPath::Point(PointLookup::Unique(codec::unique_key(1, 2, "x")));
        let mut cursor = ResultCursor::open(storage, 1, path, columns())?;
        assert!(cursor.next_row().is_none());
        assert!(cursor.take_error().is_none());
        Ok(())
    }

    #[test]
    fn test_stream_offset_and_count() -> Result<()> {
        let storage = seeded()?;
        let cursor = ResultCursor::open(Arc::new(storage), 1, rows_plan(1, 2), columns())?;
        let ids: Vec<u64> = cursor.map(|r| r.row_id).collect();
        assert_eq!(ids, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn test_exhausted_stream_releases_iterator() -> Result<()> {
        let storage = seeded()?;
        let mut cursor = ResultCursor::open(Arc::new(storage.clone()), 1, rows_plan(0, 0), columns())?;
        assert_eq!(storage.open_iterators(), 1);

        assert_eq!(cursor.by_ref().count(), 5);
        assert_eq!(storage.open_iterators(), 0);
        assert!(cursor.next_row().is_none());
        assert!(cursor.take_error().is_none());
        Ok(())
    }

    #[test]
    fn test_dropped_stream_releases_iterator() -> Result<()> {
        let storage = seeded()?;
        let mut cursor = ResultCursor::open(Arc::new(storage.clone()), 1, rows_plan(0, 0), columns())?;
        cursor.next_row();
        drop(cursor);
        assert_eq!(storage.open_iterators(), 0);
        Ok(())
    }

    #[test]
    fn test_corrupt_row_ends_scan_with_error() -> Result<()> {
        let storage = seeded()?;
        storage.put(&codec::row_key(1, 2), b"not json")?;

        let mut cursor = ResultCursor::open(Arc::new(storage.clone()), 1, rows_plan(0, 0), columns())?;
        assert_eq!(cursor.next_row().map(|r| r.row_id), Some(1));
        assert!(cursor.next_row().is_none());
        assert!(matches!(cursor.take_error(), Some(Error::Serialization(_))));
        assert_eq!(storage.open_iterators(), 0);
        Ok(())
    }

    #[test]
    fn test_projection() -> Result<()> {
        let storage = seeded()?;
        let path = AccessPath::Point(PointLookup::Row(codec::row_key(1, 1)));
        let mut cursor = ResultCursor::open(Arc::new(storage), 1, path, vec!["name".to_string()])?;
        let row = cursor.next_row().expect("row 1");
        assert_eq!(row.column_value.len(), 1);
        assert_eq!(cursor.column_names(), &["name".to_string()]);
        Ok(())
    }
}
