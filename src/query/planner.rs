//! Access path planning.
//!
//! Turns a single-column predicate into either a point lookup or a bounded
//! range scan with concrete keys:
//!
//! | predicate            | path                                              |
//! |----------------------|---------------------------------------------------|
//! | none                 | rows `[t_r_T_1, t_r_T_next)`                      |
//! | `pk = n`             | get `t_r_T_n`                                     |
//! | `uniq = v`           | get `t_i_T_I_v` → row id → get row                |
//! | `sec = v`            | seek `t_i_T_I_v_0`, while prefix `t_i_T_I_v_`     |
//! | `pk > n` / `pk < n`  | rows after / before `t_r_T_n`                     |
//! | `idx > n` / `idx < n`| index group `t_i_T_I_` after / before the boundary|
//!
//! A range offset is applied by seeking: `> n` with offset `k > 0` starts at
//! `n + k` inclusive, `< n` with offset `k` starts at `k`. Other scans skip
//! `offset` qualifying rows.
//!
//! Boundary keys always have as many segments as the entries they are
//! compared with, so numeric segments order numerically.

use tracing::debug;

use crate::catalog::{IndexKind, TableSchema};
use crate::codec;
use crate::error::{Error, Result};
use crate::query::statement::{Limit, Operator, Predicate};

/// Direct point read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointLookup {
    /// Row key.
    Row(Vec<u8>),
    /// Unique-index key whose value is the row id.
    Unique(Vec<u8>),
}

/// What the scanned entries hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSource {
    /// Row entries, decoded directly.
    Rows,
    /// Index entries; the value is a row id to fetch.
    Index,
}

/// Range scan over one table's rows or one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    pub source: ScanSource,
    /// Seek target.
    pub start: Vec<u8>,
    /// Skip an entry equal to `start`.
    pub exclusive_start: bool,
    /// Exclusive upper bound.
    pub end: Option<Vec<u8>>,
    /// Every qualifying key starts with this; the scan stops at the first
    /// key that does not.
    pub prefix: Vec<u8>,
    /// The key remainder after `prefix` must be a single segment.
    pub exact_prefix: bool,
    /// Only entries whose indexed value is a decimal qualify.
    pub numeric_values: bool,
    /// Qualifying rows to skip before the first one returned.
    pub offset: u64,
    /// 0 means no cap.
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    Point(PointLookup),
    Scan(ScanPlan),
    /// Nothing can match.
    Empty,
}

/// Stateless planner.
pub struct AccessPlanner;

impl AccessPlanner {
    /// Plans `predicate` against `schema`.
    ///
    /// `next_row_id` is the table's auto-increment counter; every row id is
    /// below it.
    pub fn plan(
        schema: &TableSchema,
        next_row_id: u64,
        predicate: Option<&Predicate>,
        limit: Option<Limit>,
    ) -> Result<AccessPath> {
        let limit = limit.unwrap_or_default();
        let table_id = schema.table_id;

        let Some(predicate) = predicate else {
            return Ok(AccessPath::Scan(ScanPlan {
                source: ScanSource::Rows,
                start: codec::row_key(table_id, 1),
                exclusive_start: false,
                end: Some(codec::row_key(table_id, next_row_id)),
                prefix: codec::row_prefix(table_id),
                exact_prefix: false,
                numeric_values: false,
                offset: limit.offset,
                count: limit.count,
            }));
        };

        match predicate.op {
            Operator::Eq | Operator::Gt | Operator::Lt => {}
            op => {
                return Err(Error::UnsupportedOperation(format!(
                    "operator {} is not supported",
                    op
                )))
            }
        }

        let column = schema.require_column(&predicate.column)?;
        let kind = schema.index_kind(&column.name).ok_or_else(|| {
            Error::SchemaViolation(format!(
                "column {} of table {} is not indexed",
                column.name, schema.table_name
            ))
        })?;
        let idx = column.index;

        let path = match (predicate.op, kind) {
            // a point result is a single row; any offset skips it
            (Operator::Eq, IndexKind::Primary) => {
                let row_id = predicate.literal.as_u64()?;
                if limit.offset > 0 {
                    AccessPath::Empty
                } else {
                    AccessPath::Point(PointLookup::Row(codec::row_key(table_id, row_id)))
                }
            }
            (Operator::Eq, IndexKind::Unique) if limit.offset > 0 => AccessPath::Empty,
            (Operator::Eq, IndexKind::Unique) => AccessPath::Point(PointLookup::Unique(
                codec::unique_key(table_id, idx, &predicate.literal.to_text()),
            )),
            (Operator::Eq, IndexKind::Secondary) => {
                let value = predicate.literal.to_text();
                AccessPath::Scan(ScanPlan {
                    source: ScanSource::Index,
                    start: codec::secondary_key(table_id, idx, &value, 0),
                    exclusive_start: false,
                    end: None,
                    prefix: codec::secondary_prefix(table_id, idx, &value),
                    exact_prefix: true,
                    numeric_values: false,
                    offset: limit.offset,
                    count: limit.count,
                })
            }
            (op, kind) => {
                let boundary = predicate.literal.as_u64()?;
                // the offset moves the seek target instead of skipping rows
                let (seek, exclusive_start) = match op {
                    Operator::Gt if limit.offset == 0 => (boundary, true),
                    Operator::Gt => (boundary.saturating_add(limit.offset), false),
                    _ => (limit.offset, false),
                };
                let (source, start, end, prefix) = match kind {
                    IndexKind::Primary => {
                        let at = codec::row_key(table_id, boundary);
                        let last = codec::row_key(table_id, next_row_id);
                        let start = codec::row_key(table_id, seek);
                        let end = if op == Operator::Gt { last } else { at };
                        (ScanSource::Rows, start, Some(end), codec::row_prefix(table_id))
                    }
                    IndexKind::Unique => {
                        let start = codec::unique_key(table_id, idx, &seek.to_string());
                        let end = (op == Operator::Lt)
                            .then(|| codec::unique_key(table_id, idx, &boundary.to_string()));
                        (ScanSource::Index, start, end, codec::index_prefix(table_id, idx))
                    }
                    IndexKind::Secondary => {
                        let start = if exclusive_start {
                            // every entry for `boundary` sorts below (boundary, u64::MAX)
                            codec::secondary_key(table_id, idx, &boundary.to_string(), u64::MAX)
                        } else {
                            codec::secondary_key(table_id, idx, &seek.to_string(), 0)
                        };
                        let end = (op == Operator::Lt).then(|| {
                            codec::secondary_key(table_id, idx, &boundary.to_string(), 0)
                        });
                        (ScanSource::Index, start, end, codec::index_prefix(table_id, idx))
                    }
                };
                AccessPath::Scan(ScanPlan {
                    source,
                    start,
                    exclusive_start,
                    end,
                    prefix,
                    exact_prefix: false,
                    numeric_values: source == ScanSource::Index,
                    offset: 0,
                    count: limit.count,
                })
            }
        };

        debug!(table = %schema.table_name, predicate = %predicate, ?kind, "Planned access path");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, Constraint};

    fn schema() -> TableSchema {
        TableSchema::build(
            7,
            "t",
            &[
                ColumnDef::numeric("id"),
                ColumnDef::text("email"),
                ColumnDef::text("city"),
                ColumnDef::text("note"),
            ],
            &[
                Constraint::primary_key("id"),
                Constraint::unique(["email"]),
                Constraint::index(["city"]),
            ],
        )
        .expect("valid schema")
    }

    fn scan(path: AccessPath) -> ScanPlan {
        match path {
            AccessPath::Scan(plan) => plan,
            other => panic!("expected scan, got {:?}", other),
        }
    }

    #[test]
    fn test_full_scan_bounds() -> Result<()> {
        let plan = scan(AccessPlanner::plan(&schema(), 11, None, Some(Limit { offset: 2, count: 3 }))?);
        assert_eq!(plan.start, b"t_r_7_1".to_vec());
        assert_eq!(plan.end, Some(b"t_r_7_11".to_vec()));
        assert_eq!(plan.prefix, b"t_r_7_".to_vec());
        assert_eq!((plan.offset, plan.count), (2, 3));
        Ok(())
    }

    #[test]
    fn test_point_paths() -> Result<()> {
        let s = schema();
        let pk = Predicate::new("id", Operator::Eq, 5);
        assert_eq!(
            AccessPlanner::plan(&s, 11, Some(&pk), None)?,
            AccessPath::Point(PointLookup::Row(b"t_r_7_5".to_vec()))
        );

        let uniq = Predicate::new("email", Operator::Eq, "a@b");
        assert_eq!(
            AccessPlanner::plan(&s, 11, Some(&uniq), None)?,
            AccessPath::Point(PointLookup::Unique(b"t_i_7_2_a@b".to_vec()))
        );

        assert_eq!(
            AccessPlanner::plan(&s, 11, Some(&pk), Some(Limit { offset: 1, count: 0 }))?,
            AccessPath::Empty
        );
        Ok(())
    }

    #[test]
    fn test_secondary_equality() -> Result<()> {
        let p = Predicate::new("city", Operator::Eq, "oslo");
        let plan = scan(AccessPlanner::plan(&schema(), 11, Some(&p), None)?);
        assert_eq!(plan.source, ScanSource::Index);
        assert_eq!(plan.start, b"t_i_7_3_oslo_0".to_vec());
        assert_eq!(plan.prefix, b"t_i_7_3_oslo_".to_vec());
        assert!(plan.exact_prefix);
        Ok(())
    }

    #[test]
    fn test_range_boundaries() -> Result<()> {
        let s = schema();

        let gt = scan(AccessPlanner::plan(&s, 101, Some(&Predicate::new("id", Operator::Gt, 80)), None)?);
        assert_eq!(gt.start, b"t_r_7_80".to_vec());
        assert!(gt.exclusive_start);
        assert_eq!(gt.end, Some(b"t_r_7_101".to_vec()));

        let lt = scan(AccessPlanner::plan(&s, 101, Some(&Predicate::new("id", Operator::Lt, 5)), None)?);
        assert_eq!(lt.end, Some(b"t_r_7_5".to_vec()));

        let sec_gt = scan(AccessPlanner::plan(&s, 1, Some(&Predicate::new("city", Operator::Gt, 3)), None)?);
        assert_eq!(sec_gt.start, format!("t_i_7_3_3_{}", u64::MAX).into_bytes());
        assert_eq!(sec_gt.prefix, b"t_i_7_3_".to_vec());

        let sec_lt = scan(AccessPlanner::plan(&s, 1, Some(&Predicate::new("city", Operator::Lt, 3)), None)?);
        assert_eq!(sec_lt.start, b"t_i_7_3_0_0".to_vec());
        assert_eq!(sec_lt.end, Some(b"t_i_7_3_3_0".to_vec()));

        let uniq_lt = scan(AccessPlanner::plan(&s, 1, Some(&Predicate::new("email", Operator::Lt, 3)), None)?);
        assert_eq!(uniq_lt.start, b"t_i_7_2_0".to_vec());
        assert_eq!(uniq_lt.end, Some(b"t_i_7_2_3".to_vec()));
        assert!(uniq_lt.numeric_values);
        Ok(())
    }

    #[test]
    fn test_range_offset_moves_seek_target() -> Result<()> {
        let s = schema();
        let limit = Some(Limit { offset: 5, count: 3 });

        let gt = scan(AccessPlanner::plan(&s, 101, Some(&Predicate::new("id", Operator::Gt, 80)), limit)?);
        assert_eq!(gt.start, b"t_r_7_85".to_vec());
        assert!(!gt.exclusive_start);
        assert_eq!((gt.offset, gt.count), (0, 3));

        let lt = scan(AccessPlanner::plan(&s, 101, Some(&Predicate::new("id", Operator::Lt, 80)), limit)?);
        assert_eq!(lt.start, b"t_r_7_5".to_vec());
        assert_eq!(lt.end, Some(b"t_r_7_80".to_vec()));

        let uniq_gt = scan(AccessPlanner::plan(&s, 1, Some(&Predicate::new("email", Operator::Gt, 80)), limit)?);
        assert_eq!(uniq_gt.start, b"t_i_7_2_85".to_vec());
        assert_eq!(uniq_gt.end, None);

        let sec_gt = scan(AccessPlanner::plan(&s, 1, Some(&Predicate::new("city", Operator::Gt, 80)), limit)?);
        assert_eq!(sec_gt.start, b"t_i_7_3_85_0".to_vec());
        assert!(!sec_gt.exclusive_start);

        let sec_lt = scan(AccessPlanner::plan(&s, 1, Some(&Predicate::new("city", Operator::Lt, 80)), limit)?);
        assert_eq!(sec_lt.start, b"t_i_7_3_5_0".to_vec());
        assert_eq!(sec_lt.end, Some(b"t_i_7_3_80_0".to_vec()));
        assert_eq!(sec_lt.offset, 0);

        // equality scans still skip qualifying rows
        let eq = scan(AccessPlanner::plan(&s, 1, Some(&Predicate::new("city", Operator::Eq, "oslo")), limit)?);
        assert_eq!(eq.offset, 5);
        Ok(())
    }

    #[test]
    fn test_rejections() {
        let s = schema();
        for op in [Operator::Ne, Operator::Ge, Operator::Le] {
            let p = Predicate::new("id", op, 1);
            assert!(matches!(
                AccessPlanner::plan(&s, 1, Some(&p), None),
                Err(Error::UnsupportedOperation(_))
            ));
        }

        let unindexed = Predicate::new("note", Operator::Eq, "x");
        assert!(matches!(
            AccessPlanner::plan(&s, 1, Some(&unindexed), None),
            Err(Error::SchemaViolation(_))
        ));

        let unknown = Predicate::new("nope", Operator::Eq, "x");
        assert!(matches!(
            AccessPlanner::plan(&s, 1, Some(&unknown), None),
            Err(Error::SchemaViolation(_))
        ));

        let text_pk = Predicate::new("id", Operator::Eq, "abc");
        assert!(matches!(
            AccessPlanner::plan(&s, 1, Some(&text_pk), None),
            Err(Error::TypeError(_))
        ));

        let text_range = Predicate::new("city", Operator::Gt, "abc");
        assert!(matches!(
            AccessPlanner::plan(&s, 1, Some(&text_range), None),
            Err(Error::TypeError(_))
        ));
    }
}
