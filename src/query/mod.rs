//! Query execution
//!
//! ```text
//! Statement ─→ QueryExecutor ─┬─→ AccessPlanner ─→ ResultCursor   (select)
//!                             └─→ MutationEngine                 (insert/update/delete)
//! ```

pub mod cursor;
pub mod executor;
pub mod mutation;
pub mod planner;
pub mod statement;

pub use cursor::ResultCursor;
pub use executor::{QueryExecutor, QueryOutcome};
pub use mutation::MutationEngine;
pub use planner::{AccessPath, AccessPlanner, PointLookup, ScanPlan, ScanSource};
pub use statement::{
    Assignment, CreateTable, Delete, Insert, Limit, Literal, Operator, Predicate, Select,
    Statement, Update,
};
