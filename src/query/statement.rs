//! Parsed statements.
//!
//! The engine consumes statements that have already been parsed; this module
//! only models them. Builders keep programmatic construction short:
//!
//! ```rust
//! use kvtable::query::statement::{Literal, Select};
//!
//! let stmt = Select::from("users")
//!     .columns(["id", "email"])
//!     .where_gt("id", 80)
//!     .limit(0, 10);
//! assert_eq!(stmt.predicate.unwrap().literal, Literal::Integer(80));
//! ```

use std::fmt;

use crate::catalog::{ColumnDef, Constraint};
use crate::error::{Error, Result};

/// Literal value in a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Integer(i64),
    Text(String),
}

impl Literal {
    /// Stored representation. Every value is kept as text.
    pub fn to_text(&self) -> String {
        match self {
            Literal::Integer(n) => n.to_string(),
            Literal::Text(s) => s.clone(),
        }
    }

    /// Interprets the literal as a non-negative integer.
    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Literal::Integer(n) => u64::try_from(*n)
                .map_err(|_| Error::TypeError(format!("{} is not a non-negative integer", n))),
            Literal::Text(s) => s
                .parse::<u64>()
                .map_err(|_| Error::TypeError(format!("'{}' is not a non-negative integer", s))),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(n) => write!(f, "{}", n),
            Literal::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for Literal {
    fn from(n: i64) -> Self {
        Literal::Integer(n)
    }
}

impl From<i32> for Literal {
    fn from(n: i32) -> Self {
        Literal::Integer(n as i64)
    }
}

impl From<u32> for Literal {
    fn from(n: u32) -> Self {
        Literal::Integer(n as i64)
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Text(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Text(s)
    }
}

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gt,
    Lt,
    Ne,
    Ge,
    Le,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Operator::Eq => "=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ne => "!=",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        };
        f.write_str(op)
    }
}

/// `column OP literal`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub column: String,
    pub op: Operator,
    pub literal: Literal,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: Operator, literal: impl Into<Literal>) -> Self {
        Self {
            column: column.into(),
            op,
            literal: literal.into(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.literal)
    }
}

/// `LIMIT offset, count`. A count of 0 means no cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limit {
    pub offset: u64,
    pub count: u64,
}

/// `SET column = literal`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub column: String,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<Constraint>,
    pub if_not_exists: bool,
}

impl CreateTable {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
            if_not_exists: false,
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub table: String,
    /// Explicit column list; `None` means every column in schema order.
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Literal>>,
}

impl Insert {
    pub fn into_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            rows: Vec::new(),
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn row<I, L>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Literal>,
    {
        self.rows.push(values.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub table: String,
    /// `None` selects every column.
    pub columns: Option<Vec<String>>,
    pub predicate: Option<Predicate>,
    pub limit: Option<Limit>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            predicate: None,
            limit: None,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.filter(Predicate::new(column, Operator::Eq, value))
    }

    pub fn where_gt(self, column: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.filter(Predicate::new(column, Operator::Gt, value))
    }

    pub fn where_lt(self, column: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.filter(Predicate::new(column, Operator::Lt, value))
    }

    pub fn limit(mut self, offset: u64, count: u64) -> Self {
        self.limit = Some(Limit { offset, count });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub predicate: Option<Predicate>,
    pub limit: Option<Limit>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            predicate: None,
            limit: None,
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.assignments.push(Assignment {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn limit(mut self, offset: u64, count: u64) -> Self {
        self.limit = Some(Limit { offset, count });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub table: String,
    pub predicate: Option<Predicate>,
    pub limit: Option<Limit>,
}

impl Delete {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            predicate: None,
            limit: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn limit(mut self, offset: u64, count: u64) -> Self {
        self.limit = Some(Limit { offset, count });
        self
    }
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateTable(CreateTable),
    Insert(Insert),
    Select(Select),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::CreateTable(_) => "create_table",
            Statement::Insert(_) => "insert",
            Statement::Select(_) => "select",
            Statement::Update(_) => "update",
            Statement::Delete(_) => "delete",
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Statement::CreateTable(s) => &s.table,
            Statement::Insert(s) => &s.table,
            Statement::Select(s) => &s.table,
            Statement::Update(s) => &s.table,
            Statement::Delete(s) => &s.table,
        }
    }
}

impl From<CreateTable> for Statement {
    fn from(s: CreateTable) -> Self {
        Statement::CreateTable(s)
    }
}

impl From<Insert> for Statement {
    fn from(s: Insert) -> Self {
        Statement::Insert(s)
    }
}

impl From<Select> for Statement {
    fn from(s: Select) -> Self {
        Statement::Select(s)
    }
}

impl From<Update> for Statement {
    fn from(s: Update) -> Self {
        Statement::Update(s)
    }
}

impl From<Delete> for Statement {
    fn from(s: Delete) -> Self {
        Statement::Delete(s)
    }
}
