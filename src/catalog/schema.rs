//! Table schemas, counters and rows.
//!
//! # Overview
//!
//! A table is described once, at creation, and never altered afterwards:
//!
//! ```text
//! TableSchema
//!   ├─→ columns        ordered, 1-based index used in index keys
//!   ├─→ primary_key    exactly one column; its value is the row id
//!   ├─→ unique_indices column → t_i_<tid>_<idx>_<value>
//!   └─→ indices        column → t_i_<tid>_<idx>_<value>_<rowid>
//! ```
//!
//! Only [`TableCounters`] change over a table's life.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum identifier length.
pub const MAX_NAME_LEN: usize = 128;

/// Column type tag.
///
/// Values are stored as text regardless of type; the tag decides whether a
/// primary key can be auto-assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Text,
}

/// A column of a created table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// 1-based position, stable for the life of the table.
    pub index: usize,
    pub name: String,
    pub column_type: ColumnType,
}

/// Column as declared in `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    pub fn numeric(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Numeric)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    /// Non-unique secondary index.
    Index,
}

/// Table constraint naming one or more columns.
///
/// A unique or index constraint over several columns indexes each column on
/// its own; composite keys are not built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
}

impl Constraint {
    pub fn primary_key(column: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::PrimaryKey,
            columns: vec![column.into()],
        }
    }

    pub fn unique<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: ConstraintKind::Unique,
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn index<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: ConstraintKind::Index,
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// How a column is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Primary,
    Unique,
    Secondary,
}

/// Persisted description of a table.
///
/// Serialized as JSON under `tableinfo_<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_id: u64,
    pub table_name: String,
    pub columns: Vec<Column>,
    /// Comma-joined column names in declaration order.
    pub column_list: String,
    pub primary_key: Column,
    pub unique_indices: BTreeMap<String, Column>,
    pub indices: BTreeMap<String, Column>,
}

impl TableSchema {
    /// Builds and validates a schema.
    ///
    /// # Errors
    ///
    /// [`Error::SchemaViolation`] when a name is not a valid identifier, a
    /// column is declared twice, a constraint names an unknown column, a
    /// column carries more than one constraint kind, or the table does not
    /// have exactly one single-column primary key.
    pub fn build(
        table_id: u64,
        table_name: &str,
        definitions: &[ColumnDef],
        constraints: &[Constraint],
    ) -> Result<Self> {
        validate_name(table_name)?;
        if definitions.is_empty() {
            return Err(Error::SchemaViolation(format!(
                "table {} has no columns",
                table_name
            )));
        }

        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(definitions.len());
        for (i, def) in definitions.iter().enumerate() {
            validate_name(&def.name)?;
            if !seen.insert(def.name.as_str()) {
                return Err(Error::SchemaViolation(format!(
                    "duplicate column {} in table {}",
                    def.name, table_name
                )));
            }
            columns.push(Column {
                index: i + 1,
                name: def.name.clone(),
                column_type: def.column_type,
            });
        }

        let lookup = |name: &str| -> Result<Column> {
            columns
                .iter()
                .find(|c| c.name == name)
                .cloned()
                .ok_or_else(|| {
                    Error::SchemaViolation(format!(
                        "constraint names unknown column {} in table {}",
                        name, table_name
                    ))
                })
        };

        let mut primary_key: Option<Column> = None;
        let mut unique_indices = BTreeMap::new();
        let mut indices = BTreeMap::new();
        let mut constrained: HashMap<String, ConstraintKind> = HashMap::new();

        for constraint in constraints {
            if constraint.columns.is_empty() {
                return Err(Error::SchemaViolation(
                    "constraint without columns".to_string(),
                ));
            }
            if constraint.kind == ConstraintKind::PrimaryKey {
                if constraint.columns.len() > 1 {
                    return Err(Error::SchemaViolation(format!(
                        "composite primary key ({}) is not supported",
                        constraint.columns.join(",")
                    )));
                }
                if primary_key.is_some() {
                    return Err(Error::SchemaViolation(format!(
                        "table {} declares more than one primary key",
                        table_name
                    )));
                }
            }

            for name in &constraint.columns {
                let column = lookup(name)?;
                // a column may repeat across constraints of one non-primary kind
                match constrained.insert(column.name.clone(), constraint.kind) {
                    None => {}
                    Some(previous)
                        if previous == constraint.kind
                            && previous != ConstraintKind::PrimaryKey => {}
                    Some(_) => {
                        return Err(Error::SchemaViolation(format!(
                            "column {} carries more than one key constraint",
                            column.name
                        )))
                    }
                }
                match constraint.kind {
                    ConstraintKind::PrimaryKey => primary_key = Some(column),
                    ConstraintKind::Unique => {
                        unique_indices.insert(column.name.clone(), column);
                    }
                    ConstraintKind::Index => {
                        indices.insert(column.name.clone(), column);
                    }
                }
            }
        }

        let primary_key = primary_key.ok_or_else(|| {
            Error::SchemaViolation(format!("table {} has no primary key", table_name))
        })?;

        let column_list = columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(",");

        Ok(Self {
            table_id,
            table_name: table_name.to_string(),
            columns,
            column_list,
            primary_key,
            unique_indices,
            indices,
        })
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Like [`TableSchema::column`], failing with SchemaViolation.
    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| {
            Error::SchemaViolation(format!(
                "column {} does not exist in table {}",
                name, self.table_name
            ))
        })
    }

    pub fn index_kind(&self, name: &str) -> Option<IndexKind> {
        if self.primary_key.name == name {
            Some(IndexKind::Primary)
        } else if self.unique_indices.contains_key(name) {
            Some(IndexKind::Unique)
        } else if self.indices.contains_key(name) {
            Some(IndexKind::Secondary)
        } else {
            None
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Per-table counters, serialized under `tableinfoids_<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounters {
    /// Next row id handed out when the primary key is omitted.
    pub auto_inc_id: u64,
    pub rows: u64,
}

impl Default for TableCounters {
    fn default() -> Self {
        Self {
            auto_inc_id: 1,
            rows: 0,
        }
    }
}

/// One table row. Every value is text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub row_id: u64,
    pub column_value: BTreeMap<String, String>,
}

impl Row {
    pub fn new(row_id: u64) -> Self {
        Self {
            row_id,
            column_value: BTreeMap::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.column_value.get(column).map(String::as_str)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.column_value.insert(column.into(), value.into());
    }

    /// Copy holding only `columns`; absent columns project as `""`.
    pub fn project(&self, columns: &[String]) -> Row {
        let column_value = columns
            .iter()
            .map(|c| (c.clone(), self.get(c).unwrap_or_default().to_string()))
            .collect();
        Row {
            row_id: self.row_id,
            column_value,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Validate a table or column name.
///
/// Names must be non-empty, at most 128 characters, start with a letter or
/// underscore and contain only ASCII alphanumerics and underscores.
///
/// # Examples
///
/// ```rust
/// use kvtable::catalog::validate_name;
///
/// assert!(validate_name("utxo_transfer").is_ok());
/// assert!(validate_name("_private").is_ok());
/// assert!(validate_name("2fast").is_err());
/// assert!(validate_name("has-dash").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<()> {
    let Some(first_char) = name.chars().next() else {
        return Err(Error::SchemaViolation("Name cannot be empty".to_string()));
    };

    if name.len() > MAX_NAME_LEN {
        return Err(Error::SchemaViolation(format!(
            "Name cannot be longer than {} characters",
            MAX_NAME_LEN
        )));
    }

    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(Error::SchemaViolation(format!(
            "Name {} must start with a letter or underscore",
            name
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::SchemaViolation(format!(
            "Name {} can only contain letters, numbers, and underscores",
            name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Result<TableSchema> {
        TableSchema::build(
            1,
            "users",
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
    }

    #[test]
    fn test_build_schema() -> Result<()> {
        let schema = users()?;
        assert_eq!(schema.column_list, "id,email,city,note");
        assert_eq!(schema.primary_key.index, 1);
        assert_eq!(schema.require_column("city")?.index, 3);
        assert_eq!(schema.index_kind("id"), Some(IndexKind::Primary));
        assert_eq!(schema.index_kind("email"), Some(IndexKind::Unique));
        assert_eq!(schema.index_kind("city"), Some(IndexKind::Secondary));
        assert_eq!(schema.index_kind("note"), None);
        Ok(())
    }

    #[test]
    fn test_multi_column_index_indexes_each_column() -> Result<()> {
        let schema = TableSchema::build(
            1,
            "t",
            &[ColumnDef::numeric("id"), ColumnDef::text("a"), ColumnDef::text("b")],
            &[Constraint::primary_key("id"), Constraint::index(["a", "b"])],
        )?;
        assert_eq!(schema.indices.len(), 2);

        let overlapping = TableSchema::build(
            1,
            "t",
            &[ColumnDef::numeric("id"), ColumnDef::text("a"), ColumnDef::text("b")],
            &[
                Constraint::primary_key("id"),
                Constraint::index(["a", "b"]),
                Constraint::index(["b"]),
            ],
        )?;
        assert_eq!(overlapping.indices.len(), 2);
        Ok(())
    }

    #[test]
    fn test_schema_rejections() {
        let cols = [ColumnDef::numeric("id"), ColumnDef::text("a")];

        // no primary key
        assert!(TableSchema::build(1, "t", &cols, &[]).is_err());
        // unknown column
        assert!(TableSchema::build(1, "t", &cols, &[Constraint::primary_key("nope")]).is_err());
        // two kinds on one column
        assert!(TableSchema::build(
            1,
            "t",
            &cols,
            &[Constraint::primary_key("id"), Constraint::unique(["id"])]
        )
        .is_err());
        // composite primary key
        let composite = Constraint {
            kind: ConstraintKind::PrimaryKey,
            columns: vec!["id".to_string(), "a".to_string()],
        };
        assert!(TableSchema::build(1, "t", &cols, &[composite]).is_err());
        // duplicate column
        let dup = [ColumnDef::numeric("id"), ColumnDef::text("id")];
        assert!(TableSchema::build(1, "t", &dup, &[Constraint::primary_key("id")]).is_err());
        // bad table name
        assert!(TableSchema::build(1, "bad name", &cols, &[Constraint::primary_key("id")]).is_err());
    }

    #[test]
    fn test_schema_json_layout() -> Result<()> {
        let schema = users()?;
        let json = serde_json::to_value(&schema)?;
        assert_eq!(json["table_id"], 1);
        assert_eq!(json["primary_key"]["name"], "id");
        let back: TableSchema = serde_json::from_value(json)?;
        assert_eq!(back, schema);
        Ok(())
    }

    #[test]
    fn test_row_projection() -> Result<()> {
        let mut row = Row::new(7);
        row.set("id", "7");
        row.set("email", "a@b");
        let projected = row.project(&["email".to_string(), "missing".to_string()]);
        assert_eq!(projected.row_id, 7);
        assert_eq!(projected.get("email"), Some("a@b"));
        assert_eq!(projected.get("missing"), Some(""));
        assert_eq!(projected.get("id"), None);

        assert_eq!(Row::from_json(&row.to_json()?)?, row);
        Ok(())
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("users").is_ok());
        assert!(validate_name("utxo_asset_transfer_1542610800000").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(129)).is_err());
        assert!(validate_name("1abc").is_err());
        assert!(validate_name("a.b").is_err());
    }

    #[test]
    fn test_counters_start_at_one() {
        let counters = TableCounters::default();
        assert_eq!(counters.auto_inc_id, 1);
        assert_eq!(counters.rows, 0);
    }
}
