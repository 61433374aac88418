//! Composite key encoding
//!
//! Every table entry lives in the ordered store under a key built from
//! separator-joined segments:
//!
//! ```text
//! t_r_<tableId>_<rowId>                     → row JSON
//! t_i_<tableId>_<columnIdx>_<value>         → row id   (unique index)
//! t_i_<tableId>_<columnIdx>_<value>_<rowId> → row id   (secondary index)
//!
//! tableinfo_<name>                          → schema JSON
//! tableinfoids_<name>                       → counters JSON
//! tableIds                                  → JSON array of table ids
//! ```
//!
//! Segments are not escaped. A value containing the separator produces a key
//! with extra segments, which then orders byte-wise against well-formed keys.

pub mod comparator;

pub use comparator::KeyComparator;

/// Segment separator.
pub const SEPARATOR: &str = "_";

pub const TABLE_PREFIX: &str = "t";
pub const ROW_PREFIX: &str = "r";
pub const INDEX_PREFIX: &str = "i";

pub const TABLE_INFO_PREFIX: &str = "tableinfo";
pub const TABLE_COUNTERS_PREFIX: &str = "tableinfoids";
pub const TABLE_IDS_KEY: &str = "tableIds";

/// Joins segments with `separator`.
pub fn encode_key<S: AsRef<str>>(separator: &str, segments: &[S]) -> Vec<u8> {
    let mut key = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            key.extend_from_slice(separator.as_bytes());
        }
        key.extend_from_slice(segment.as_ref().as_bytes());
    }
    key
}

fn join(segments: &[&str]) -> Vec<u8> {
    encode_key(SEPARATOR, segments)
}

/// `t_r_<tableId>_<rowId>`
pub fn row_key(table_id: u64, row_id: u64) -> Vec<u8> {
    join(&[
        TABLE_PREFIX,
        ROW_PREFIX,
        &table_id.to_string(),
        &row_id.to_string(),
    ])
}

/// `t_r_<tableId>_`, the prefix shared by every row of a table.
pub fn row_prefix(table_id: u64) -> Vec<u8> {
    let mut key = join(&[TABLE_PREFIX, ROW_PREFIX, &table_id.to_string()]);
    key.extend_from_slice(SEPARATOR.as_bytes());
    key
}

/// `t_i_<tableId>_<columnIdx>_<value>`
pub fn unique_key(table_id: u64, column_index: usize, value: &str) -> Vec<u8> {
    join(&[
        TABLE_PREFIX,
        INDEX_PREFIX,
        &table_id.to_string(),
        &column_index.to_string(),
        value,
    ])
}

/// `t_i_<tableId>_<columnIdx>_<value>_<rowId>`
pub fn secondary_key(table_id: u64, column_index: usize, value: &str, row_id: u64) -> Vec<u8> {
    join(&[
        TABLE_PREFIX,
        INDEX_PREFIX,
        &table_id.to_string(),
        &column_index.to_string(),
        value,
        &row_id.to_string(),
    ])
}

/// `t_i_<tableId>_<columnIdx>_<value>_`, matching every secondary entry for
/// exactly `value`.
pub fn secondary_prefix(table_id: u64, column_index: usize, value: &str) -> Vec<u8> {
    let mut key = unique_key(table_id, column_index, value);
    key.extend_from_slice(SEPARATOR.as_bytes());
    key
}

/// `t_i_<tableId>_<columnIdx>_`, the prefix shared by one index.
pub fn index_prefix(table_id: u64, column_index: usize) -> Vec<u8> {
    let mut key = join(&[
        TABLE_PREFIX,
        INDEX_PREFIX,
        &table_id.to_string(),
        &column_index.to_string(),
    ]);
    key.extend_from_slice(SEPARATOR.as_bytes());
    key
}

pub fn table_info_key(table_name: &str) -> Vec<u8> {
    join(&[TABLE_INFO_PREFIX, table_name])
}

pub fn table_counters_key(table_name: &str) -> Vec<u8> {
    join(&[TABLE_COUNTERS_PREFIX, table_name])
}

pub fn table_ids_key() -> Vec<u8> {
    TABLE_IDS_KEY.as_bytes().to_vec()
}

/// Splits a key into its segments.
pub fn split_segments(key: &[u8]) -> Vec<&[u8]> {
    let sep = SEPARATOR.as_bytes()[0];
    key.split(|&c| c == sep).collect()
}

/// Parses the last segment of a key as a row id.
pub fn trailing_row_id(key: &[u8]) -> Option<u64> {
    let last = split_segments(key).pop()?;
    std::str::from_utf8(last).ok()?.parse().ok()
}

/// True when `bytes` contains the separator.
pub fn contains_separator(bytes: &[u8]) -> bool {
    let sep = SEPARATOR.as_bytes()[0];
    bytes.contains(&sep)
}
