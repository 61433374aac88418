//! Key ordering used by every backend.
//!
//! Keys are compared segment by segment so that decimal ids sort numerically:
//!
//! ```text
//! byte-wise:      t_r_1_1 < t_r_1_10 < t_r_1_2
//! numeric-aware:  t_r_1_1 < t_r_1_2  < t_r_1_10
//! ```
//!
//! The comparator is chosen when a store is created and must never change for
//! that store, otherwise previously written keys are no longer in order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::SEPARATOR;

/// Total order over encoded keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyComparator {
    /// Segment-wise order; decimal segments compare as numbers.
    #[default]
    NumericAware,
    /// Plain lexicographic byte order.
    Bytewise,
}

impl KeyComparator {
    /// Stable name persisted alongside durable stores.
    pub fn name(&self) -> &'static str {
        match self {
            KeyComparator::NumericAware => "kvtable.NumericAwareComparator",
            KeyComparator::Bytewise => "kvtable.BytewiseComparator",
        }
    }

    /// Resolves a persisted comparator name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "kvtable.NumericAwareComparator" => Some(KeyComparator::NumericAware),
            "kvtable.BytewiseComparator" => Some(KeyComparator::Bytewise),
            _ => None,
        }
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyComparator::NumericAware => compare_numeric_aware(a, b),
            KeyComparator::Bytewise => a.cmp(b),
        }
    }
}

/// Numeric-aware comparison of two encoded keys.
///
/// Keys compare segment by segment; the first differing segment decides and
/// a key that runs out of segments first is smaller. Within one position,
/// empty segments sort first, then decimal integers in numeric order, then
/// every other segment in byte order. Decimals spelled differently (`007` and
/// `7`) fall back to byte order so that distinct keys never compare equal.
///
/// Ranking the segment classes keeps the order transitive when decimal and
/// non-decimal values share a position (`9 < 10 < 1a`).
pub fn compare_numeric_aware(a: &[u8], b: &[u8]) -> Ordering {
    let sep = SEPARATOR.as_bytes()[0];
    let mut left = a.split(|&c| c == sep);
    let mut right = b.split(|&c| c == sep);

    loop {
        let ord = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => compare_segment(l, r),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SegmentClass {
    Empty,
    Decimal,
    Text,
}

fn segment_class(segment: &[u8]) -> SegmentClass {
    if segment.is_empty() {
        SegmentClass::Empty
    } else if is_decimal(segment) {
        SegmentClass::Decimal
    } else {
        SegmentClass::Text
    }
}

fn compare_segment(l: &[u8], r: &[u8]) -> Ordering {
    let class = segment_class(l);
    class.cmp(&segment_class(r)).then_with(|| match class {
        SegmentClass::Decimal => compare_decimal(l, r).then_with(|| l.cmp(r)),
        _ => l.cmp(r),
    })
}

/// True when `segment` is a non-empty run of ASCII digits.
pub fn is_decimal(segment: &[u8]) -> bool {
    !segment.is_empty() && segment.iter().all(u8::is_ascii_digit)
}
// Arbitrary-width decimal compare: strip leading zeros, then longer is larger.
fn compare_decimal(a: &[u8], b: &[u8]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(digits: &[u8]) -> &[u8] {
    let first = digits.iter().position(|&d| d != b'0').unwrap_or(digits.len());
    &digits[first..]
}
