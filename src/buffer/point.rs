//! Buffer coordinates
//!
//! Zero-based `(row, column)` positions, half-open ranges over them, and the
//! `RangeWithText` spans reported by incremental diff queries. Columns count
//! Unicode scalar values since the start of the row.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Range;

/// A zero-based position in a text buffer.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize,
)]
pub struct Point {
    pub row: u32,
    pub column: u32,
}

impl Point {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    pub const ZERO: Point = Point { row: 0, column: 0 };

    /// Advance this point across `text`, returning the resulting position.
    pub fn advance(mut self, text: &str) -> Point {
        for ch in text.chars() {
            if ch == '\n' {
                self.row += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        self
    }
}

impl Ord for Point {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .cmp(&other.row)
            .then_with(|| self.column.cmp(&other.column))
    }
}

impl PartialOrd for Point {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A changed span, in the buffer's current coordinate space, carrying the
/// text now occupying that span. A pure deletion reports an empty range with
/// empty text.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RangeWithText {
    pub range: Range<Point>,
    pub text: String,
}
