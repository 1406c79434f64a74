//! Text Buffer CRDT
//!
//! One file's text as a sequence CRDT. The buffer is an ordered list of
//! fragments, each a run of characters from a single insertion. Every splice
//! is anchored to the identity of the character to its left, never to an
//! index, so concurrent splices merge deterministically on every replica:
//! insertions racing for the same anchor are ordered by Lamport timestamp
//! (ties by replica id), and deletions tombstone fragments without removing
//! them, keeping later anchors resolvable.

pub mod point;

pub use point::{Point, RangeWithText};

use crate::error::Error;
use crate::time;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use tracing::trace;

/// Insertion id seeding every buffer's base text. Replica id 0 is reserved
/// for this purpose; real replicas are always positive.
const BASE_INSERTION: time::Local = time::Local::DEFAULT;

/// The identity of the character to the left of a splice.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Anchor {
    /// The splice begins at the start of the buffer.
    Start,
    /// The splice begins just after the character at `offset` within the
    /// insertion identified by `insertion`.
    After {
        insertion: time::Local,
        offset: usize,
    },
}

/// One atomic splice: remove the identified character runs, insert `text`
/// after `start`. Emitted locally, merged remotely.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Identity of this splice; doubles as the insertion id of `text` and as
    /// the deletion timestamp recorded on tombstoned runs.
    pub id: time::Local,
    pub start: Anchor,
    /// Character runs removed by this splice, as `(insertion, char range
    /// within that insertion)`.
    pub deleted: Vec<(time::Local, Range<usize>)>,
    pub text: String,
    pub lamport_timestamp: time::Lamport,
}

/// A run of characters from one insertion.
#[derive(Clone, Debug)]
struct Fragment {
    insertion: time::Local,
    /// Char offset of this run within its insertion.
    offset: usize,
    text: String,
    char_len: usize,
    lamport_timestamp: time::Lamport,
    /// Splice ids that deleted this run. Non-empty means tombstoned.
    deletions: BTreeSet<time::Local>,
}

impl Fragment {
    fn new(
        insertion: time::Local,
        offset: usize,
        text: String,
        lamport_timestamp: time::Lamport,
    ) -> Self {
        let char_len = text.chars().count();
        Self {
            insertion,
            offset,
            text,
            char_len,
            lamport_timestamp,
            deletions: BTreeSet::new(),
        }
    }

    fn is_visible(&self) -> bool {
        self.deletions.is_empty()
    }

    /// Split this fragment at `char_ix` (relative to the fragment),
    /// returning the right half.
    fn split_off(&mut self, char_ix: usize) -> Fragment {
        let byte_ix = byte_index(&self.text, char_ix);
        let right_text = self.text.split_off(byte_ix);
        let right = Fragment {
            insertion: self.insertion,
            offset: self.offset + char_ix,
            char_len: self.char_len - char_ix,
            text: right_text,
            lamport_timestamp: self.lamport_timestamp,
            deletions: self.deletions.clone(),
        };
        self.char_len = char_ix;
        right
    }
}

fn byte_index(text: &str, char_ix: usize) -> usize {
    text.char_indices()
        .nth(char_ix)
        .map(|(ix, _)| ix)
        .unwrap_or(text.len())
}

/// A replicated text buffer.
#[derive(Clone, Debug)]
pub struct Buffer {
    fragments: Vec<Fragment>,
    /// Lamport timestamp of every insertion this buffer knows about, used to
    /// decide whether a remote operation's anchors are resolvable yet.
    insertions: HashMap<time::Local, time::Lamport>,
    version: time::Global,
    deferred: Vec<Operation>,
    edit_count: usize,
}

impl Buffer {
    /// Seed a buffer from literal base text.
    pub fn new<T: Into<String>>(base_text: T) -> Self {
        let base_text = base_text.into();
        let mut fragments = Vec::new();
        if !base_text.is_empty() {
            fragments.push(Fragment::new(
                BASE_INSERTION,
                0,
                base_text,
                time::Lamport::default(),
            ));
        }
        let mut insertions = HashMap::new();
        insertions.insert(BASE_INSERTION, time::Lamport::default());
        Self {
            fragments,
            insertions,
            version: time::Global::new(),
            deferred: Vec::new(),
            edit_count: 0,
        }
    }

    /// Current materialized content.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for fragment in &self.fragments {
            if fragment.is_visible() {
                text.push_str(&fragment.text);
            }
        }
        text
    }

    /// Visible length in characters.
    pub fn len(&self) -> usize {
        self.fragments
            .iter()
            .filter(|f| f.is_visible())
            .map(|f| f.char_len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn version(&self) -> &time::Global {
        &self.version
    }

    /// True once any splice, local or remote, has been folded in.
    pub fn is_modified(&self) -> bool {
        self.edit_count > 0
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Replace each of `old_ranges` (char offsets in the current coordinate
    /// space, ascending and non-overlapping) with `new_text`, as one atomic
    /// multi-splice. Anchors are resolved against the pre-edit state, so the
    /// splices are logically simultaneous rather than sequentially
    /// re-indexed. Returns one operation per range.
    pub fn edit(
        &mut self,
        old_ranges: &[Range<usize>],
        new_text: &str,
        local_clock: &mut time::Local,
        lamport_clock: &mut time::Lamport,
    ) -> Result<Vec<Operation>, Error> {
        self.check_ranges(old_ranges)?;

        let mut ops = Vec::with_capacity(old_ranges.len());
        for range in old_ranges {
            let start = if range.start == 0 {
                Anchor::Start
            } else {
                self.anchor_before(range.start)?
            };
            let deleted = self.deleted_runs(range.clone());
            ops.push(Operation {
                id: local_clock.tick(),
                start,
                deleted,
                text: new_text.to_string(),
                lamport_timestamp: lamport_clock.tick(),
            });
        }

        for op in &ops {
            // Local anchors always resolve; integration cannot defer here.
            self.integrate(op.clone());
        }

        Ok(ops)
    }

    /// Like [`Buffer::edit`], with ranges given as `(row, column)` points.
    pub fn edit_2d(
        &mut self,
        old_ranges: &[Range<Point>],
        new_text: &str,
        local_clock: &mut time::Local,
        lamport_clock: &mut time::Lamport,
    ) -> Result<Vec<Operation>, Error> {
        let mut offset_ranges = Vec::with_capacity(old_ranges.len());
        for range in old_ranges {
            let start = self.offset_for_point(range.start)?;
            let end = self.offset_for_point(range.end)?;
            offset_ranges.push(start..end);
        }
        self.edit(&offset_ranges, new_text, local_clock, lamport_clock)
    }

    /// Merge a remote splice. Already-observed operations are no-ops;
    /// operations whose anchors are not resolvable yet are deferred until a
    /// later operation supplies the missing insertion.
    pub fn apply(&mut self, op: Operation) {
        if self.version.observed(op.id) {
            trace!(replica_id = op.id.replica_id, seq = op.id.seq, "skipping observed buffer op");
            return;
        }
        if self.can_integrate(&op) {
            self.integrate(op);
            self.flush_deferred();
        } else {
            self.deferred.push(op);
        }
    }

    /// Spans changed since `version`, coalesced, in the current coordinate
    /// space, each carrying the text now occupying the span.
    pub fn changes_since(&self, version: &time::Global) -> Vec<RangeWithText> {
        let mut changes: Vec<RangeWithText> = Vec::new();
        let mut position = Point::ZERO;
        let mut current: Option<RangeWithText> = None;

        for fragment in &self.fragments {
            if fragment.is_visible() {
                let end = position.advance(&fragment.text);
                if version.observed(fragment.insertion) {
                    // Unchanged visible text closes any open span.
                    if let Some(change) = current.take() {
                        changes.push(change);
                    }
                } else {
                    match current.as_mut() {
                        Some(change) => {
                            change.range.end = end;
                            change.text.push_str(&fragment.text);
                        }
                        None => {
                            current = Some(RangeWithText {
                                range: position..end,
                                text: fragment.text.clone(),
                            });
                        }
                    }
                }
                position = end;
            } else {
                // Tombstones the observer had seen as live text mark a
                // deletion at this position. Runs the observer never saw
                // are neutral and neither open nor close a span.
                let was_visible_to_observer = version.observed(fragment.insertion)
                    && fragment.deletions.iter().all(|d| !version.observed(*d));
                if was_visible_to_observer && current.is_none() {
                    current = Some(RangeWithText {
                        range: position..position,
                        text: String::new(),
                    });
                }
            }
        }

        if let Some(change) = current {
            changes.push(change);
        }
        changes
    }

    /// Convert a point to a char offset in the visible text.
    pub fn offset_for_point(&self, point: Point) -> Result<usize, Error> {
        let mut position = Point::ZERO;
        let mut offset = 0;
        if point == position {
            return Ok(0);
        }
        for fragment in &self.fragments {
            if !fragment.is_visible() {
                continue;
            }
            for ch in fragment.text.chars() {
                position = if ch == '\n' {
                    Point::new(position.row + 1, 0)
                } else {
                    Point::new(position.row, position.column + 1)
                };
                offset += 1;
                if position == point {
                    return Ok(offset);
                }
                if position > point {
                    return Err(Error::InvalidArgument(format!(
                        "point {:?} does not exist in buffer",
                        point
                    )));
                }
            }
        }
        Err(Error::InvalidArgument(format!(
            "point {:?} is beyond the end of the buffer",
            point
        )))
    }

    /// Convert a char offset in the visible text to a point.
    pub fn point_for_offset(&self, offset: usize) -> Result<Point, Error> {
        let mut position = Point::ZERO;
        let mut remaining = offset;
        for fragment in &self.fragments {
            if !fragment.is_visible() {
                continue;
            }
            if remaining >= fragment.char_len {
                remaining -= fragment.char_len;
                position = position.advance(&fragment.text);
            } else {
                for ch in fragment.text.chars() {
                    if remaining == 0 {
                        return Ok(position);
                    }
                    position = position.advance(&ch.to_string());
                    remaining -= 1;
                }
            }
        }
        if remaining == 0 {
            Ok(position)
        } else {
            Err(Error::InvalidArgument(format!(
                "offset {} is beyond the end of the buffer",
                offset
            )))
        }
    }

    fn check_ranges(&self, ranges: &[Range<usize>]) -> Result<(), Error> {
        let len = self.len();
        let mut last_end = 0;
        for (ix, range) in ranges.iter().enumerate() {
            if range.start > range.end || range.end > len {
                return Err(Error::InvalidArgument(format!(
                    "edit range {:?} is out of bounds (buffer length {})",
                    range, len
                )));
            }
            if ix > 0 && range.start < last_end {
                return Err(Error::InvalidArgument(
                    "edit ranges must be ascending and non-overlapping".to_string(),
                ));
            }
            last_end = range.end;
        }
        Ok(())
    }

    /// The identity of the visible character at `offset - 1`.
    fn anchor_before(&self, offset: usize) -> Result<Anchor, Error> {
        let mut position = 0;
        for fragment in &self.fragments {
            if !fragment.is_visible() {
                continue;
            }
            if offset - 1 < position + fragment.char_len {
                let intra = offset - 1 - position;
                return Ok(Anchor::After {
                    insertion: fragment.insertion,
                    offset: fragment.offset + intra,
                });
            }
            position += fragment.char_len;
        }
        Err(Error::InvalidArgument(format!(
            "offset {} is beyond the end of the buffer",
            offset
        )))
    }

    /// Character runs currently visible within `range`, keyed by insertion.
    fn deleted_runs(&self, range: Range<usize>) -> Vec<(time::Local, Range<usize>)> {
        let mut runs: Vec<(time::Local, Range<usize>)> = Vec::new();
        let mut position = 0;
        for fragment in &self.fragments {
            if !fragment.is_visible() {
                continue;
            }
            let fragment_range = position..position + fragment.char_len;
            let start = range.start.max(fragment_range.start);
            let end = range.end.min(fragment_range.end);
            if start < end {
                let intra_start = fragment.offset + (start - position);
                let intra_end = fragment.offset + (end - position);
                // Extend the previous run when it continues the same
                // insertion contiguously.
                if let Some((insertion, last)) = runs.last_mut() {
                    if *insertion == fragment.insertion && last.end == intra_start {
                        last.end = intra_end;
                        position = fragment_range.end;
                        continue;
                    }
                }
                runs.push((fragment.insertion, intra_start..intra_end));
            }
            position = fragment_range.end;
            if position >= range.end {
                break;
            }
        }
        runs
    }

    fn can_integrate(&self, op: &Operation) -> bool {
        let anchor_known = match op.start {
            Anchor::Start => true,
            Anchor::After { insertion, .. } => self.insertions.contains_key(&insertion),
        };
        anchor_known
            && op
                .deleted
                .iter()
                .all(|(insertion, _)| self.insertions.contains_key(insertion))
    }

    fn flush_deferred(&mut self) {
        loop {
            let mut progressed = false;
            let mut remaining = Vec::new();
            for op in std::mem::take(&mut self.deferred) {
                if self.can_integrate(&op) {
                    self.integrate(op);
                    progressed = true;
                } else {
                    remaining.push(op);
                }
            }
            self.deferred = remaining;
            if !progressed || self.deferred.is_empty() {
                break;
            }
        }
    }

    fn integrate(&mut self, op: Operation) {
        for (insertion, range) in &op.deleted {
            self.tombstone(op.id, *insertion, range.clone());
        }

        if !op.text.is_empty() {
            let mut ix = match op.start {
                Anchor::Start => 0,
                Anchor::After { insertion, offset } => self.index_after_char(insertion, offset),
            };
            // Concurrent insertions racing for the same anchor: later Lamport
            // timestamps sit closer to the anchor. Runs with a greater
            // timestamp than ours are skipped along with their descendants,
            // whose timestamps are greater still.
            while ix < self.fragments.len()
                && self.fragments[ix].lamport_timestamp > op.lamport_timestamp
            {
                ix += 1;
            }
            self.fragments.insert(
                ix,
                Fragment::new(op.id, 0, op.text.clone(), op.lamport_timestamp),
            );
        }

        self.insertions.insert(op.id, op.lamport_timestamp);
        self.version.observe(op.id);
        self.edit_count += 1;
    }

    /// Position just after the character `(insertion, offset)`, splitting
    /// the containing fragment so that character ends a fragment.
    fn index_after_char(&mut self, insertion: time::Local, offset: usize) -> usize {
        for ix in 0..self.fragments.len() {
            let fragment = &self.fragments[ix];
            if fragment.insertion == insertion
                && offset >= fragment.offset
                && offset < fragment.offset + fragment.char_len
            {
                let intra = offset - fragment.offset;
                if intra + 1 < fragment.char_len {
                    let right = self.fragments[ix].split_off(intra + 1);
                    self.fragments.insert(ix + 1, right);
                }
                return ix + 1;
            }
        }
        // Anchor insertion is known but the exact character is not present;
        // per-sender FIFO delivery makes this unreachable in practice.
        self.fragments.len()
    }

    /// Mark the chars of `insertion` within `range` as deleted by `deleted_by`.
    fn tombstone(&mut self, deleted_by: time::Local, insertion: time::Local, range: Range<usize>) {
        let mut ix = 0;
        while ix < self.fragments.len() {
            let fragment = &self.fragments[ix];
            if fragment.insertion == insertion {
                let fragment_range = fragment.offset..fragment.offset + fragment.char_len;
                let start = range.start.max(fragment_range.start);
                let end = range.end.min(fragment_range.end);
                if start < end {
                    if start > fragment_range.start {
                        let right = self.fragments[ix].split_off(start - fragment_range.start);
                        self.fragments.insert(ix + 1, right);
                        ix += 1;
                    }
                    let fragment_offset = self.fragments[ix].offset;
                    if end < fragment_offset + self.fragments[ix].char_len {
                        let right = self.fragments[ix].split_off(end - fragment_offset);
                        self.fragments.insert(ix + 1, right);
                    }
                    self.fragments[ix].deletions.insert(deleted_by);
                }
            }
            ix += 1;
        }
    }
}
