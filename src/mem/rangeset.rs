//! A fixed-size set of non-overlapping, half-open physical address ranges.
//!
//! Used while reading the memory map: every free region is inserted,
//! afterwards every region that must not be used is removed again.

use super::{Error, PhysAddr, Result};
use core::{cmp, fmt, slice};

/// The maximum number of disjoint ranges a [`RangeSet`] can hold.
pub const RANGE_COUNT: usize = 64;

/// A half-open range of physical addresses `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// The first address inside this range.
    pub start: PhysAddr,
    /// The first address behind this range.
    pub end: PhysAddr,
}

impl Range {
    /// Create a new `Range` that covers `start..end`.
    pub const fn new(start: PhysAddr, end: PhysAddr) -> Self {
        Self { start, end }
    }

    /// The number of bytes inside this range.
    pub fn len(&self) -> usize {
        self.end.0.saturating_sub(self.start.0)
    }

    /// Check if this range covers no address at all.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Check if two ranges share at least one address.
    fn overlaps(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Check if two ranges overlap or directly touch each other.
    fn touches(&self, other: &Range) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// A fixed-size set of disjoint [ranges](Range), kept sorted by start address.
#[derive(Clone)]
pub struct RangeSet {
    ranges: [Range; RANGE_COUNT],
    len: usize,
}

impl RangeSet {
    /// Create a new, empty set.
    pub const fn new() -> Self {
        Self {
            ranges: [Range::new(PhysAddr(0), PhysAddr(0)); RANGE_COUNT],
            len: 0,
        }
    }

    /// Insert a range into this set.
    ///
    /// Every range that overlaps or touches `range` is collapsed into a
    /// single range together with it.
    pub fn insert(&mut self, range: Range) -> Result<()> {
        if range.start > range.end {
            return Err(Error::InvalidRange);
        }
        if range.is_empty() {
            return Ok(());
        }

        let mut merged = range;
        let mut idx = 0;
        while idx < self.len {
            let other = self.ranges[idx];
            if other.touches(&merged) {
                merged.start = cmp::min(merged.start, other.start);
                merged.end = cmp::max(merged.end, other.end);
                self.remove_at(idx);
            } else {
                idx += 1;
            }
        }

        self.insert_sorted(merged)
    }

    /// Remove every address inside `range` from this set.
    ///
    /// Ranges that partially overlap are trimmed, and a range that fully
    /// contains `range` is split in two.
    pub fn remove(&mut self, range: Range) -> Result<()> {
        if range.start > range.end {
            return Err(Error::InvalidRange);
        }

        let mut idx = 0;
        while idx < self.len {
            let other = self.ranges[idx];
            if !other.overlaps(&range) {
                idx += 1;
                continue;
            }

            // [=====`other`=====]
            //      [=`range`=]
            //
            // results in
            //
            // [head]           [tail]
            let head = Range::new(other.start, range.start);
            let tail = Range::new(range.end, other.end);

            match (head.start < head.end, tail.start < tail.end) {
                (true, true) => {
                    self.ranges[idx] = head;
                    self.insert_sorted(tail)?;
                    idx += 2;
                }
                (true, false) => {
                    self.ranges[idx] = head;
                    idx += 1;
                }
                (false, true) => {
                    self.ranges[idx] = tail;
                    idx += 1;
                }
                (false, false) => self.remove_at(idx),
            }
        }

        Ok(())
    }

    fn remove_at(&mut self, idx: usize) {
        self.ranges[idx..self.len].rotate_left(1);
        self.len -= 1;
    }

    fn insert_sorted(&mut self, range: Range) -> Result<()> {
        if self.len == RANGE_COUNT {
            return Err(Error::TooManyRanges);
        }

        let idx = self
            .as_slice()
            .iter()
            .position(|other| other.start > range.start)
            .unwrap_or(self.len);

        self.ranges[idx..=self.len].rotate_right(1);
        self.ranges[idx] = range;
        self.len += 1;
        Ok(())
    }

    /// Return a slice that contains all ranges, sorted by start address.
    #[inline]
    pub fn as_slice(&self) -> &[Range] {
        &self.ranges[..self.len]
    }

    /// Return an iterator over all ranges of this set.
    pub fn iter(&self) -> slice::Iter<'_, Range> {
        self.as_slice().iter()
    }

    /// Return the number of ranges inside this set.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if this set is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove all ranges from this set.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for RangeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
