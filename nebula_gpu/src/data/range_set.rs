//! Free-range set over an integer index space
//!
//! A `RangeSet` keeps the free capacity of a fixed index space as a sorted
//! list of disjoint half-open ranges. Adjacent free ranges are always
//! coalesced, so the set is the canonical representation of its contents.
//! Descriptor heaps and query buffers reserve and release slot ranges
//! through this structure.

/// Half-open index range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Range {
    start: u32,
    end: u32,
}

impl Range {
    /// Empty range at index zero
    pub const EMPTY: Range = Range { start: 0, end: 0 };

    /// Create a range `[start, end)`
    ///
    /// `start` must not exceed `end`; a degenerate `start == end` range is empty.
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "range start {} exceeds end {}", start, end);
        Self { start, end }
    }

    /// Range covering `length` indices beginning at `start`
    pub fn with_length(start: u32, length: u32) -> Self {
        Self::new(start, start + length)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn length(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True when `other` lies fully inside this range
    pub fn contains(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True when the two ranges share at least one index
    pub fn overlaps(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when the two ranges touch without overlapping
    pub fn adjacent_to(&self, other: &Range) -> bool {
        self.end == other.start || other.end == self.start
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Set of disjoint, coalesced free ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    // Sorted by start; no two ranges overlap or touch.
    ranges: Vec<Range>,
}

impl RangeSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Create a set containing one initial range
    pub fn from_range(range: Range) -> Self {
        let mut set = Self::new();
        set.add(range);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of disjoint ranges in the set
    pub fn count(&self) -> usize {
        self.ranges.len()
    }

    /// Sum of all free-range lengths
    pub fn total_length(&self) -> u32 {
        self.ranges.iter().map(Range::length).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.ranges.iter()
    }

    /// Add a range back to the free set, merging with overlapping and
    /// adjacent neighbours so the set stays coalesced
    pub fn add(&mut self, range: Range) {
        if range.is_empty() {
            return;
        }

        // Absorb every overlapping or touching range into one merged span,
        // then insert it back at its sorted position
        let mut merged = range;
        self.ranges.retain(|existing| {
            if existing.overlaps(&merged) || existing.adjacent_to(&merged) {
                merged = Range::new(
                    merged.start.min(existing.start),
                    merged.end.max(existing.end),
                );
                false
            } else {
                true
            }
        });

        let insert_at = self
            .ranges
            .iter()
            .position(|r| r.start > merged.start)
            .unwrap_or(self.ranges.len());
        self.ranges.insert(insert_at, merged);
    }

    /// Remove a range from the free set, splitting enclosing ranges when
    /// the removed span lies strictly inside one
    pub fn remove(&mut self, range: Range) {
        if range.is_empty() {
            return;
        }

        let mut result = Vec::with_capacity(self.ranges.len() + 1);
        for existing in self.ranges.drain(..) {
            if !existing.overlaps(&range) {
                result.push(existing);
                continue;
            }
            if existing.start < range.start {
                result.push(Range::new(existing.start, range.start));
            }
            if range.end < existing.end {
                result.push(Range::new(range.end, existing.end));
            }
        }
        self.ranges = result;
    }

    /// Reserve the lowest-address run of exactly `length` indices
    ///
    /// Scans free ranges in address order and carves `[start, start + length)`
    /// out of the first one long enough. Returns `None` when no free range fits.
    pub fn reserve(&mut self, length: u32) -> Option<Range> {
        if length == 0 {
            return None;
        }
        let position = self.ranges.iter().position(|r| r.length() >= length)?;
        let found = self.ranges[position];
        let reserved = Range::with_length(found.start(), length);

        if found.length() == length {
            self.ranges.remove(position);
        } else {
            self.ranges[position] = Range::new(found.start() + length, found.end());
        }
        Some(reserved)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "range_set_tests.rs"]
mod tests;
