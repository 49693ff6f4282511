//! Disjoint index-range selection algebra.
//!
//! A [`SelectionInfo`] is an immutable, ordered set of inclusive index ranges.
//! Stored ranges never overlap and never touch: adding a range that overlaps or
//! is adjacent to existing ranges merges them into one.

use std::fmt;
use std::sync::{Arc, LazyLock};

/// One past the largest index.
const INDEX_LIMIT: u64 = u32::MAX as u64 + 1;

/// A contiguous run of selected indices, `length` items starting at `first_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectionIndexRange {
    pub first_index: u32,
    pub length: u32,
}

impl SelectionIndexRange {
    /// Create a range covering `length` indices starting at `first_index`.
    ///
    /// The length is cut so the range ends at `u32::MAX` at the latest.
    #[inline]
    pub const fn new(first_index: u32, length: u32) -> Self {
        let room = INDEX_LIMIT - first_index as u64;
        let length = if (length as u64) > room { room as u32 } else { length };
        Self {
            first_index,
            length,
        }
    }

    /// Create a range covering exactly one index.
    #[inline]
    pub const fn single(index: u32) -> Self {
        Self::new(index, 1)
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The last index of the range (inclusive), or `None` for a zero-length range.
    #[inline]
    pub fn last_index(&self) -> Option<u32> {
        if self.is_empty() {
            None
        } else {
            Some((self.end() - 1) as u32)
        }
    }

    #[inline]
    pub fn contains(&self, index: u32) -> bool {
        index >= self.first_index && (index as u64) < self.end()
    }

    /// Exclusive end, widened so `first_index + length` never overflows.
    ///
    /// Fields set directly may describe a range past `u32::MAX`; it is cut here.
    #[inline]
    fn end(&self) -> u64 {
        (self.first_index as u64 + self.length as u64).min(INDEX_LIMIT)
    }

    /// A range spanning the whole index space cannot be stored; it loses
    /// its last index.
    fn from_bounds(start: u64, end: u64) -> Self {
        Self {
            first_index: start as u32,
            length: u32::try_from(end - start).unwrap_or(u32::MAX),
        }
    }
}

impl fmt::Display for SelectionIndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_index() {
            Some(last) => write!(f, "[{},{}]", self.first_index, last),
            None => write!(f, "[{},-]", self.first_index),
        }
    }
}

static EMPTY: LazyLock<SelectionInfo> = LazyLock::new(|| SelectionInfo(Arc::new(Vec::new())));

/// An immutable set of selected indices stored as sorted, disjoint, non-adjacent ranges.
///
/// Every operation returns a new `SelectionInfo`; the receiver is never modified.
/// Cloning is cheap (shared backing storage).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SelectionInfo(Arc<Vec<SelectionIndexRange>>);

impl SelectionInfo {
    /// The canonical empty selection.
    pub fn empty() -> Self {
        EMPTY.clone()
    }

    /// A selection containing only `index`.
    pub fn single(index: u32) -> Self {
        Self(Arc::new(vec![SelectionIndexRange::single(index)]))
    }

    /// A selection covering `range`.
    pub fn from_range(range: SelectionIndexRange) -> Self {
        Self::empty().add(range)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The stored ranges, sorted by `first_index`.
    pub fn ranges(&self) -> &[SelectionIndexRange] {
        &self.0
    }

    /// Total number of selected indices.
    pub fn count(&self) -> u64 {
        self.0.iter().map(|r| r.end() - r.first_index as u64).sum()
    }

    /// Iterate every selected index in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.0
            .iter()
            .flat_map(|r| (r.first_index as u64..r.end()).map(|i| i as u32))
    }

    /// Union `range` into the selection.
    ///
    /// Ranges that overlap or touch `range` are merged with it. A zero-length
    /// range never creates an entry.
    pub fn add(&self, range: SelectionIndexRange) -> Self {
        if range.is_empty() {
            return self.clone();
        }

        let mut start = range.first_index as u64;
        let mut end = range.end();
        let mut result = Vec::with_capacity(self.0.len() + 1);
        let mut inserted = false;

        for existing in self.0.iter() {
            let (e_start, e_end) = (existing.first_index as u64, existing.end());
            if e_end < start {
                result.push(*existing);
            } else if e_start > end {
                if !inserted {
                    result.push(SelectionIndexRange::from_bounds(start, end));
                    inserted = true;
                }
                result.push(*existing);
            } else {
                // Overlapping or adjacent: absorb.
                start = start.min(e_start);
                end = end.max(e_end);
            }
        }
        if !inserted {
            result.push(SelectionIndexRange::from_bounds(start, end));
        }

        Self(Arc::new(result))
    }

    /// Subtract `range` from the selection.
    ///
    /// A stored range strictly containing `range` is split in two, one touching an
    /// edge of `range` is shrunk, and one fully covered is dropped.
    pub fn remove(&self, range: SelectionIndexRange) -> Self {
        if range.is_empty() || self.is_empty() {
            return self.clone();
        }

        let start = range.first_index as u64;
        let end = range.end();
        let mut result = Vec::with_capacity(self.0.len() + 1);
        let mut changed = false;

        for existing in self.0.iter() {
            let (e_start, e_end) = (existing.first_index as u64, existing.end());
            if e_end <= start || e_start >= end {
                result.push(*existing);
                continue;
            }
            changed = true;
            if e_start < start {
                result.push(SelectionIndexRange::from_bounds(e_start, start));
            }
            if e_end > end {
                result.push(SelectionIndexRange::from_bounds(end, e_end));
            }
        }

        if !changed {
            self.clone()
        } else if result.is_empty() {
            Self::empty()
        } else {
            Self(Arc::new(result))
        }
    }

    /// Whether `index` is selected.
    pub fn contains(&self, index: u32) -> bool {
        let pos = self.0.partition_point(|r| r.end() <= index as u64);
        self.0.get(pos).is_some_and(|r| r.contains(index))
    }

    /// Union of two selections.
    pub fn union(&self, other: &SelectionInfo) -> Self {
        if self.is_empty() {
            return other.clone();
        }
        other.0.iter().fold(self.clone(), |acc, r| acc.add(*r))
    }
}

impl Default for SelectionInfo {
    fn default() -> Self {
        Self::empty()
    }
}

impl FromIterator<SelectionIndexRange> for SelectionInfo {
    fn from_iter<I: IntoIterator<Item = SelectionIndexRange>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |acc, r| acc.add(r))
    }
}

impl fmt::Display for SelectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Empty");
        }
        for (i, range) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " & ")?;
            }
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SelectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SelectionInfo({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(first: u32, length: u32) -> SelectionIndexRange {
        SelectionIndexRange::new(first, length)
    }

    // ========================================================================
    // Add
    // ========================================================================

    #[test]
    fn test_add_zero_length_to_empty() {
        let result = SelectionInfo::empty().add(range(42, 0));
        assert_eq!(result.to_string(), "Empty");
        assert!(result.is_empty());
    }

    #[test]
    fn test_add_overlapping_single() {
        let result = SelectionInfo::single(42).add(range(41, 2));
        assert_eq!(result.to_string(), "[41,42]");
    }

    #[test]
    fn test_add_adjacent_merges() {
        let covering = SelectionInfo::from_range(range(42, 3));
        assert_eq!(covering.to_string(), "[42,44]");

        let result = covering.add(range(45, 1));
        assert_eq!(result.to_string(), "[42,45]");
        assert_eq!(result.ranges().len(), 1);
    }

    #[test]
    fn test_add_zero_length_next_to_existing() {
        let covering = SelectionInfo::from_range(range(42, 3));
        assert_eq!(covering.add(range(45, 0)), covering);
        assert_eq!(covering.add(range(10, 0)), covering);
    }

    #[test]
    fn test_add_disjoint_keeps_order() {
        let result = SelectionInfo::single(10)
            .add(range(1, 2))
            .add(range(20, 1));
        assert_eq!(result.to_string(), "[1,2] & [10,10] & [20,20]");
    }

    #[test]
    fn test_add_bridges_multiple_ranges() {
        let result = SelectionInfo::single(1)
            .add(range(5, 1))
            .add(range(9, 1))
            .add(range(2, 7));
        assert_eq!(result.to_string(), "[1,9]");
    }

    // ========================================================================
    // Remove
    // ========================================================================

    #[test]
    fn test_remove_covering_range() {
        let result = SelectionInfo::single(42).remove(range(41, 2));
        assert_eq!(result.to_string(), "Empty");
    }

    #[test]
    fn test_remove_interior_splits() {
        let covering = SelectionInfo::from_range(range(42, 3));
        let result = covering.remove(range(43, 1));
        assert_eq!(result.to_string(), "[42,42] & [44,44]");
    }

    #[test]
    fn test_remove_edge_shrinks() {
        let covering = SelectionInfo::from_range(range(42, 3));
        assert_eq!(covering.remove(range(42, 1)).to_string(), "[43,44]");
        assert_eq!(covering.remove(range(44, 5)).to_string(), "[42,43]");
    }

    #[test]
    fn test_remove_from_empty_is_noop() {
        let result = SelectionInfo::empty().remove(range(0, 100));
        assert!(result.is_empty());
    }

    #[test]
    fn test_remove_spanning_several() {
        let selection: SelectionInfo = [range(0, 2), range(4, 2), range(8, 2)]
            .into_iter()
            .collect();
        let result = selection.remove(range(1, 8));
        assert_eq!(result.to_string(), "[0,0] & [9,9]");
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[test]
    fn test_contains() {
        let selection: SelectionInfo = [range(2, 3), range(10, 1)].into_iter().collect();
        assert!(!selection.contains(1));
        assert!(selection.contains(2));
        assert!(selection.contains(4));
        assert!(!selection.contains(5));
        assert!(selection.contains(10));
        assert!(!selection.contains(11));
        assert!(!SelectionInfo::empty().contains(0));
    }

    #[test]
    fn test_union_and_count() {
        let a: SelectionInfo = [range(0, 3)].into_iter().collect();
        let b: SelectionInfo = [range(3, 2), range(7, 1)].into_iter().collect();
        let union = a.union(&b);
        assert_eq!(union.to_string(), "[0,4] & [7,7]");
        assert_eq!(union.count(), 6);
        assert_eq!(union.indices().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 7]);
    }

    #[test]
    fn test_upper_bound_does_not_overflow() {
        let selection = SelectionInfo::single(u32::MAX).add(range(u32::MAX - 1, 1));
        assert_eq!(selection.ranges(), &[range(u32::MAX - 1, 2)]);
        assert!(selection.contains(u32::MAX));
    }

    #[test]
    fn test_range_past_upper_bound_is_cut() {
        assert_eq!(range(u32::MAX, 2), range(u32::MAX, 1));
        assert_eq!(range(u32::MAX - 2, u32::MAX).last_index(), Some(u32::MAX));

        let selection = SelectionInfo::empty().add(range(u32::MAX, 2));
        assert_eq!(selection.indices().collect::<Vec<_>>(), vec![u32::MAX]);
        assert!(!selection.contains(0));
        assert_eq!(selection.count(), 1);
        assert_eq!(selection.to_string(), format!("[{0},{0}]", u32::MAX));
    }

    #[test]
    fn test_raw_range_past_upper_bound() {
        let raw = SelectionIndexRange {
            first_index: u32::MAX - 1,
            length: 5,
        };
        assert_eq!(raw.last_index(), Some(u32::MAX));
        assert!(!raw.contains(0));

        let selection = SelectionInfo::single(3).add(raw);
        assert_eq!(selection.indices().collect::<Vec<_>>(), vec![3, u32::MAX - 1, u32::MAX]);
        assert_eq!(selection.remove(raw), SelectionInfo::single(3));
        assert_eq!(selection.to_string(), format!("[3,3] & [{},{}]", u32::MAX - 1, u32::MAX));
    }
}
