//! Lifetime intervals
//!
//! An interval is a sorted list of disjoint half-open ranges over
//! instruction positions plus the positions where the value is used.
//! Register reservations are intervals without a value.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::compiler::lir::{Location, SpillSlot, VReg};

/// Half-open position range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct LiveRange {
    /// First covered position
    pub from: usize,
    /// One past the last covered position
    pub to: usize,
}

impl LiveRange {
    /// True if `position` is inside the range.
    #[inline]
    pub fn contains(&self, position: usize) -> bool {
        self.from <= position && position < self.to
    }
}

/// Where a value is live, and where it was put.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifetimeInterval {
    /// Value this interval belongs to; `None` for register reservations
    pub value: Option<VReg>,
    /// Sorted, disjoint ranges
    pub ranges: Vec<LiveRange>,
    /// Positions reading or defining the value
    pub usages: BTreeSet<usize>,
    /// Assigned allocatable register
    pub register: Option<u8>,
    /// True for every piece but the first of a split value
    pub is_split: bool,
    /// Spill slot, when the piece lives in memory
    pub spill_slot: Option<SpillSlot>,
}

impl LifetimeInterval {
    /// Empty interval for `value`.
    pub fn new(value: VReg) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// Empty reservation of `register`.
    pub fn reservation(register: u8) -> Self {
        Self {
            register: Some(register),
            ..Self::default()
        }
    }

    /// True for register reservations.
    pub fn is_fixed(&self) -> bool {
        self.value.is_none()
    }

    /// True if the interval covers nothing.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// First covered position.
    pub fn start(&self) -> usize {
        self.ranges.first().map_or(usize::MAX, |range| range.from)
    }

    /// One past the last covered position.
    pub fn end(&self) -> usize {
        self.ranges.last().map_or(0, |range| range.to)
    }

    /// True if the piece lives in a spill slot.
    pub fn is_spill(&self) -> bool {
        self.spill_slot.is_some()
    }

    /// Where the piece lives, once allocated.
    pub fn location(&self) -> Option<Location> {
        match (self.register, self.spill_slot) {
            (Some(register), _) => Some(Location::Register(register)),
            (None, Some(slot)) => Some(Location::Spill(slot)),
            (None, None) => None,
        }
    }

    /// Add `[from, to)`, merging with overlapping or touching ranges.
    pub fn add_range(&mut self, from: usize, to: usize) {
        if from >= to {
            return;
        }
        let mut merged = LiveRange { from, to };
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for range in self.ranges.drain(..) {
            if range.to < merged.from || merged.to < range.from {
                kept.push(range);
            } else {
                merged.from = merged.from.min(range.from);
                merged.to = merged.to.max(range.to);
            }
        }
        let index = kept.partition_point(|range| range.from < merged.from);
        kept.insert(index, merged);
        self.ranges = kept;
    }

    /// Start the interval at its definition. A value nothing reads still
    /// occupies its defining position.
    pub fn set_from(&mut self, from: usize) {
        match self.ranges.first_mut() {
            Some(first) if first.from <= from && from < first.to => first.from = from,
            Some(first) if from < first.from => self.add_range(from, from + 1),
            Some(_) => {
                // Definition after the first range cannot happen in SSA;
                // keep the ranges that follow it.
                self.ranges.retain(|range| range.to > from);
                if let Some(first) = self.ranges.first_mut() {
                    first.from = first.from.max(from);
                }
            }
            None => self.ranges.push(LiveRange { from, to: from + 1 }),
        }
    }

    /// Record a use or definition at `position`.
    pub fn add_usage(&mut self, position: usize) {
        self.usages.insert(position);
    }

    /// True if `position` is inside a range.
    pub fn covers(&self, position: usize) -> bool {
        let index = self.ranges.partition_point(|range| range.to <= position);
        self.ranges.get(index).is_some_and(|range| range.contains(position))
    }

    /// First position covered by both intervals.
    pub fn intersection(&self, other: &LifetimeInterval) -> Option<usize> {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let a = self.ranges[i];
            let b = other.ranges[j];
            let from = a.from.max(b.from);
            if from < a.to.min(b.to) {
                return Some(from);
            }
            if a.to <= b.to {
                i += 1;
            } else {
                j += 1;
            }
        }
        None
    }

    /// First usage.
    pub fn first_usage(&self) -> Option<usize> {
        self.usages.first().copied()
    }

    /// First usage at or after `position`.
    pub fn next_usage_from(&self, position: usize) -> Option<usize> {
        self.usages.range(position..).next().copied()
    }

    /// Cut the interval at `position`, keeping `[start, position)` and
    /// returning the rest. Usages at or after `position` move to the tail.
    pub fn split_at(&mut self, position: usize) -> LifetimeInterval {
        let mut tail_ranges = Vec::new();
        let mut head_ranges = Vec::new();
        for range in self.ranges.drain(..) {
            if range.to <= position {
                head_ranges.push(range);
            } else if range.from >= position {
                tail_ranges.push(range);
            } else {
                head_ranges.push(LiveRange {
                    from: range.from,
                    to: position,
                });
                tail_ranges.push(LiveRange {
                    from: position,
                    to: range.to,
                });
            }
        }
        self.ranges = head_ranges;
        let tail_usages = self.usages.split_off(&position);
        LifetimeInterval {
            value: self.value,
            ranges: tail_ranges,
            usages: tail_usages,
            register: None,
            is_split: true,
            spill_slot: None,
        }
    }
}

impl fmt::Display for LifetimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "{}", value)?,
            None => write!(f, "fixed")?,
        }
        for range in &self.ranges {
            write!(f, " [{}, {})", range.from, range.to)?;
        }
        if let Some(location) = self.location() {
            write!(f, " -> {}", location)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(ranges: &[(usize, usize)]) -> LifetimeInterval {
        let mut interval = LifetimeInterval::new(VReg(0));
        for (from, to) in ranges {
            interval.add_range(*from, *to);
        }
        interval
    }

    #[test]
    fn test_add_range_merges() {
        let interval = interval(&[(10, 12), (2, 4), (4, 6), (11, 15)]);
        assert_eq!(interval.ranges, vec![LiveRange { from: 2, to: 6 }, LiveRange { from: 10, to: 15 }]);
        assert_eq!(interval.start(), 2);
        assert_eq!(interval.end(), 15);
    }

    #[test]
    fn test_set_from_truncates_first_range() {
        let mut interval = interval(&[(0, 8)]);
        interval.set_from(3);
        assert_eq!(interval.ranges, vec![LiveRange { from: 3, to: 8 }]);

        let mut unused = LifetimeInterval::new(VReg(1));
        unused.set_from(5);
        assert_eq!(unused.ranges, vec![LiveRange { from: 5, to: 6 }]);
    }

    #[test]
    fn test_covers_and_intersection() {
        let a = interval(&[(0, 4), (8, 12)]);
        let b = interval(&[(4, 9)]);
        assert!(a.covers(3));
        assert!(!a.covers(4));
        assert!(a.covers(8));
        assert_eq!(a.intersection(&b), Some(8));
        assert_eq!(a.intersection(&interval(&[(4, 8)])), None);
    }

    #[test]
    fn test_split_moves_tail_usages() {
        let mut head = interval(&[(0, 10)]);
        head.add_usage(1);
        head.add_usage(7);
        let tail = head.split_at(5);
        assert_eq!(head.ranges, vec![LiveRange { from: 0, to: 5 }]);
        assert_eq!(tail.ranges, vec![LiveRange { from: 5, to: 10 }]);
        assert_eq!(head.usages.iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(tail.first_usage(), Some(7));
        assert!(tail.is_split);
    }

    #[test]
    fn test_split_in_hole() {
        let mut head = interval(&[(0, 3), (6, 9)]);
        let tail = head.split_at(4);
        assert_eq!(head.end(), 3);
        assert_eq!(tail.start(), 6);
    }
}
