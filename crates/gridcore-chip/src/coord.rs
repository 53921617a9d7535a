// SPDX-License-Identifier: AGPL-3.0-only

//! Core grid geometry.
//!
//! Every allocation and dispatch decision is addressed in logical core
//! coordinates. A [`CoreRangeSet`] never holds two ranges covering the same
//! coordinate: construction and [`CoreRangeSet::merge`] both rebuild the set
//! from its covered cells, coalescing overlapping and adjacent rectangles.

use std::collections::BTreeSet;
use std::fmt;

/// Logical coordinate of one core in the grid.
///
/// Ordered by `x`, then `y`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreCoord {
    /// Column.
    pub x: usize,
    /// Row.
    pub y: usize,
}

impl CoreCoord {
    /// Create a coordinate.
    #[must_use]
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for CoreCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(usize, usize)> for CoreCoord {
    fn from((x, y): (usize, usize)) -> Self {
        Self::new(x, y)
    }
}

/// Inclusive rectangle of cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreRange {
    /// Lowest corner (inclusive).
    pub start: CoreCoord,
    /// Highest corner (inclusive).
    pub end: CoreCoord,
}

impl CoreRange {
    /// Create a range from any two opposite corners.
    #[must_use]
    pub fn new(a: CoreCoord, b: CoreCoord) -> Self {
        Self {
            start: CoreCoord::new(a.x.min(b.x), a.y.min(b.y)),
            end: CoreCoord::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Range holding exactly one core.
    #[must_use]
    pub const fn single(core: CoreCoord) -> Self {
        Self { start: core, end: core }
    }

    /// True if `core` lies inside this rectangle.
    #[must_use]
    pub const fn contains(&self, core: CoreCoord) -> bool {
        core.x >= self.start.x && core.x <= self.end.x && core.y >= self.start.y && core.y <= self.end.y
    }

    /// True if the two rectangles share at least one core.
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        self.start.x <= other.end.x
            && other.start.x <= self.end.x
            && self.start.y <= other.end.y
            && other.start.y <= self.end.y
    }

    /// Columns covered.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.end.x - self.start.x + 1
    }

    /// Rows covered.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.end.y - self.start.y + 1
    }

    /// Number of cores covered.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.width() * self.height()
    }

    /// Cores in allocation order: `x` outer, `y` inner.
    pub fn cores(&self) -> impl Iterator<Item = CoreCoord> {
        let (start, end) = (self.start, self.end);
        (start.x..=end.x).flat_map(move |x| (start.y..=end.y).map(move |y| CoreCoord::new(x, y)))
    }
}

impl From<CoreCoord> for CoreRange {
    fn from(core: CoreCoord) -> Self {
        Self::single(core)
    }
}

impl fmt::Display for CoreRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", self.start, self.end)
    }
}

/// Set of disjoint core rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CoreRangeSet {
    ranges: Vec<CoreRange>,
}

impl CoreRangeSet {
    /// Build a set from possibly overlapping ranges.
    pub fn new(ranges: impl IntoIterator<Item = CoreRange>) -> Self {
        Self::coalesce(ranges.into_iter().flat_map(|r| r.cores()).collect())
    }

    /// Set with no cores.
    #[must_use]
    pub const fn empty() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Absorb `other`, coalescing overlapping and adjacent ranges.
    pub fn merge(&mut self, other: &Self) {
        let cells = self.cores().chain(other.cores()).collect();
        *self = Self::coalesce(cells);
    }

    /// Disjoint ranges, ordered by their lowest corner.
    #[must_use]
    pub fn ranges(&self) -> &[CoreRange] {
        &self.ranges
    }

    /// Every covered core, range by range.
    pub fn cores(&self) -> impl Iterator<Item = CoreCoord> + '_ {
        self.ranges.iter().flat_map(CoreRange::cores)
    }

    /// Total number of covered cores.
    #[must_use]
    pub fn num_cores(&self) -> usize {
        self.ranges.iter().map(CoreRange::size).sum()
    }

    /// True if no core is covered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// True if `core` is covered.
    #[must_use]
    pub fn contains(&self, core: CoreCoord) -> bool {
        self.ranges.iter().any(|r| r.contains(core))
    }

    /// True if any range shares a core with `range`.
    #[must_use]
    pub fn intersects(&self, range: &CoreRange) -> bool {
        self.ranges.iter().any(|r| r.intersects(range))
    }

    /// Smallest rectangle holding every covered core.
    #[must_use]
    pub fn bounding_box(&self) -> Option<CoreRange> {
        let first = self.ranges.first()?;
        Some(self.ranges.iter().fold(*first, |acc, r| {
            CoreRange::new(
                CoreCoord::new(acc.start.x.min(r.start.x), acc.start.y.min(r.start.y)),
                CoreCoord::new(acc.end.x.max(r.end.x), acc.end.y.max(r.end.y)),
            )
        }))
    }

    /// Greedy maximal-rectangle decomposition of a cell set.
    ///
    /// Takes the lowest remaining cell, grows a column along `y`, then widens
    /// along `x` while the whole column span is present.
    fn coalesce(mut cells: BTreeSet<CoreCoord>) -> Self {
        let mut ranges = Vec::new();
        while let Some(&start) = cells.iter().next() {
            let mut end_y = start.y;
            while cells.contains(&CoreCoord::new(start.x, end_y + 1)) {
                end_y += 1;
            }
            let mut end_x = start.x;
            while (start.y..=end_y).all(|y| cells.contains(&CoreCoord::new(end_x + 1, y))) {
                end_x += 1;
            }
            let range = CoreRange::new(start, CoreCoord::new(end_x, end_y));
            for core in range.cores() {
                cells.remove(&core);
            }
            ranges.push(range);
        }
        Self { ranges }
    }
}

impl From<CoreRange> for CoreRangeSet {
    fn from(range: CoreRange) -> Self {
        Self { ranges: vec![range] }
    }
}

impl From<CoreCoord> for CoreRangeSet {
    fn from(core: CoreCoord) -> Self {
        Self::from(CoreRange::single(core))
    }
}

impl FromIterator<CoreRange> for CoreRangeSet {
    fn from_iter<I: IntoIterator<Item = CoreRange>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for CoreRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{range}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(sx: usize, sy: usize, ex: usize, ey: usize) -> CoreRange {
        CoreRange::new(CoreCoord::new(sx, sy), CoreCoord::new(ex, ey))
    }

    #[test]
    fn range_normalises_corners() {
        let r = range(3, 2, 1, 0);
        assert_eq!(r.start, CoreCoord::new(1, 0));
        assert_eq!(r.end, CoreCoord::new(3, 2));
        assert_eq!(r.size(), 9);
    }

    #[test]
    fn range_cores_are_x_major() {
        let cores: Vec<_> = range(0, 0, 1, 1).cores().collect();
        assert_eq!(
            cores,
            vec![
                CoreCoord::new(0, 0),
                CoreCoord::new(0, 1),
                CoreCoord::new(1, 0),
                CoreCoord::new(1, 1)
            ]
        );
    }

    #[test]
    fn adjacent_ranges_coalesce() {
        let set = CoreRangeSet::new([range(0, 0, 1, 1), range(2, 0, 3, 1)]);
        assert_eq!(set.ranges(), &[range(0, 0, 3, 1)]);
    }

    #[test]
    fn overlapping_ranges_never_share_cores() {
        let set = CoreRangeSet::new([range(0, 0, 2, 2), range(1, 1, 3, 3)]);
        let mut seen = BTreeSet::new();
        for core in set.cores() {
            assert!(seen.insert(core), "core {core} covered twice");
        }
        assert_eq!(set.num_cores(), 9 + 9 - 4);
    }

    #[test]
    fn merge_keeps_disjoint_ranges_apart() {
        let mut set = CoreRangeSet::from(CoreCoord::new(0, 0));
        set.merge(&CoreRangeSet::from(CoreCoord::new(5, 5)));
        assert_eq!(set.ranges().len(), 2);
        assert!(set.contains(CoreCoord::new(5, 5)));
        assert!(!set.contains(CoreCoord::new(1, 1)));
        assert_eq!(set.bounding_box(), Some(range(0, 0, 5, 5)));
    }

    #[test]
    fn intersects_detects_shared_core() {
        let set = CoreRangeSet::from(range(0, 0, 1, 1));
        assert!(set.intersects(&range(1, 1, 4, 4)));
        assert!(!set.intersects(&range(2, 0, 4, 4)));
    }
}
