//! Byte ranges of a file.
use std::fmt;

use speedy::{Readable, Writable};

/// A contiguous span of bytes, identified by its start offset and length.
///
/// Ranges are immutable values. The end is inclusive, a range of length 1
/// starting at 10 is `[10-10]`. A range of length 0 is empty and intersects
/// nothing.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Readable,
    Writable,
)]
pub struct Range {
    start: u64,
    length: u64,
}

impl Range {
    pub fn by_length(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// Build a range from two inclusive endpoints, in any order.
    ///
    /// `[0, u64::MAX]` holds one byte more than a `u64` can count, its
    /// length saturates at `u64::MAX`.
    pub fn by_endpoints(a: u64, b: u64) -> Self {
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        Self { start, length: (end - start).saturating_add(1) }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Offset of the last byte of the range.
    ///
    /// For an empty range this is the byte right before `start`, saturated
    /// at zero.
    pub fn end(&self) -> u64 {
        self.limit().saturating_sub(1)
    }

    /// Offset of the first byte after the range, saturated at `u64::MAX`.
    pub fn limit(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn intersects(&self, other: &Range) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start < other.limit()
            && other.start < self.limit()
    }

    /// If `self` fully spans `other`.
    pub fn contains(&self, other: &Range) -> bool {
        self.start <= other.start && other.limit() <= self.limit()
    }

    /// The overlapping part of both ranges, if any.
    pub fn intersection(&self, other: &Range) -> Option<Range> {
        if !self.intersects(other) {
            return None;
        }
        let start = self.start.max(other.start);
        let limit = self.limit().min(other.limit());
        Some(Range::by_length(start, limit - start))
    }

    /// Split the range in two halves, the first one gets the smaller half
    /// when the length is odd.
    pub(crate) fn halves(&self) -> (Range, Range) {
        let left = self.length / 2;
        (
            Range::by_length(self.start, left),
            Range::by_length(self.start + left, self.length - left),
        )
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.start, self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn by_endpoints_normalizes() {
        let a = Range::by_endpoints(10, 19);
        let b = Range::by_endpoints(19, 10);
        assert_eq!(a, b);
        assert_eq!(a.start(), 10);
        assert_eq!(a.length(), 10);
        assert_eq!(a.end(), 19);
        assert_eq!(a, Range::by_length(10, 10));

        let single = Range::by_endpoints(7, 7);
        assert_eq!(single.length(), 1);
        assert_eq!(single.end(), 7);
    }

    #[test]
    fn endpoints_at_the_limits() {
        let all = Range::by_endpoints(u64::MAX, 0);
        assert_eq!(all.start(), 0);
        assert_eq!(all.length(), u64::MAX);

        let last = Range::by_endpoints(u64::MAX, u64::MAX);
        assert_eq!(last.length(), 1);
        assert_eq!(last.limit(), u64::MAX);
    }

    #[test]
    fn intersects() {
        let a = Range::by_length(0, 10);
        assert!(a.intersects(&Range::by_length(9, 5)));
        assert!(a.intersects(&Range::by_length(2, 2)));
        assert!(!a.intersects(&Range::by_length(10, 5)));
        assert!(!Range::by_length(10, 5).intersects(&a));
        assert!(!a.intersects(&Range::by_length(5, 0)));
    }

    #[test]
    fn contains() {
        let a = Range::by_length(5, 10);
        assert!(a.contains(&a));
        assert!(a.contains(&Range::by_length(5, 1)));
        assert!(a.contains(&Range::by_length(14, 1)));
        assert!(!a.contains(&Range::by_length(14, 2)));
        assert!(!a.contains(&Range::by_length(4, 2)));
        assert!(!Range::by_length(6, 1).contains(&a));
    }

    #[test]
    fn intersection() {
        let a = Range::by_length(0, 10);
        let b = Range::by_length(5, 10);
        assert_eq!(a.intersection(&b), Some(Range::by_length(5, 5)));
        assert_eq!(b.intersection(&a), Some(Range::by_length(5, 5)));
        assert_eq!(a.intersection(&Range::by_length(10, 1)), None);
    }

    #[test]
    fn halves() {
        let (l, r) = Range::by_length(0, 7).halves();
        assert_eq!(l, Range::by_length(0, 3));
        assert_eq!(r, Range::by_length(3, 4));

        let (l, r) = Range::by_length(100, 2).halves();
        assert_eq!(l, Range::by_length(100, 1));
        assert_eq!(r, Range::by_length(101, 1));
    }

    #[test]
    fn display() {
        assert_eq!(Range::by_length(16, 16).to_string(), "[16-31]");
    }
}
