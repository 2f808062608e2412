//! Half-open time intervals shared by guide programs and subtitle cues

/// A record occupying `[start, end)` on some time axis.
pub trait Interval {
    type Point: PartialOrd + Copy;

    fn start(&self) -> Self::Point;
    fn end(&self) -> Self::Point;

    /// Start-inclusive, end-exclusive containment
    #[inline]
    fn contains(&self, t: Self::Point) -> bool {
        self.start() <= t && t < self.end()
    }

    /// True if the record intersects `[start, end)`
    #[inline]
    fn overlaps(&self, start: Self::Point, end: Self::Point) -> bool {
        self.start() < end && self.end() > start
    }
}

/// Records with `start >= end` (or unordered points such as NaN) are never stored.
#[inline]
pub fn is_valid_span<T: PartialOrd>(start: &T, end: &T) -> bool {
    start < end
}

/// First record containing `t`, scanning in slice order.
#[inline]
pub fn first_containing<I: Interval>(items: &[I], t: I::Point) -> Option<&I> {
    items.iter().find(|item| item.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Span(i64, i64);

    impl Interval for Span {
        type Point = i64;
        fn start(&self) -> i64 {
            self.0
        }
        fn end(&self) -> i64 {
            self.1
        }
    }

    #[test]
    fn test_half_open_bounds() {
        let s = Span(10, 20);
        assert!(s.contains(10));
        assert!(s.contains(19));
        assert!(!s.contains(20));
        assert!(!s.contains(9));
    }

    #[test]
    fn test_overlaps() {
        let s = Span(10, 20);
        assert!(s.overlaps(0, 11));
        assert!(s.overlaps(19, 30));
        assert!(!s.overlaps(20, 30));
        assert!(!s.overlaps(0, 10));
    }

    #[test]
    fn test_first_containing_prefers_earliest() {
        let items = [Span(0, 5), Span(10, 30), Span(15, 20)];
        assert_eq!(first_containing(&items, 16).map(|s| s.0), Some(10));
        assert!(first_containing(&items, 7).is_none());
    }

    #[test]
    fn test_valid_span() {
        assert!(is_valid_span(&1.0, &2.0));
        assert!(!is_valid_span(&2.0, &2.0));
        assert!(!is_valid_span(&f64::NAN, &2.0));
    }
}
