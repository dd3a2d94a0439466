//! Intervals over the 64-bit hash space.
//!
//! A `HashRange` is the identity of a tree leaf and of the fragment file that
//! persists it. Ranges only ever come from repeatedly halving the universal
//! range, so every range that exists is reachable by a fixed sequence of
//! `split()` calls.

use std::fmt;
use std::str::FromStr;

/// Length of the canonical string form: two 16-digit hex numbers and `_`.
const CANONICAL_LEN: usize = 33;

/// An inclusive interval `[start, end]` of hash values.
///
/// # Invariants
///
/// - `start <= end`
/// - `width() == end - start`; a range of width 0 covers exactly one hash
///   value and cannot be split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashRange {
    start: u64,
    end: u64,
}

impl HashRange {
    /// The whole hash space, `[0, 2^64 - 1]`.
    pub const UNIVERSAL: Self = Self {
        start: 0,
        end: u64::MAX,
    };

    /// Create a range, rejecting `start > end`.
    pub const fn new(start: u64, end: u64) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// First hash value covered.
    #[must_use]
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// Last hash value covered.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.end
    }

    /// `end - start`. Not an inclusive count.
    #[must_use]
    pub const fn width(&self) -> u64 {
        self.end - self.start
    }

    /// Split at `start + width / 2` into `[start, mid]` and `[mid + 1, end]`.
    ///
    /// Returns `None` for a range of width 0.
    #[must_use]
    pub const fn split(&self) -> Option<(Self, Self)> {
        if self.width() == 0 {
            return None;
        }
        let mid = self.start + self.width() / 2;
        Some((
            Self {
                start: self.start,
                end: mid,
            },
            Self {
                start: mid + 1,
                end: self.end,
            },
        ))
    }

    /// Whether `hash` falls inside this range.
    #[must_use]
    pub const fn contains(&self, hash: u64) -> bool {
        self.start <= hash && hash <= self.end
    }

    /// Whether `other` lies entirely inside this range.
    #[must_use]
    pub const fn contains_range(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether this range lies entirely inside `other`.
    #[must_use]
    pub const fn is_contained_in(&self, other: &Self) -> bool {
        other.contains_range(self)
    }

    /// Whether this range ends immediately before `other` begins.
    #[must_use]
    pub const fn is_left_neighbor_of(&self, other: &Self) -> bool {
        match self.end.checked_add(1) {
            Some(next) => next == other.start,
            None => false,
        }
    }

    /// Whether this range begins immediately after `other` ends.
    #[must_use]
    pub const fn is_right_neighbor_of(&self, other: &Self) -> bool {
        other.is_left_neighbor_of(self)
    }
}

impl fmt::Display for HashRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}_{:016x}", self.start, self.end)
    }
}

impl FromStr for HashRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CANONICAL_LEN {
            return Err(RangeError::Malformed(s.to_owned()));
        }
        let (start, end) = s
            .split_once('_')
            .ok_or_else(|| RangeError::Malformed(s.to_owned()))?;
        let start = parse_hex_u64(start).ok_or_else(|| RangeError::Malformed(s.to_owned()))?;
        let end = parse_hex_u64(end).ok_or_else(|| RangeError::Malformed(s.to_owned()))?;
        Self::new(start, end)
    }
}

/// Parse exactly 16 hex digits.
fn parse_hex_u64(digits: &str) -> Option<u64> {
    if digits.len() != 16 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Errors produced when building or parsing a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// The string is not two 16-digit hex numbers joined by `_`.
    Malformed(String),
    /// `start` is greater than `end`.
    Inverted { start: u64, end: u64 },
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(s) => write!(f, "malformed hash range: {s:?}"),
            Self::Inverted { start, end } => {
                write!(f, "hash range start {start:#x} is after end {end:#x}")
            }
        }
    }
}

impl std::error::Error for RangeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64) -> HashRange {
        HashRange::new(start, end).expect("valid range")
    }

    #[test]
    fn test_universal_split() {
        let (left, right) = HashRange::UNIVERSAL.split().expect("splittable");
        assert_eq!(left.to_string(), "0000000000000000_7fffffffffffffff");
        assert_eq!(right.to_string(), "8000000000000000_ffffffffffffffff");
        assert_eq!(left.width(), (1u64 << 63) - 1);
        assert_eq!(right.width(), (1u64 << 63) - 1);
        assert!(left.is_left_neighbor_of(&right));
        assert!(right.is_right_neighbor_of(&left));
    }

    #[test]
    fn test_split_to_quarters() {
        let (left, right) = HashRange::UNIVERSAL.split().expect("splittable");
        let (a, b) = left.split().expect("splittable");
        let (c, d) = right.split().expect("splittable");
        let quarters: Vec<String> = [a, b, c, d].iter().map(ToString::to_string).collect();
        assert_eq!(
            quarters,
            vec![
                "0000000000000000_3fffffffffffffff",
                "4000000000000000_7fffffffffffffff",
                "8000000000000000_bfffffffffffffff",
                "c000000000000000_ffffffffffffffff",
            ]
        );
    }

    #[test]
    fn test_width_zero_cannot_split() {
        let single = range(42, 42);
        assert_eq!(single.width(), 0);
        assert!(single.split().is_none());

        let pair = range(42, 43);
        let (l, r) = pair.split().expect("splittable");
        assert_eq!((l.start(), l.end()), (42, 42));
        assert_eq!((r.start(), r.end()), (43, 43));
    }

    #[test]
    fn test_string_roundtrip() {
        for r in [HashRange::UNIVERSAL, range(0, 0), range(0x1234, 0xabcdef)] {
            let parsed: HashRange = r.to_string().parse().expect("parse");
            assert_eq!(parsed, r);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "0000000000000000-7fffffffffffffff",
            "000000000000000_7fffffffffffffff0",
            "000000000000000g_7fffffffffffffff",
            "+000000000000000_7fffffffffffffff",
        ] {
            assert!(
                matches!(bad.parse::<HashRange>(), Err(RangeError::Malformed(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(matches!(
            "0000000000000010_0000000000000001".parse::<HashRange>(),
            Err(RangeError::Inverted { .. })
        ));
    }

    #[test]
    fn test_containment_uses_unsigned_order() {
        let (_, upper) = HashRange::UNIVERSAL.split().expect("splittable");
        assert!(upper.contains(u64::MAX));
        assert!(upper.contains(1 << 63));
        assert!(!upper.contains((1 << 63) - 1));
        assert!(HashRange::UNIVERSAL.contains_range(&upper));
        assert!(upper.is_contained_in(&HashRange::UNIVERSAL));
        assert!(!HashRange::UNIVERSAL.is_contained_in(&upper));
    }

    #[test]
    fn test_no_neighbor_at_domain_boundary() {
        let last = range(u64::MAX, u64::MAX);
        let first = range(0, 0);
        assert!(!last.is_left_neighbor_of(&first));
        assert!(!first.is_right_neighbor_of(&last));
    }
}
