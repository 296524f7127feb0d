use std::{fmt::Display, ops::Bound};

use super::key::EncodedKey;

/// Identifier of a record within its table. Identifiers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Sorts before every real record; used to build search bounds
    pub(crate) const LOWEST: RecordId = RecordId(0);
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One entry of an index: the encoded key of a record and the record it points at.
///
/// Entries sort by key bytes first and record id second, which keeps duplicate keys in a
/// stable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexEntry {
    pub key: EncodedKey,
    pub record: RecordId,
}

impl IndexEntry {
    pub fn new(key: EncodedKey, record: RecordId) -> Self {
        Self { key, record }
    }

    fn lowest(key: EncodedKey) -> Self {
        Self::new(key, RecordId::LOWEST)
    }
}

/// Bound at the first entry whose key starts with `key`
pub(crate) fn key_start(key: &EncodedKey) -> Bound<IndexEntry> {
    Bound::Included(IndexEntry::lowest(key.clone()))
}

/// Bound just past the last entry whose key starts with `key`
pub(crate) fn key_end(key: &EncodedKey) -> Bound<IndexEntry> {
    match key.prefix_end() {
        Some(end) => Bound::Excluded(IndexEntry::lowest(end)),
        None => Bound::Unbounded,
    }
}

/// Lower bound at the first entry sorting after every key starting with `key`.
///
/// `None` when nothing can sort after `key`.
pub(crate) fn past_key(key: &EncodedKey) -> Option<Bound<IndexEntry>> {
    key.prefix_end()
        .map(|end| Bound::Included(IndexEntry::lowest(end)))
}

/// Upper bound just before the first entry whose key starts with `key`
pub(crate) fn before_key(key: &EncodedKey) -> Bound<IndexEntry> {
    Bound::Excluded(IndexEntry::lowest(key.clone()))
}

/// A contiguous slice of an index, bounded by entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRange {
    pub lower: Bound<IndexEntry>,
    pub upper: Bound<IndexEntry>,
}

impl EntryRange {
    pub fn new(lower: Bound<IndexEntry>, upper: Bound<IndexEntry>) -> Self {
        Self { lower, upper }
    }

    /// Range covering the whole index
    pub fn full() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn contains(&self, entry: &IndexEntry) -> bool {
        let above = match &self.lower {
            Bound::Included(lower) => entry >= lower,
            Bound::Excluded(lower) => entry > lower,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(upper) => entry <= upper,
            Bound::Excluded(upper) => entry < upper,
            Bound::Unbounded => true,
        };

        above && below
    }

    /// Returns whether the bounds cross, so that no entry can ever fall inside them
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(lower), Bound::Included(upper)) => lower > upper,
            (Bound::Included(lower), Bound::Excluded(upper))
            | (Bound::Excluded(lower), Bound::Included(upper))
            | (Bound::Excluded(lower), Bound::Excluded(upper)) => lower >= upper,
            _ => false,
        }
    }

    /// The part of `self` that also lies within `other`
    pub fn intersect(&self, other: &EntryRange) -> EntryRange {
        EntryRange {
            lower: tighter_lower(&self.lower, &other.lower),
            upper: tighter_upper(&self.upper, &other.upper),
        }
    }

    /// The part of `self` strictly after `entry`
    pub fn after(&self, entry: &IndexEntry) -> EntryRange {
        self.intersect(&EntryRange::new(
            Bound::Excluded(entry.clone()),
            Bound::Unbounded,
        ))
    }

    /// The part of `self` strictly before `entry`
    pub fn before(&self, entry: &IndexEntry) -> EntryRange {
        self.intersect(&EntryRange::new(
            Bound::Unbounded,
            Bound::Excluded(entry.clone()),
        ))
    }

    pub fn as_bounds(&self) -> (Bound<&IndexEntry>, Bound<&IndexEntry>) {
        (self.lower.as_ref(), self.upper.as_ref())
    }
}

impl Default for EntryRange {
    fn default() -> Self {
        Self::full()
    }
}

fn tighter_lower(a: &Bound<IndexEntry>, b: &Bound<IndexEntry>) -> Bound<IndexEntry> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.max(y).clone()),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.max(y).clone()),
        (Bound::Included(inc), Bound::Excluded(exc))
        | (Bound::Excluded(exc), Bound::Included(inc)) => {
            if exc >= inc {
                Bound::Excluded(exc.clone())
            } else {
                Bound::Included(inc.clone())
            }
        }
    }
}

fn tighter_upper(a: &Bound<IndexEntry>, b: &Bound<IndexEntry>) -> Bound<IndexEntry> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.min(y).clone()),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.min(y).clone()),
        (Bound::Included(inc), Bound::Excluded(exc))
        | (Bound::Excluded(exc), Bound::Included(inc)) => {
            if exc <= inc {
                Bound::Excluded(exc.clone())
            } else {
                Bound::Included(inc.clone())
            }
        }
    }
}

/// Seek predicates, matched against index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOp {
    Eq,
    Le,
    Lt,
    Ge,
    Gt,
}

impl TryFrom<&str> for SeekOp {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "eq" | "=" => Ok(Self::Eq),
            "le" | "<=" => Ok(Self::Le),
            "lt" | "<" => Ok(Self::Lt),
            "ge" | ">=" => Ok(Self::Ge),
            "gt" | ">" => Ok(Self::Gt),
            v => Err(format!("unknown seek predicate `{v}`")),
        }
    }
}

/// Options for [Cursor::set_index_range](super::Cursor::set_index_range).
///
/// Without [UPPER_LIMIT](RangeFlags::UPPER_LIMIT) the key becomes the lower limit of the range
/// and the current record the upper one. [INCLUSIVE](RangeFlags::INCLUSIVE) applies to the key's
/// bound only; the current record is always part of the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeFlags(u8);

impl RangeFlags {
    pub const NONE: RangeFlags = RangeFlags(0);
    pub const UPPER_LIMIT: RangeFlags = RangeFlags(0x1);
    pub const INCLUSIVE: RangeFlags = RangeFlags(0x2);

    pub fn contains(self, other: RangeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RangeFlags {
    type Output = RangeFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        RangeFlags(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(key: u8, record: u64) -> IndexEntry {
        IndexEntry::new(EncodedKey::from_bytes(vec![key, 0x00]), RecordId(record))
    }

    #[test]
    fn duplicate_keys_order_by_record() {
        assert!(entry(1, 1) < entry(1, 2));
        assert!(entry(1, 9) < entry(2, 1));
    }

    #[test]
    fn contains_honours_bound_kinds() {
        let range = EntryRange::new(
            Bound::Included(entry(2, 1)),
            Bound::Excluded(entry(5, 1)),
        );

        assert!(!range.contains(&entry(1, 1)));
        assert!(range.contains(&entry(2, 1)));
        assert!(range.contains(&entry(4, 7)));
        assert!(!range.contains(&entry(5, 1)));
        assert!(EntryRange::full().contains(&entry(0, 1)));
    }

    #[test]
    fn intersection_keeps_tighter_bounds() {
        let outer = EntryRange::new(Bound::Included(entry(2, 1)), Bound::Included(entry(8, 1)));
        let inner = outer.after(&entry(3, 1));

        assert_eq!(inner.lower, Bound::Excluded(entry(3, 1)));
        assert_eq!(inner.upper, Bound::Included(entry(8, 1)));

        let same = outer.intersect(&EntryRange::new(
            Bound::Excluded(entry(2, 1)),
            Bound::Unbounded,
        ));
        assert_eq!(same.lower, Bound::Excluded(entry(2, 1)));
    }

    #[test]
    fn detects_crossed_bounds() {
        let range = EntryRange::new(Bound::Included(entry(2, 1)), Bound::Included(entry(2, 1)));
        assert!(!range.is_empty());
        assert!(range.after(&entry(2, 1)).is_empty());
        let crossed = EntryRange::new(Bound::Included(entry(3, 1)), Bound::Included(entry(2, 1)));
        assert!(crossed.is_empty());
        assert!(!EntryRange::full().is_empty());
    }

    #[test]
    fn range_flags_combine() {
        let flags = RangeFlags::UPPER_LIMIT | RangeFlags::INCLUSIVE;
        assert!(flags.contains(RangeFlags::UPPER_LIMIT));
        assert!(flags.contains(RangeFlags::INCLUSIVE));
        assert!(!RangeFlags::NONE.contains(RangeFlags::INCLUSIVE));
    }

    #[test]
    fn parses_seek_predicates() {
        assert_eq!(SeekOp::try_from("EQ"), Ok(SeekOp::Eq));
        assert_eq!(SeekOp::try_from(">="), Ok(SeekOp::Ge));
        assert!(SeekOp::try_from("between").is_err());
    }
}
