use std::{
    ops::{Bound, Deref, DerefMut},
    sync::Arc,
};

use log::{debug, trace};

use super::{
    error::{Result, StorageError},
    index::{Direction, OrderedIndex, ReadContext},
    key::{ColumnValue, IndexSchema, Key, KeyBuilder},
    range::{
        before_key, key_end, key_start, past_key, EntryRange, IndexEntry, RangeFlags, RecordId,
        SeekOp,
    },
};

/// Where a [Cursor](Cursor) currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// Before the first entry; no current record
    BeforeFirst,
    OnRecord(IndexEntry),
    /// After the last entry; no current record
    AfterLast,
}

impl Position {
    /// Sentinel reached when a search in `direction` runs out of entries
    fn exhausted(direction: Direction) -> Self {
        match direction {
            Direction::Forward => Self::AfterLast,
            Direction::Backward => Self::BeforeFirst,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeforeFirst => write!(f, "before first"),
            Self::OnRecord(entry) => write!(f, "on {}", entry.record),
            Self::AfterLast => write!(f, "after last"),
        }
    }
}

/// Movement requested from [Cursor::move_to](Cursor::move_to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    First,
    Last,
    Next,
    Previous,
    /// Traverse this many records; negative values move backwards
    By(i64),
}

impl From<i64> for Move {
    fn from(offset: i64) -> Self {
        Self::By(offset)
    }
}

impl TryFrom<&str> for Move {
    type Error = String;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "next" => Ok(Self::Next),
            "prev" | "previous" => Ok(Self::Previous),
            v => v
                .parse::<i64>()
                .map(Self::By)
                .map_err(|_| format!("unknown move `{v}`")),
        }
    }
}

/// Outcome of a move that did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// The move ran past the start or end of the index/range
    Boundary,
}

/// Approximate location of a record: `entries_before` out of `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    pub entries_before: u64,
    pub total: u64,
}

/// A positionable handle over an [OrderedIndex](OrderedIndex).
///
/// The cursor starts before the first entry. It remembers the entry it is on rather than an
/// ordinal, so entries added or removed elsewhere never leave it pointing at the wrong record.
/// Every read takes a [ReadContext](ReadContext) that decides which entries are visible.
///
/// A cursor is not synchronized; use one cursor per thread.
pub struct Cursor<I: OrderedIndex> {
    index: I,
    schema: Arc<IndexSchema>,
    position: Position,
    range: Option<EntryRange>,
    sequential: bool,
    closed: bool,
}

impl<I: OrderedIndex> Cursor<I> {
    pub fn new(index: I) -> Result<Self> {
        let schema = index.schema()?;

        Ok(Self {
            index,
            schema,
            position: Position::BeforeFirst,
            range: None,
            sequential: false,
            closed: false,
        })
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    pub fn has_index_range(&self) -> bool {
        self.range.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Starts a new key for this cursor's index
    pub fn make_key(&self) -> Result<KeyBuilder> {
        self.ensure_open()?;
        Ok(KeyBuilder::new(Arc::clone(&self.schema)))
    }

    /// Moves the cursor, failing with [NoCurrentRecord](StorageError::NoCurrentRecord) when the
    /// move runs past either end of the index or active range.
    pub fn move_to(&mut self, ctx: &ReadContext, movement: impl Into<Move>) -> Result<()> {
        match self.step(ctx, movement.into())? {
            MoveOutcome::Moved => Ok(()),
            MoveOutcome::Boundary => Err(StorageError::NoCurrentRecord),
        }
    }

    /// Moves the cursor, returning `false` when the move runs past either end of the index or
    /// active range.
    ///
    /// The cursor is left exactly where [move_to](Cursor::move_to) would leave it.
    pub fn try_move(&mut self, ctx: &ReadContext, movement: impl Into<Move>) -> Result<bool> {
        Ok(self.step(ctx, movement.into())? == MoveOutcome::Moved)
    }

    pub fn try_move_first(&mut self, ctx: &ReadContext) -> Result<bool> {
        self.try_move(ctx, Move::First)
    }

    pub fn try_move_last(&mut self, ctx: &ReadContext) -> Result<bool> {
        self.try_move(ctx, Move::Last)
    }

    pub fn try_move_next(&mut self, ctx: &ReadContext) -> Result<bool> {
        self.try_move(ctx, Move::Next)
    }

    pub fn try_move_previous(&mut self, ctx: &ReadContext) -> Result<bool> {
        self.try_move(ctx, Move::Previous)
    }

    pub fn move_before_first(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.position = Position::BeforeFirst;
        Ok(())
    }

    pub fn move_after_last(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.position = Position::AfterLast;
        Ok(())
    }

    fn step(&mut self, ctx: &ReadContext, movement: Move) -> Result<MoveOutcome> {
        self.ensure_open()?;
        let range = self.active_range();

        let offset = match movement {
            Move::First => return self.land(ctx, &range, Direction::Forward, 0),
            Move::Last => return self.land(ctx, &range, Direction::Backward, 0),
            Move::Next => 1,
            Move::Previous => -1,
            Move::By(offset) => offset,
        };
        let direction = if offset < 0 {
            Direction::Backward
        } else {
            Direction::Forward
        };

        let remaining = match (&self.position, direction) {
            (Position::OnRecord(entry), _) if offset == 0 => {
                return match self.is_visible(ctx, entry)? {
                    true => Ok(MoveOutcome::Moved),
                    false => Ok(MoveOutcome::Boundary),
                };
            }
            (_, _) if offset == 0 => return Ok(MoveOutcome::Boundary),
            (Position::OnRecord(entry), Direction::Forward) => range.after(entry),
            (Position::OnRecord(entry), Direction::Backward) => range.before(entry),
            (Position::BeforeFirst, Direction::Forward) => range,
            (Position::AfterLast, Direction::Backward) => range,
            (Position::BeforeFirst, Direction::Backward)
            | (Position::AfterLast, Direction::Forward) => {
                trace!("move {offset} from {:?} stays put", self.position);
                return Ok(MoveOutcome::Boundary);
            }
        };

        self.land(ctx, &remaining, direction, offset.unsigned_abs() - 1)
    }

    /// Positions on the `n`-th entry of `range` in `direction`, or on the sentinel past it
    fn land(
        &mut self,
        ctx: &ReadContext,
        range: &EntryRange,
        direction: Direction,
        n: u64,
    ) -> Result<MoveOutcome> {
        match self.index.nth(ctx, range, direction, n)? {
            Some(entry) => {
                trace!("cursor on {}", entry.record);
                self.position = Position::OnRecord(entry);
                Ok(MoveOutcome::Moved)
            }
            None => {
                self.position = Position::exhausted(direction);
                trace!("cursor reached {:?}", self.position);
                Ok(MoveOutcome::Boundary)
            }
        }
    }

    /// Positions the cursor on the nearest record satisfying `op` against `key`.
    ///
    /// `Eq`, `Ge` and `Gt` land on the first such record in index order, `Le` and `Lt` on the
    /// last. A key with fewer columns than the index matches every record sharing those
    /// leading columns. The search stays within the active index range.
    ///
    /// When nothing matches the cursor ends after the last record (`Eq`, `Ge`, `Gt`) or before
    /// the first (`Le`, `Lt`) and [RecordNotFound](StorageError::RecordNotFound) is returned.
    pub fn seek(&mut self, ctx: &ReadContext, key: Key, op: SeekOp) -> Result<()> {
        self.ensure_open()?;
        self.check_key(&key)?;

        let encoded = key.encoded();
        let (bounds, direction) = match op {
            SeekOp::Eq => (
                Some(EntryRange::new(key_start(encoded), key_end(encoded))),
                Direction::Forward,
            ),
            SeekOp::Ge => (
                Some(EntryRange::new(key_start(encoded), Bound::Unbounded)),
                Direction::Forward,
            ),
            SeekOp::Gt => (
                past_key(encoded).map(|lower| EntryRange::new(lower, Bound::Unbounded)),
                Direction::Forward,
            ),
            SeekOp::Le => (
                Some(EntryRange::new(Bound::Unbounded, key_end(encoded))),
                Direction::Backward,
            ),
            SeekOp::Lt => (
                Some(EntryRange::new(Bound::Unbounded, before_key(encoded))),
                Direction::Backward,
            ),
        };

        let outcome = match bounds {
            Some(bounds) => {
                let bounds = bounds.intersect(&self.active_range());
                self.land(ctx, &bounds, direction, 0)?
            }
            None => {
                self.position = Position::exhausted(direction);
                MoveOutcome::Boundary
            }
        };

        debug!("seek {op:?}: {:?}", self.position);
        match outcome {
            MoveOutcome::Moved => Ok(()),
            MoveOutcome::Boundary => Err(StorageError::RecordNotFound),
        }
    }

    /// Like [seek](Cursor::seek) but returns `false` instead of failing when nothing matches
    pub fn try_seek(&mut self, ctx: &ReadContext, key: Key, op: SeekOp) -> Result<bool> {
        match self.seek(ctx, key, op) {
            Ok(()) => Ok(true),
            Err(StorageError::RecordNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Restricts movement to the records between the current record and `key`.
    ///
    /// With [RangeFlags::UPPER_LIMIT](RangeFlags::UPPER_LIMIT) the key is the upper limit,
    /// otherwise the lower one. [RangeFlags::INCLUSIVE](RangeFlags::INCLUSIVE) includes the
    /// records matching `key`; the current record is always included. The new range replaces
    /// any active one.
    ///
    /// Fails with [InvalidRange](StorageError::InvalidRange) when there is no current record and
    /// with [NoCurrentRecord](StorageError::NoCurrentRecord) when the current record would fall
    /// outside the range; in both cases the cursor is left untouched. A current record deleted
    /// since the cursor landed on it still bounds the range.
    pub fn set_index_range(&mut self, key: Key, flags: RangeFlags) -> Result<()> {
        self.ensure_open()?;
        self.check_key(&key)?;

        let current = match &self.position {
            Position::OnRecord(entry) => entry.clone(),
            _ => {
                return Err(StorageError::invalid_range(
                    "the cursor is not positioned on a record",
                ))
            }
        };

        let encoded = key.encoded();
        let inclusive = flags.contains(RangeFlags::INCLUSIVE);
        let range = if flags.contains(RangeFlags::UPPER_LIMIT) {
            let upper = if inclusive {
                key_end(encoded)
            } else {
                before_key(encoded)
            };
            Some(EntryRange::new(Bound::Included(current.clone()), upper))
        } else {
            let lower = if inclusive {
                Some(key_start(encoded))
            } else {
                past_key(encoded)
            };
            lower.map(|lower| EntryRange::new(lower, Bound::Included(current.clone())))
        };

        match range {
            Some(range) if range.contains(&current) => {
                debug!("index range set: {range:?}");
                self.range = Some(range);
                Ok(())
            }
            _ => Err(StorageError::NoCurrentRecord),
        }
    }

    /// Like [set_index_range](Cursor::set_index_range) but returns `false` when the current
    /// record would fall outside the range
    pub fn try_set_index_range(&mut self, key: Key, flags: RangeFlags) -> Result<bool> {
        match self.set_index_range(key, flags) {
            Ok(()) => Ok(true),
            Err(StorageError::NoCurrentRecord) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Removes the active index range, if there is one
    pub fn reset_index_range(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.range.take().is_some() {
            debug!("index range removed");
        }
        Ok(())
    }

    /// Counts the records from the current record to the end of the active range, or of the
    /// whole index when no range is set. On either sentinel the whole range is counted.
    ///
    /// At most `max` records are counted when `max` is non-zero.
    pub fn record_count(&self, ctx: &ReadContext, max: u64) -> Result<u64> {
        self.ensure_open()?;
        let limit = (max > 0).then_some(max);

        let range = match &self.position {
            Position::OnRecord(entry) => self
                .active_range()
                .intersect(&EntryRange::new(Bound::Included(entry.clone()), Bound::Unbounded)),
            _ => self.active_range(),
        };
        self.index.count(ctx, &range, limit)
    }

    /// Approximate location of the current record within the active range
    pub fn get_position(&self, ctx: &ReadContext) -> Result<RecordPosition> {
        let entry = self.current()?;
        if !self.is_visible(ctx, entry)? {
            return Err(StorageError::NoCurrentRecord);
        }
        let range = self.active_range();

        let total = self.index.count(ctx, &range, None)?;
        let entries_before = self.index.count(ctx, &range.before(entry), None)?;

        Ok(RecordPosition {
            entries_before,
            total,
        })
    }

    /// Moves to the record closest to the fraction `entries_before / total` of the active
    /// range. The landing record is approximate; only first, last and proportional positions
    /// are meaningful.
    pub fn goto_position(&mut self, ctx: &ReadContext, position: RecordPosition) -> Result<()> {
        self.ensure_open()?;
        if position.total == 0 || position.entries_before > position.total {
            return Err(StorageError::invalid_argument(
                "position",
                format!(
                    "{} of {} is not a valid fraction",
                    position.entries_before, position.total
                ),
            ));
        }

        let range = self.active_range();
        let count = self.index.count(ctx, &range, None)?;
        if count == 0 {
            self.position = Position::AfterLast;
            return Err(StorageError::RecordNotFound);
        }

        let rank = (u128::from(position.entries_before) * u128::from(count)
            / u128::from(position.total)) as u64;
        match self.land(ctx, &range, Direction::Forward, rank.min(count - 1))? {
            MoveOutcome::Moved => Ok(()),
            MoveOutcome::Boundary => Err(StorageError::RecordNotFound),
        }
    }

    /// Hints that a forward scan over the index is about to start
    pub fn set_sequential(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.sequential {
            self.index.set_sequential(true);
            self.sequential = true;
        }
        Ok(())
    }

    /// Ends a hint given by [set_sequential](Cursor::set_sequential); does nothing otherwise
    pub fn reset_sequential(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.end_sequential();
        Ok(())
    }

    /// Hints a sequential scan for as long as the returned guard lives.
    ///
    /// The guard dereferences to the cursor and resets the hint when dropped, however the scan
    /// ends.
    pub fn sequential(&mut self) -> Result<SequentialScan<'_, I>> {
        self.set_sequential()?;
        Ok(SequentialScan { cursor: self })
    }

    fn end_sequential(&mut self) {
        if self.sequential {
            self.index.set_sequential(false);
            self.sequential = false;
        }
    }

    /// The entry the cursor is on
    pub fn current(&self) -> Result<&IndexEntry> {
        self.ensure_open()?;
        match &self.position {
            Position::OnRecord(entry) => Ok(entry),
            _ => Err(StorageError::NoCurrentRecord),
        }
    }

    pub fn record_id(&self) -> Result<RecordId> {
        Ok(self.current()?.record)
    }

    /// Column values of the current record, in table column order
    pub fn retrieve(&self, ctx: &ReadContext) -> Result<Vec<ColumnValue>> {
        let entry = self.current()?;
        self.index
            .fetch(ctx, entry.record)?
            .ok_or(StorageError::NoCurrentRecord)
    }

    /// Releases the index handle. Closing again has no effect.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        self.end_sequential();
        self.index.release();
        self.closed = true;
        self.position = Position::BeforeFirst;
        self.range = None;
        debug!("closed cursor on `{}.{}`", self.schema.table(), self.schema.name());
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(StorageError::CursorClosed)
        } else {
            Ok(())
        }
    }

    fn check_key(&self, key: &Key) -> Result<()> {
        if key.is_for(&self.schema) {
            Ok(())
        } else {
            Err(StorageError::invalid_argument(
                "key",
                format!(
                    "key was not built for index `{}.{}`",
                    self.schema.table(),
                    self.schema.name()
                ),
            ))
        }
    }

    fn is_visible(&self, ctx: &ReadContext, entry: &IndexEntry) -> Result<bool> {
        let only = EntryRange::new(Bound::Included(entry.clone()), Bound::Included(entry.clone()));
        Ok(self.index.nth(ctx, &only, Direction::Forward, 0)?.is_some())
    }

    fn active_range(&self) -> EntryRange {
        self.range.clone().unwrap_or_default()
    }
}

impl<I: OrderedIndex> Drop for Cursor<I> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Scope of a sequential-scan hint; see [Cursor::sequential](Cursor::sequential).
pub struct SequentialScan<'a, I: OrderedIndex> {
    cursor: &'a mut Cursor<I>,
}

impl<I: OrderedIndex> Deref for SequentialScan<'_, I> {
    type Target = Cursor<I>;

    fn deref(&self) -> &Self::Target {
        self.cursor
    }
}

impl<I: OrderedIndex> DerefMut for SequentialScan<'_, I> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.cursor
    }
}

impl<I: OrderedIndex> Drop for SequentialScan<'_, I> {
    fn drop(&mut self) {
        self.cursor.end_sequential();
    }
}
