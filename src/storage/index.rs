use std::sync::Arc;

use super::{
    error::Result,
    key::{ColumnValue, IndexSchema},
    range::{EntryRange, IndexEntry, RecordId},
};

/// Snapshot of committed data a read is evaluated against.
///
/// Every read takes the context explicitly; a cursor never looks at ambient transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadContext {
    snapshot: u64,
}

impl ReadContext {
    pub fn at(snapshot: u64) -> Self {
        Self { snapshot }
    }

    /// Sees everything that has been committed at the time of each call
    pub fn latest() -> Self {
        Self { snapshot: u64::MAX }
    }

    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Returns whether a change committed at `created` and optionally removed at `deleted` is
    /// visible in this snapshot
    pub fn sees(&self, created: u64, deleted: Option<u64>) -> bool {
        created <= self.snapshot && deleted.map_or(true, |d| d > self.snapshot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// An ordered keyspace the cursor navigates.
///
/// Implementations own the entries; a cursor only keeps the entry it is positioned on and asks
/// the index again on every call.
pub trait OrderedIndex {
    /// Key layout of the index
    fn schema(&self) -> Result<Arc<IndexSchema>>;

    /// Retrieves the `n`-th visible entry of `range`, counting from its start when going
    /// [Forward](Direction::Forward) and from its end when going [Backward](Direction::Backward).
    ///
    /// `n` is zero based.
    fn nth(
        &self,
        ctx: &ReadContext,
        range: &EntryRange,
        direction: Direction,
        n: u64,
    ) -> Result<Option<IndexEntry>>;

    /// Counts visible entries of `range`, stopping at `limit` when given
    fn count(&self, ctx: &ReadContext, range: &EntryRange, limit: Option<u64>) -> Result<u64>;

    /// Retrieves the column values of a record
    fn fetch(&self, ctx: &ReadContext, record: RecordId) -> Result<Option<Vec<ColumnValue>>>;

    /// Hints that a forward scan is starting (`true`) or has finished (`false`)
    fn set_sequential(&self, _enabled: bool) {}

    /// Releases the handle. Releasing more than once has no effect.
    fn release(&mut self);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn snapshots_see_committed_changes() {
        let ctx = ReadContext::at(5);

        assert!(ctx.sees(5, None));
        assert!(!ctx.sees(6, None));
        assert!(ctx.sees(2, Some(6)));
        assert!(!ctx.sees(2, Some(5)));
        assert!(ReadContext::latest().sees(u64::MAX - 1, None));
    }
}
