pub mod cursor;
pub mod engine;
pub mod error;
pub mod index;
pub mod key;
pub mod range;
pub mod statement;
pub mod table;

pub use cursor::{Cursor, Move, MoveOutcome, Position, RecordPosition, SequentialScan};
pub use engine::{IndexHandle, MemoryEngine, TempColumn, TEMP_INDEX};
pub use error::{ErrorKind, Result, StorageError};
pub use index::{Direction, OrderedIndex, ReadContext};
pub use key::{ColumnType, ColumnValue, IndexSchema, Key, KeyBuilder, SortOrder};
pub use range::{EntryRange, IndexEntry, RangeFlags, RecordId, SeekOp};
pub use statement::{Session, Statement};
pub use table::{ColumnDef, IndexDef, Table, TableDef};
