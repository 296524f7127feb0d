use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use log::{debug, warn};

use super::{
    cursor::Cursor,
    error::{Result, StorageError},
    index::{Direction, OrderedIndex, ReadContext},
    key::{ColumnType, ColumnValue, IndexSchema, SortOrder},
    range::{EntryRange, IndexEntry, RecordId},
    table::{ColumnDef, IndexDef, Table, TableDef},
};

/// Name of the only index of a temporary table
pub const TEMP_INDEX: &str = "key";

/// Column of a temporary table; key columns make up its index in the order given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempColumn {
    pub column_type: ColumnType,
    pub key: Option<SortOrder>,
}

impl TempColumn {
    pub fn value(column_type: ColumnType) -> Self {
        Self {
            column_type,
            key: None,
        }
    }

    pub fn key(column_type: ColumnType) -> Self {
        Self {
            column_type,
            key: Some(SortOrder::Ascending),
        }
    }

    pub fn descending(self) -> Self {
        Self {
            key: Some(SortOrder::Descending),
            ..self
        }
    }
}

#[derive(Default)]
struct Catalog {
    tables: HashMap<String, Table>,
    /// Sequence number of the last committed change
    committed: u64,
    open_handles: usize,
    sequential_scans: usize,
    temp_tables: u64,
}

impl Catalog {
    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| StorageError::invalid_argument(name, "no such table"))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StorageError::invalid_argument(name, "no such table"))
    }
}

/// In-memory index provider.
///
/// Clones share the same catalog, so handles opened from any clone see the same data. Every
/// insert and delete commits on its own with the next sequence number.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    catalog: Arc<RwLock<Catalog>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_table(&self, def: TableDef) -> Result<()> {
        let mut catalog = self.write();
        if catalog.tables.contains_key(&def.name) {
            return Err(StorageError::invalid_argument(
                def.name,
                "table already exists",
            ));
        }

        let table = Table::new(def)?;
        debug!("registered table `{}`", table.name());
        catalog.tables.insert(table.name().to_string(), table);

        Ok(())
    }

    pub fn columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        Ok(self.read().table(table)?.columns().to_vec())
    }

    pub fn indexes(&self, table: &str) -> Result<Vec<Arc<IndexSchema>>> {
        Ok(self.read().table(table)?.schemas())
    }

    /// Opens a handle to the named index of a table
    pub fn open_index(&self, table: &str, index: &str) -> Result<IndexHandle> {
        let mut catalog = self.write();
        self.handle(&mut catalog, table, index, false)
    }

    fn handle(
        &self,
        catalog: &mut Catalog,
        table: &str,
        index: &str,
        temporary: bool,
    ) -> Result<IndexHandle> {
        let schema = catalog.table(table)?.schema(index)?;
        catalog.open_handles += 1;
        debug!(
            "opened index `{table}.{index}`; {} open handles",
            catalog.open_handles
        );

        Ok(IndexHandle {
            catalog: Arc::clone(&self.catalog),
            schema,
            sequential: AtomicBool::new(false),
            released: false,
            temporary,
        })
    }

    /// Creates an anonymous table with the given columns and opens a cursor over the index made
    /// of its key columns.
    ///
    /// Columns are named `column0`, `column1` and so on; rows are inserted with
    /// [insert](MemoryEngine::insert) under `cursor.schema().table()`. Text keys compare by code
    /// point, folded to lower case unless `case_sensitive`. The table is dropped when the cursor
    /// is closed.
    pub fn open_temp_table(
        &self,
        columns: &[TempColumn],
        case_sensitive: bool,
    ) -> Result<Cursor<IndexHandle>> {
        if columns.is_empty() {
            return Err(StorageError::invalid_argument(
                "columns",
                "a temporary table needs at least one column",
            ));
        }

        let mut def = TableDef::new("");
        let mut key = String::new();
        for (i, column) in columns.iter().enumerate() {
            let name = format!("column{i}");
            match column.key {
                Some(SortOrder::Ascending) => key.push_str(&format!("+{name}\0")),
                Some(SortOrder::Descending) => key.push_str(&format!("-{name}\0")),
                None => {}
            }
            def = def.column(name, column.column_type);
        }
        if key.is_empty() {
            return Err(StorageError::invalid_argument(
                "columns",
                "a temporary table needs a key column",
            ));
        }
        key.push('\0');

        let index = IndexDef::new(TEMP_INDEX, key);
        def = def.index(match case_sensitive {
            true => index,
            false => index.case_insensitive(),
        });

        let mut catalog = self.write();
        loop {
            catalog.temp_tables += 1;
            def.name = format!("temp#{}", catalog.temp_tables);
            if !catalog.tables.contains_key(&def.name) {
                break;
            }
        }
        let table = Table::new(def)?;
        let name = table.name().to_string();
        debug!("created temporary table `{name}`");
        catalog.tables.insert(name.clone(), table);

        let handle = self.handle(&mut catalog, &name, TEMP_INDEX, true)?;
        drop(catalog);
        Cursor::new(handle)
    }

    /// Opens a cursor positioned before the first entry of the named index
    pub fn open_cursor(&self, table: &str, index: &str) -> Result<Cursor<IndexHandle>> {
        Cursor::new(self.open_index(table, index)?)
    }

    pub fn insert(&self, table: &str, row: Vec<ColumnValue>) -> Result<RecordId> {
        let mut catalog = self.write();
        let sequence = catalog.committed + 1;
        let record = catalog.table_mut(table)?.insert(row, sequence)?;
        catalog.committed = sequence;

        Ok(record)
    }

    pub fn delete(&self, table: &str, record: RecordId) -> Result<()> {
        let mut catalog = self.write();
        let sequence = catalog.committed + 1;
        catalog.table_mut(table)?.delete(record, sequence)?;
        catalog.committed = sequence;

        Ok(())
    }

    /// Read context that sees everything committed so far, and nothing committed later
    pub fn snapshot(&self) -> ReadContext {
        ReadContext::at(self.read().committed)
    }

    /// Number of index handles that have not been released
    pub fn open_handles(&self) -> usize {
        self.read().open_handles
    }

    /// Number of handles currently flagged for a sequential scan
    pub fn sequential_scans(&self) -> usize {
        self.read().sequential_scans
    }
}

/// Open handle to one index of a [MemoryEngine](MemoryEngine).
///
/// The handle is released exactly once, either explicitly or when dropped.
pub struct IndexHandle {
    catalog: Arc<RwLock<Catalog>>,
    schema: Arc<IndexSchema>,
    sequential: AtomicBool,
    released: bool,
    /// Drops the table on release
    temporary: bool,
}

impl IndexHandle {
    pub fn is_released(&self) -> bool {
        self.released
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Catalog>> {
        if self.released {
            return Err(StorageError::CursorClosed);
        }

        Ok(self.catalog.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OrderedIndex for IndexHandle {
    fn schema(&self) -> Result<Arc<IndexSchema>> {
        if self.released {
            return Err(StorageError::CursorClosed);
        }

        Ok(Arc::clone(&self.schema))
    }

    fn nth(
        &self,
        ctx: &ReadContext,
        range: &EntryRange,
        direction: Direction,
        n: u64,
    ) -> Result<Option<IndexEntry>> {
        self.read()?
            .table(self.schema.table())?
            .nth(self.schema.name(), ctx, range, direction, n)
    }

    fn count(&self, ctx: &ReadContext, range: &EntryRange, limit: Option<u64>) -> Result<u64> {
        self.read()?
            .table(self.schema.table())?
            .count(self.schema.name(), ctx, range, limit)
    }

    fn fetch(&self, ctx: &ReadContext, record: RecordId) -> Result<Option<Vec<ColumnValue>>> {
        Ok(self.read()?.table(self.schema.table())?.fetch(ctx, record))
    }

    fn set_sequential(&self, enabled: bool) {
        if self.released || self.sequential.swap(enabled, Ordering::SeqCst) == enabled {
            return;
        }

        let mut catalog = self.write();
        if enabled {
            catalog.sequential_scans += 1;
        } else {
            catalog.sequential_scans = catalog.sequential_scans.saturating_sub(1);
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut catalog = self.write();
        if self.sequential.swap(false, Ordering::SeqCst) {
            catalog.sequential_scans = catalog.sequential_scans.saturating_sub(1);
        }

        match catalog.open_handles.checked_sub(1) {
            Some(open) => catalog.open_handles = open,
            None => warn!("released `{}` with no open handles", self.schema.name()),
        }
        debug!(
            "released index `{}.{}`; {} open handles",
            self.schema.table(),
            self.schema.name(),
            catalog.open_handles
        );

        if self.temporary && catalog.tables.remove(self.schema.table()).is_some() {
            debug!("dropped temporary table `{}`", self.schema.table());
        }
    }
}

impl Drop for IndexHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::error::ErrorKind;

    fn engine() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine
            .register_table(
                TableDef::new("table")
                    .column("long", ColumnType::Int)
                    .index(IndexDef::new("primary", "+long\0\0")),
            )
            .unwrap();
        engine
    }

    #[test]
    fn rejects_duplicate_tables() {
        let engine = engine();
        let result = engine.register_table(TableDef::new("table").column("a", ColumnType::Int));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_names_are_invalid_arguments() {
        let engine = engine();
        assert!(engine.open_index("missing", "primary").is_err());
        assert!(engine.open_index("table", "missing").is_err());
        assert!(engine.insert("missing", vec![1.into()]).is_err());
        assert_eq!(engine.open_handles(), 0);
    }

    #[test]
    fn handles_release_exactly_once() {
        let engine = engine();
        let mut handle = engine.open_index("table", "primary").unwrap();
        let other = engine.open_index("table", "primary").unwrap();
        assert_eq!(engine.open_handles(), 2);

        handle.release();
        handle.release();
        assert!(handle.is_released());
        assert_eq!(engine.open_handles(), 1);

        drop(handle);
        assert_eq!(engine.open_handles(), 1);

        drop(other);
        assert_eq!(engine.open_handles(), 0);
    }

    #[test]
    fn released_handles_refuse_reads() {
        let engine = engine();
        let mut handle = engine.open_index("table", "primary").unwrap();
        handle.release();

        let result = handle.count(&ReadContext::latest(), &EntryRange::full(), None);
        assert_eq!(result, Err(StorageError::CursorClosed));
        assert_eq!(handle.schema(), Err(StorageError::CursorClosed));
    }

    #[test]
    fn sequential_hints_are_tracked_per_handle() {
        let engine = engine();
        let mut handle = engine.open_index("table", "primary").unwrap();

        handle.set_sequential(true);
        handle.set_sequential(true);
        assert_eq!(engine.sequential_scans(), 1);

        handle.set_sequential(false);
        handle.set_sequential(false);
        assert_eq!(engine.sequential_scans(), 0);

        handle.set_sequential(true);
        handle.release();
        assert_eq!(engine.sequential_scans(), 0);
    }

    #[test]
    fn snapshots_advance_with_commits() {
        let engine = engine();
        let before = engine.snapshot();
        engine.insert("table", vec![1.into()]).unwrap();
        let after = engine.snapshot();

        let handle = engine.open_index("table", "primary").unwrap();
        let range = EntryRange::full();
        assert_eq!(handle.count(&before, &range, None).unwrap(), 0);
        assert_eq!(handle.count(&after, &range, None).unwrap(), 1);
        assert!(after > before);
    }

    fn scan(engine: &MemoryEngine, cursor: &mut Cursor<IndexHandle>) -> Vec<ColumnValue> {
        let ctx = engine.snapshot();
        let mut values = Vec::new();
        while cursor.try_move_next(&ctx).unwrap() {
            values.push(cursor.retrieve(&ctx).unwrap()[0].clone());
        }
        values
    }

    fn text_table(engine: &MemoryEngine, case_sensitive: bool) -> Cursor<IndexHandle> {
        let cursor = engine
            .open_temp_table(&[TempColumn::key(ColumnType::Text)], case_sensitive)
            .unwrap();
        let table = cursor.schema().table().to_string();
        for text in ["g", "a", "A", "aa", "x", "b", "X"] {
            engine.insert(&table, vec![text.into()]).unwrap();
        }
        cursor
    }

    fn texts(values: &[&str]) -> Vec<ColumnValue> {
        values.iter().map(|v| ColumnValue::from(*v)).collect()
    }

    #[test]
    fn temp_tables_sort_by_their_key() {
        let engine = engine();
        let columns = [TempColumn::key(ColumnType::Int), TempColumn::value(ColumnType::Text)];
        let mut cursor = engine.open_temp_table(&columns, true).unwrap();
        let table = cursor.schema().table().to_string();
        for i in (0..=5i64).rev() {
            engine.insert(&table, vec![i.into(), i.to_string().into()]).unwrap();
        }

        let ctx = engine.snapshot();
        let mut seen = Vec::new();
        while cursor.try_move_next(&ctx).unwrap() {
            seen.push(cursor.retrieve(&ctx).unwrap()[1].clone());
        }
        assert_eq!(seen, texts(&["0", "1", "2", "3", "4", "5"]));
        assert_eq!(engine.columns(&table).unwrap()[1].name, "column1");
    }

    #[test]
    fn temp_tables_sort_descending_keys() {
        let engine = engine();
        let columns = [TempColumn::key(ColumnType::Int).descending()];
        let mut cursor = engine.open_temp_table(&columns, true).unwrap();
        let table = cursor.schema().table().to_string();
        for i in [2i64, 7, -3] {
            engine.insert(&table, vec![i.into()]).unwrap();
        }

        let expected: Vec<ColumnValue> = [7i64, 2, -3].into_iter().map(ColumnValue::from).collect();
        assert_eq!(scan(&engine, &mut cursor), expected);
    }

    #[test]
    fn case_sensitive_temp_tables_sort_by_code_point() {
        let engine = engine();
        let mut cursor = text_table(&engine, true);
        assert_eq!(
            scan(&engine, &mut cursor),
            texts(&["A", "X", "a", "aa", "b", "g", "x"])
        );
    }

    #[test]
    fn case_folded_temp_tables_keep_insertion_order_for_ties() {
        let engine = engine();
        let mut cursor = text_table(&engine, false);
        assert_eq!(
            scan(&engine, &mut cursor),
            texts(&["a", "A", "aa", "b", "g", "x", "X"])
        );
    }

    #[test]
    fn temp_tables_need_a_key_column() {
        let engine = engine();
        let result = engine.open_temp_table(&[], true).map(|_| ());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);

        let result = engine
            .open_temp_table(&[TempColumn::value(ColumnType::Int)], true)
            .map(|_| ());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(engine.open_handles(), 0);
    }

    #[test]
    fn closing_drops_the_temp_table() {
        let engine = engine();
        let mut first = text_table(&engine, true);
        let second = text_table(&engine, true);
        let table = first.schema().table().to_string();
        assert_ne!(table, second.schema().table());
        assert_eq!(engine.open_handles(), 2);

        first.close();
        assert!(engine.insert(&table, vec!["late".into()]).is_err());
        assert!(engine.columns("table").is_ok());

        drop(second);
        assert_eq!(engine.open_handles(), 0);
    }

    #[test]
    fn failed_writes_do_not_commit() {
        let engine = engine();
        let before = engine.snapshot();
        assert!(engine.insert("table", vec!["one".into()]).is_err());
        assert_eq!(engine.snapshot(), before);
    }
}
