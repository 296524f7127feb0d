use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use log::{debug, trace};

use super::{
    error::{Result, StorageError},
    index::{Direction, ReadContext},
    key::{parse_key_description, ColumnType, ColumnValue, IndexSchema, KeyColumn},
    range::{EntryRange, IndexEntry, RecordId},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

/// Declares an index by name and key description, e.g. `"+key\0\0"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub key: String,
    pub case_sensitive: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            case_sensitive: true,
        }
    }

    /// Makes text columns of the index compare without regard to case
    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }
}

/// Declaration of a table registered with [MemoryEngine](super::MemoryEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            column_type,
        });
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Commit sequence numbers bounding the lifetime of a row or index entry
#[derive(Debug, Clone, Copy)]
struct Version {
    created: u64,
    deleted: Option<u64>,
}

impl Version {
    fn visible(&self, ctx: &ReadContext) -> bool {
        ctx.sees(self.created, self.deleted)
    }
}

struct TableIndex {
    schema: Arc<IndexSchema>,
    /// Position of every key column within a row
    columns: Vec<usize>,
    entries: BTreeMap<IndexEntry, Version>,
}

impl TableIndex {
    fn entry_for(&self, record: RecordId, row: &[ColumnValue]) -> Result<IndexEntry> {
        let values: Vec<ColumnValue> = self.columns.iter().map(|&i| row[i].clone()).collect();
        Ok(IndexEntry::new(self.schema.encode(&values)?, record))
    }

    fn visible<'a>(
        &'a self,
        ctx: &'a ReadContext,
        range: &'a EntryRange,
    ) -> impl DoubleEndedIterator<Item = &'a IndexEntry> + 'a {
        // `BTreeMap::range` panics on crossed bounds; those ranges hold nothing anyway.
        let entries = if range.is_empty() {
            None
        } else {
            Some(self.entries.range(range.as_bounds()))
        };

        entries
            .into_iter()
            .flatten()
            .filter(move |(_, version)| version.visible(ctx))
            .map(|(entry, _)| entry)
    }
}

/// In-memory table: versioned rows plus one ordered set of entries per index.
pub struct Table {
    name: String,
    columns: Vec<ColumnDef>,
    rows: BTreeMap<RecordId, (Vec<ColumnValue>, Version)>,
    indexes: HashMap<String, TableIndex>,
    next_record: u64,
}

impl Table {
    pub fn new(def: TableDef) -> Result<Self> {
        for (i, column) in def.columns.iter().enumerate() {
            if def.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(StorageError::invalid_argument(
                    column.name.clone(),
                    format!("duplicate column in table `{}`", def.name),
                ));
            }
        }

        let mut indexes = HashMap::new();
        for index in def.indexes {
            if indexes.contains_key(&index.name) {
                return Err(StorageError::invalid_argument(
                    index.name,
                    format!("duplicate index in table `{}`", def.name),
                ));
            }

            let mut positions = Vec::new();
            let mut key_columns = Vec::new();
            for (name, order) in parse_key_description(&index.key)? {
                let position = def
                    .columns
                    .iter()
                    .position(|c| c.name == name)
                    .ok_or_else(|| {
                        StorageError::invalid_argument(
                            name.clone(),
                            format!("index `{}` names an unknown column", index.name),
                        )
                    })?;

                positions.push(position);
                key_columns.push(KeyColumn {
                    name,
                    column_type: def.columns[position].column_type,
                    order,
                });
            }

            let schema =
                IndexSchema::new(&def.name, &index.name, key_columns, index.case_sensitive)?;
            debug!("table `{}`: created index `{}`", def.name, index.name);
            indexes.insert(
                index.name,
                TableIndex {
                    schema: Arc::new(schema),
                    columns: positions,
                    entries: BTreeMap::new(),
                },
            );
        }

        Ok(Self {
            name: def.name,
            columns: def.columns,
            rows: BTreeMap::new(),
            indexes,
            next_record: 1,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Index schemas, sorted by index name
    pub fn schemas(&self) -> Vec<Arc<IndexSchema>> {
        let mut schemas: Vec<_> = self.indexes.values().map(|i| Arc::clone(&i.schema)).collect();
        schemas.sort_by(|a, b| a.name().cmp(b.name()));
        schemas
    }

    pub fn schema(&self, index: &str) -> Result<Arc<IndexSchema>> {
        Ok(Arc::clone(&self.index(index)?.schema))
    }

    /// Inserts a row committed at `sequence`
    pub fn insert(&mut self, row: Vec<ColumnValue>, sequence: u64) -> Result<RecordId> {
        if row.len() != self.columns.len() {
            return Err(StorageError::invalid_argument(
                "row",
                format!(
                    "table `{}` has {} columns, got {}",
                    self.name,
                    self.columns.len(),
                    row.len()
                ),
            ));
        }

        for (column, value) in self.columns.iter().zip(&row) {
            if !value.fits(column.column_type) {
                return Err(StorageError::invalid_argument(
                    column.name.clone(),
                    format!("expected {:?}, got {value:?}", column.column_type),
                ));
            }
        }

        let record = RecordId(self.next_record);
        // Build every entry first so a failure leaves the table untouched
        let entries = self
            .indexes
            .iter()
            .map(|(name, index)| Ok((name.clone(), index.entry_for(record, &row)?)))
            .collect::<Result<Vec<_>>>()?;

        let version = Version {
            created: sequence,
            deleted: None,
        };
        for (name, entry) in entries {
            if let Some(index) = self.indexes.get_mut(&name) {
                index.entries.insert(entry, version);
            }
        }

        self.next_record += 1;
        self.rows.insert(record, (row, version));
        trace!("table `{}`: inserted record {record} at {sequence}", self.name);

        Ok(record)
    }

    /// Marks a row and its index entries deleted as of `sequence`
    pub fn delete(&mut self, record: RecordId, sequence: u64) -> Result<()> {
        let (row, version) = match self.rows.get_mut(&record) {
            Some((row, version)) if version.deleted.is_none() => (row, version),
            _ => return Err(StorageError::RecordNotFound),
        };
        version.deleted = Some(sequence);

        for index in self.indexes.values_mut() {
            let entry = index.entry_for(record, row)?;
            if let Some(version) = index.entries.get_mut(&entry) {
                version.deleted = Some(sequence);
            }
        }

        trace!("table `{}`: deleted record {record} at {sequence}", self.name);
        Ok(())
    }

    pub fn nth(
        &self,
        index: &str,
        ctx: &ReadContext,
        range: &EntryRange,
        direction: Direction,
        n: u64,
    ) -> Result<Option<IndexEntry>> {
        let Ok(n) = usize::try_from(n) else {
            return Ok(None);
        };

        let mut visible = self.index(index)?.visible(ctx, range);
        let entry = match direction {
            Direction::Forward => visible.nth(n),
            Direction::Backward => visible.nth_back(n),
        };

        Ok(entry.cloned())
    }

    pub fn count(
        &self,
        index: &str,
        ctx: &ReadContext,
        range: &EntryRange,
        limit: Option<u64>,
    ) -> Result<u64> {
        let visible = self.index(index)?.visible(ctx, range);
        let count = match limit {
            Some(limit) => visible.take(usize::try_from(limit).unwrap_or(usize::MAX)).count(),
            None => visible.count(),
        };

        Ok(count as u64)
    }

    pub fn fetch(&self, ctx: &ReadContext, record: RecordId) -> Option<Vec<ColumnValue>> {
        self.rows
            .get(&record)
            .filter(|(_, version)| version.visible(ctx))
            .map(|(row, _)| row.clone())
    }

    fn index(&self, name: &str) -> Result<&TableIndex> {
        self.indexes.get(name).ok_or_else(|| {
            StorageError::invalid_argument(
                name,
                format!("no such index on table `{}`", self.name),
            )
        })
    }
}
