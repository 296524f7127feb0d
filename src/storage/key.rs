//! Index keys.
//!
//! A [Key](Key) is an ordered tuple of column values serialized into bytes that sort the same way
//! the index does, so every comparison the cursor makes is a plain byte comparison.
//!
//! Every column value is encoded as a self-delimiting fragment:
//!
//! - `0x01`: null
//! - `0x02` / `0x03`: false / true
//! - `0x10` + 8 bytes: integer, big-endian with the sign bit flipped
//! - `0x20` / `0x21` + escaped bytes + `0x00 0x00`: text / binary; `0x00` is escaped as `0x00 0xFF`
//!
//! Descending columns invert every byte of their fragment. Because fragments never overlap, a key
//! made from the leading columns of an index is a byte prefix of every full key it matches.
use std::{fmt::Display, sync::Arc};

use super::error::{Result, StorageError};

mod type_prefix {
    pub const NULL: u8 = 0x01;
    pub const FALSE: u8 = 0x02;
    pub const TRUE: u8 = 0x03;
    pub const INT: u8 = 0x10;
    pub const TEXT: u8 = 0x20;
    pub const BINARY: u8 = 0x21;
}

const ESCAPE: u8 = 0xFF;
const TERMINATOR: [u8; 2] = [0x00, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int,
    Text,
    Binary,
}

impl TryFrom<&str> for ColumnType {
    type Error = StorageError;

    fn try_from(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "bool" | "bit" => Ok(Self::Bool),
            "int" | "long" => Ok(Self::Int),
            "text" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            other => Err(StorageError::invalid_argument(
                "column type",
                format!("unknown type `{other}`"),
            )),
        }
    }
}

/// A typed column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Binary(Vec<u8>),
}

impl ColumnValue {
    /// Returns whether the value can be stored in a column of type `column_type`
    ///
    /// Nulls fit every column.
    pub fn fits(&self, column_type: ColumnType) -> bool {
        matches!(
            (self, column_type),
            (Self::Null, _)
                | (Self::Bool(_), ColumnType::Bool)
                | (Self::Int(_), ColumnType::Int)
                | (Self::Text(_), ColumnType::Text)
                | (Self::Binary(_), ColumnType::Binary)
        )
    }

    /// Parses a textual value into the given column type
    pub fn parse(input: &str, column_type: ColumnType) -> Result<Self> {
        if input.eq_ignore_ascii_case("null") {
            return Ok(Self::Null);
        }

        let invalid = |reason: String| StorageError::invalid_argument("value", reason);
        match column_type {
            ColumnType::Bool => input
                .parse::<bool>()
                .map(Self::Bool)
                .map_err(|e| invalid(format!("`{input}` is not a bool; {e}"))),
            ColumnType::Int => input
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|e| invalid(format!("`{input}` is not an integer; {e}"))),
            ColumnType::Text => Ok(Self::Text(input.to_string())),
            ColumnType::Binary => Ok(Self::Binary(input.as_bytes().to_vec())),
        }
    }
}

impl Display for ColumnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Binary(v) => {
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for ColumnValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for ColumnValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Parses an index key description such as `"+long\0-name\0\0"`.
///
/// `+` marks an ascending column, `-` a descending one; a bare name is ascending. Columns are
/// separated by NUL and the description ends with a double NUL, which may be omitted.
pub fn parse_key_description(description: &str) -> Result<Vec<(String, SortOrder)>> {
    let trimmed = description.trim_end_matches('\0');
    if trimmed.is_empty() {
        return Err(StorageError::invalid_argument(
            "key description",
            "no columns",
        ));
    }

    trimmed
        .split('\0')
        .map(|part| {
            let (order, name) = match part.as_bytes().first() {
                Some(b'+') => (SortOrder::Ascending, &part[1..]),
                Some(b'-') => (SortOrder::Descending, &part[1..]),
                _ => (SortOrder::Ascending, part),
            };

            if name.is_empty() {
                Err(StorageError::invalid_argument(
                    "key description",
                    format!("empty column name in `{}`", description.escape_default()),
                ))
            } else {
                Ok((name.to_string(), order))
            }
        })
        .collect()
}

/// A column that takes part in an index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub order: SortOrder,
}

/// Describes how the keys of one index are built and ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    table: String,
    name: String,
    columns: Vec<KeyColumn>,
    case_sensitive: bool,
}

impl IndexSchema {
    pub fn new(
        table: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<KeyColumn>,
        case_sensitive: bool,
    ) -> Result<Self> {
        if columns.is_empty() {
            return Err(StorageError::invalid_argument(
                "index columns",
                "an index needs at least one column",
            ));
        }

        Ok(Self {
            table: table.into(),
            name: name.into(),
            columns,
            case_sensitive,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Encodes a complete key from values given in index column order
    pub fn encode(&self, values: &[ColumnValue]) -> Result<EncodedKey> {
        if values.len() != self.columns.len() {
            return Err(StorageError::invalid_argument(
                "key",
                format!(
                    "index `{}` has {} columns, got {}",
                    self.name,
                    self.columns.len(),
                    values.len()
                ),
            ));
        }

        let mut buf = Vec::new();
        for (column, value) in self.columns.iter().zip(values) {
            self.encode_fragment(column, value, &mut buf)?;
        }

        Ok(EncodedKey(buf))
    }

    fn encode_fragment(
        &self,
        column: &KeyColumn,
        value: &ColumnValue,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        if !value.fits(column.column_type) {
            return Err(StorageError::invalid_argument(
                column.name.clone(),
                format!("expected {:?}, got {value:?}", column.column_type),
            ));
        }

        let start = buf.len();
        match value {
            ColumnValue::Null => buf.push(type_prefix::NULL),
            ColumnValue::Bool(false) => buf.push(type_prefix::FALSE),
            ColumnValue::Bool(true) => buf.push(type_prefix::TRUE),
            ColumnValue::Int(v) => encode_int_to(*v, buf),
            ColumnValue::Text(v) if self.case_sensitive => {
                encode_bytes_to(type_prefix::TEXT, v.as_bytes(), buf)
            }
            ColumnValue::Text(v) => {
                encode_bytes_to(type_prefix::TEXT, v.to_lowercase().as_bytes(), buf)
            }
            ColumnValue::Binary(v) => encode_bytes_to(type_prefix::BINARY, v, buf),
        }

        if column.order == SortOrder::Descending {
            buf[start..].iter_mut().for_each(|b| *b = !*b);
        }

        Ok(())
    }
}

fn encode_int_to(value: i64, buf: &mut Vec<u8>) {
    buf.push(type_prefix::INT);
    buf.extend_from_slice(&((value as u64) ^ (1 << 63)).to_be_bytes());
}

fn encode_bytes_to(prefix: u8, bytes: &[u8], buf: &mut Vec<u8>) {
    buf.push(prefix);
    for &b in bytes {
        buf.push(b);
        if b == 0x00 {
            buf.push(ESCAPE);
        }
    }
    buf.extend_from_slice(&TERMINATOR);
}

/// Byte-comparable key as stored in an index entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncodedKey(Vec<u8>);

impl EncodedKey {
    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &EncodedKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Smallest key that sorts after every key starting with `self`.
    ///
    /// Returns `None` when no such key exists, i.e. the prefix consists solely of `0xFF` bytes.
    pub fn prefix_end(&self) -> Option<EncodedKey> {
        let mut bytes = self.0.clone();
        while let Some(last) = bytes.pop() {
            if last < u8::MAX {
                bytes.push(last + 1);
                return Some(EncodedKey(bytes));
            }
        }

        None
    }
}

/// A finished search key, bound to the index it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    table: String,
    index: String,
    columns: usize,
    encoded: EncodedKey,
}

impl Key {
    pub fn encoded(&self) -> &EncodedKey {
        &self.encoded
    }

    /// Number of column values in the key
    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn is_for(&self, schema: &IndexSchema) -> bool {
        self.table == schema.table && self.index == schema.name
    }
}

/// Builds a [Key](Key) one column value at a time.
pub struct KeyBuilder {
    schema: Arc<IndexSchema>,
    buf: Vec<u8>,
    columns: usize,
}

impl KeyBuilder {
    pub fn new(schema: Arc<IndexSchema>) -> Self {
        Self {
            schema,
            buf: Vec::new(),
            columns: 0,
        }
    }

    /// Appends the value of the next index column
    pub fn append(&mut self, value: impl Into<ColumnValue>) -> Result<&mut Self> {
        let value = value.into();
        let column = self.schema.columns.get(self.columns).ok_or_else(|| {
            StorageError::invalid_argument(
                "key",
                format!(
                    "index `{}` has only {} columns",
                    self.schema.name,
                    self.schema.columns.len()
                ),
            )
        })?;

        self.schema.encode_fragment(column, &value, &mut self.buf)?;
        self.columns += 1;

        Ok(self)
    }

    /// Finalizes the key. At least one column value must have been appended.
    pub fn finish(self) -> Result<Key> {
        if self.columns == 0 {
            return Err(StorageError::invalid_argument("key", "key has no columns"));
        }

        Ok(Key {
            table: self.schema.table.clone(),
            index: self.schema.name.clone(),
            columns: self.columns,
            encoded: EncodedKey(self.buf),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn schema(columns: &[(&str, ColumnType, SortOrder)], case_sensitive: bool) -> Arc<IndexSchema> {
        let columns = columns
            .iter()
            .map(|(name, column_type, order)| KeyColumn {
                name: name.to_string(),
                column_type: *column_type,
                order: *order,
            })
            .collect();
        Arc::new(IndexSchema::new("table", "index", columns, case_sensitive).unwrap())
    }

    fn key(schema: &Arc<IndexSchema>, values: Vec<ColumnValue>) -> EncodedKey {
        let mut builder = KeyBuilder::new(Arc::clone(schema));
        for value in values {
            builder.append(value).unwrap();
        }
        builder.finish().unwrap().encoded().clone()
    }

    #[test]
    fn integers_sort_numerically() {
        let schema = schema(&[("long", ColumnType::Int, SortOrder::Ascending)], true);
        let values = vec![i64::MIN, -100, -1, 0, 1, 7, 100, i64::MAX];
        let keys: Vec<EncodedKey> = values
            .iter()
            .map(|v| key(&schema, vec![ColumnValue::Int(*v)]))
            .collect();

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let null = key(&schema, vec![ColumnValue::Null]);
        assert!(keys.iter().all(|k| null < *k));
    }

    #[test]
    fn text_sorts_lexicographically_with_embedded_nulls() {
        let schema = schema(&[("name", ColumnType::Text, SortOrder::Ascending)], true);
        let words = ["", "a", "a\0", "a\u{1}", "ab", "b"];
        let keys: Vec<EncodedKey> = words.iter().map(|w| key(&schema, vec![(*w).into()])).collect();

        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn descending_columns_reverse_order() {
        let schema = schema(
            &[
                ("double", ColumnType::Int, SortOrder::Ascending),
                ("ascii", ColumnType::Text, SortOrder::Descending),
            ],
            true,
        );

        let a = key(&schema, vec![1.into(), "apple".into()]);
        let b = key(&schema, vec![1.into(), "banana".into()]);
        let c = key(&schema, vec![2.into(), "apple".into()]);

        assert!(b < a);
        assert!(a < c);
    }

    #[test]
    fn case_insensitive_indexes_fold_text() {
        let insensitive = schema(&[("name", ColumnType::Text, SortOrder::Ascending)], false);
        assert_eq!(
            key(&insensitive, vec!["Alpha".into()]),
            key(&insensitive, vec!["alpha".into()])
        );

        let sensitive = schema(&[("name", ColumnType::Text, SortOrder::Ascending)], true);
        assert_ne!(
            key(&sensitive, vec!["Alpha".into()]),
            key(&sensitive, vec!["alpha".into()])
        );
    }

    #[test]
    fn partial_key_is_prefix_of_full_key() {
        let schema = schema(
            &[
                ("a", ColumnType::Text, SortOrder::Descending),
                ("b", ColumnType::Int, SortOrder::Ascending),
            ],
            true,
        );

        let partial = key(&schema, vec!["x".into()]);
        let full = key(&schema, vec!["x".into(), 3.into()]);
        let other = key(&schema, vec!["xy".into(), 3.into()]);

        assert!(full.starts_with(&partial));
        assert!(!other.starts_with(&partial));

        let end = partial.prefix_end().unwrap();
        assert!(full < end);
        assert!(partial < end);
    }

    #[test]
    fn prefix_end_carries_over_max_bytes() {
        assert_eq!(
            EncodedKey(vec![0x01, 0xFF, 0xFF]).prefix_end(),
            Some(EncodedKey(vec![0x02]))
        );
        assert_eq!(EncodedKey(vec![0xFF, 0xFF]).prefix_end(), None);
    }

    #[test]
    fn builder_rejects_bad_input() {
        let schema = schema(&[("long", ColumnType::Int, SortOrder::Ascending)], true);

        let mut builder = KeyBuilder::new(Arc::clone(&schema));
        assert!(builder.append("text").is_err());

        let mut builder = KeyBuilder::new(Arc::clone(&schema));
        builder.append(1).unwrap();
        assert!(builder.append(2).is_err());

        let builder = KeyBuilder::new(schema);
        assert!(builder.finish().is_err());
    }

    #[test]
    fn parses_key_descriptions() {
        assert_eq!(
            parse_key_description("+double\0-ascii\0\0").unwrap(),
            vec![
                ("double".to_string(), SortOrder::Ascending),
                ("ascii".to_string(), SortOrder::Descending)
            ]
        );
        assert_eq!(
            parse_key_description("key").unwrap(),
            vec![("key".to_string(), SortOrder::Ascending)]
        );
        assert!(parse_key_description("\0\0").is_err());
        assert!(parse_key_description("+a\0-\0\0").is_err());
    }

    #[test]
    fn parses_values_by_type() {
        assert_eq!(ColumnValue::parse("42", ColumnType::Int).unwrap(), ColumnValue::Int(42));
        assert_eq!(ColumnValue::parse("NULL", ColumnType::Text).unwrap(), ColumnValue::Null);
        assert!(ColumnValue::parse("forty", ColumnType::Int).is_err());
    }
}
