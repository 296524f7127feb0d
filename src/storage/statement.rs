use log::debug;

use super::{
    cursor::{Cursor, Move, RecordPosition},
    engine::{IndexHandle, MemoryEngine},
    error::Result,
    index::ReadContext,
    key::{ColumnValue, Key},
    range::{RangeFlags, RecordId, SeekOp},
};

/// A table and a cursor over one of its indexes that statements run against.
pub struct Session {
    engine: MemoryEngine,
    table: String,
    cursor: Cursor<IndexHandle>,
}

impl Session {
    pub fn open(engine: MemoryEngine, table: impl Into<String>, index: &str) -> Result<Self> {
        let table = table.into();
        let cursor = engine.open_cursor(&table, index)?;

        Ok(Self {
            engine,
            table,
            cursor,
        })
    }

    pub fn engine(&self) -> &MemoryEngine {
        &self.engine
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn cursor(&self) -> &Cursor<IndexHandle> {
        &self.cursor
    }

    /// Replaces the cursor with a new one over another index of the table
    pub fn switch_index(&mut self, index: &str) -> Result<()> {
        self.cursor = self.engine.open_cursor(&self.table, index)?;
        debug!("switched to index `{}.{index}`", self.table);
        Ok(())
    }

    /// Inserts a row given as whitespace separated values; the last column takes the rest of
    /// the line
    pub fn insert_line(&self, line: &str) -> Result<RecordId> {
        let columns = self.engine.columns(&self.table)?;
        let row = line
            .trim()
            .splitn(columns.len().max(1), char::is_whitespace)
            .map(str::trim)
            .zip(&columns)
            .map(|(value, column)| ColumnValue::parse(value, column.column_type))
            .collect::<Result<Vec<_>>>()?;

        self.engine.insert(&self.table, row)
    }

    /// Builds a key for the cursor's index from the value of its first column
    fn key(&self, value: &str) -> Result<Key> {
        let column = self.cursor.schema().columns()[0].column_type;
        let mut builder = self.cursor.make_key()?;
        builder.append(ColumnValue::parse(value, column)?)?;
        builder.finish()
    }

    /// The current record as `#id value...`
    fn row(&self, ctx: &ReadContext) -> Result<String> {
        row(&self.cursor, ctx)
    }
}

fn row(cursor: &Cursor<IndexHandle>, ctx: &ReadContext) -> Result<String> {
    let values = cursor.retrieve(ctx)?;
    let values: Vec<String> = values.iter().map(ToString::to_string).collect();
    Ok(format!("{} {}", cursor.record_id()?, values.join(" ")))
}

/// Statements understood by the REPL, each driving the session cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Inserts a row; values are given in column order
    Insert(String),
    /// Deletes the current record
    Delete,
    Seek(SeekOp, String),
    Move(Move),
    /// Like [Move](Statement::Move) but reports a boundary instead of failing
    TryMove(Move),
    BeforeFirst,
    AfterLast,
    Range(String, RangeFlags),
    Reset,
    Count(u64),
    Position,
    Goto(RecordPosition),
    Show,
    /// Sequentially lists the current record and everything after it within the range
    Scan,
}

impl TryFrom<&str> for Statement {
    type Error = String;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        let value = value.trim();
        let (command, rest) = value
            .split_once(char::is_whitespace)
            .unwrap_or((value, ""));
        let args: Vec<&str> = rest.split_whitespace().collect();

        let statement = match (command, args.as_slice()) {
            ("insert", [_, ..]) => Self::Insert(rest.trim().to_string()),
            ("delete", []) => Self::Delete,
            ("seek", [op, value]) => Self::Seek(SeekOp::try_from(*op)?, value.to_string()),
            ("move", [movement]) => Self::Move(Move::try_from(*movement)?),
            ("trymove", [movement]) => Self::TryMove(Move::try_from(*movement)?),
            ("before", []) => Self::BeforeFirst,
            ("after", []) => Self::AfterLast,
            ("range", [value, flags @ ..]) => {
                let mut parsed = RangeFlags::NONE;
                for flag in flags {
                    parsed = parsed
                        | match *flag {
                            "upper" => RangeFlags::UPPER_LIMIT,
                            "inclusive" => RangeFlags::INCLUSIVE,
                            other => return Err(format!("unknown range flag `{other}`")),
                        };
                }
                Self::Range(value.to_string(), parsed)
            }
            ("reset", []) => Self::Reset,
            ("count", []) => Self::Count(0),
            ("count", [max]) => Self::Count(parse_number(max)?),
            ("pos", []) => Self::Position,
            ("goto", [before, total]) => Self::Goto(RecordPosition {
                entries_before: parse_number(before)?,
                total: parse_number(total)?,
            }),
            ("show", []) => Self::Show,
            ("scan", []) => Self::Scan,
            (
                "insert" | "delete" | "seek" | "move" | "trymove" | "before" | "after" | "range"
                | "reset" | "count" | "pos" | "goto" | "show" | "scan",
                _,
            ) => return Err(format!("wrong arguments for `{command}`")),
            _ => return Err(format!("unknown statement `{value}`")),
        };

        Ok(statement)
    }
}

fn parse_number(value: &str) -> std::result::Result<u64, String> {
    value
        .parse()
        .map_err(|e| format!("`{value}` is not a count; {e}"))
}

impl Statement {
    /// Runs the statement against a fresh snapshot and returns the lines to print
    pub fn execute(&self, session: &mut Session) -> Result<Vec<String>> {
        let ctx = session.engine.snapshot();

        let output = match self {
            Self::Insert(line) => {
                let record = session.insert_line(line)?;
                vec![format!("inserted {record}")]
            }
            Self::Delete => {
                let record = session.cursor.record_id()?;
                session.engine.delete(&session.table, record)?;
                vec![format!("deleted {record}")]
            }
            Self::Seek(op, value) => {
                let key = session.key(value)?;
                session.cursor.seek(&ctx, key, *op)?;
                vec![session.row(&ctx)?]
            }
            Self::Move(movement) => {
                session.cursor.move_to(&ctx, *movement)?;
                vec![session.row(&ctx)?]
            }
            Self::TryMove(movement) => {
                if session.cursor.try_move(&ctx, *movement)? {
                    vec![session.row(&ctx)?]
                } else {
                    vec![session.cursor.position().to_string()]
                }
            }
            Self::BeforeFirst => {
                session.cursor.move_before_first()?;
                vec![session.cursor.position().to_string()]
            }
            Self::AfterLast => {
                session.cursor.move_after_last()?;
                vec![session.cursor.position().to_string()]
            }
            Self::Range(value, flags) => {
                let key = session.key(value)?;
                session.cursor.set_index_range(key, *flags)?;
                vec!["range set".to_string()]
            }
            Self::Reset => {
                session.cursor.reset_index_range()?;
                vec!["range removed".to_string()]
            }
            Self::Count(max) => vec![session.cursor.record_count(&ctx, *max)?.to_string()],
            Self::Position => {
                let position = session.cursor.get_position(&ctx)?;
                vec![format!("{} of {}", position.entries_before, position.total)]
            }
            Self::Goto(position) => {
                session.cursor.goto_position(&ctx, *position)?;
                vec![session.row(&ctx)?]
            }
            Self::Show => vec![session.row(&ctx)?],
            Self::Scan => {
                let mut scan = session.cursor.sequential()?;
                let mut rows = Vec::new();
                let mut more = scan.try_move(&ctx, Move::By(0))? || scan.try_move_next(&ctx)?;
                while more {
                    rows.push(row(&scan, &ctx)?);
                    more = scan.try_move_next(&ctx)?;
                }

                if rows.is_empty() {
                    rows.push("no records".to_string());
                }
                rows
            }
        };

        Ok(output)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::{
        error::StorageError,
        key::ColumnType,
        table::{IndexDef, TableDef},
    };

    fn session(records: i64) -> Session {
        let engine = MemoryEngine::new();
        engine
            .register_table(
                TableDef::new("table")
                    .column("key", ColumnType::Int)
                    .column("name", ColumnType::Text)
                    .index(IndexDef::new("primary", "+key\0\0"))
                    .index(IndexDef::new("name", "+name\0\0").case_insensitive()),
            )
            .unwrap();

        let session = Session::open(engine, "table", "primary").unwrap();
        for i in 0..records {
            session.insert_line(&format!("{i} record{i}")).unwrap();
        }
        session
    }

    fn run(session: &mut Session, input: &str) -> Result<Vec<String>> {
        Statement::try_from(input)
            .map_err(|e| StorageError::invalid_argument("statement", e))?
            .execute(session)
    }

    #[test]
    fn parses_statements() {
        assert_eq!(
            Statement::try_from("seek ge 5"),
            Ok(Statement::Seek(SeekOp::Ge, "5".to_string()))
        );
        assert_eq!(
            Statement::try_from("range 8 upper inclusive"),
            Ok(Statement::Range(
                "8".to_string(),
                RangeFlags::UPPER_LIMIT | RangeFlags::INCLUSIVE
            ))
        );
        assert_eq!(
            Statement::try_from("insert 1 hello world"),
            Ok(Statement::Insert("1 hello world".to_string()))
        );
        assert_eq!(Statement::try_from("move -2"), Ok(Statement::Move(Move::By(-2))));
        assert_eq!(Statement::try_from("count"), Ok(Statement::Count(0)));
        assert!(Statement::try_from("count many").is_err());
        assert!(Statement::try_from("range 8 sideways").is_err());
        assert!(Statement::try_from("seek 5").is_err());
        assert!(Statement::try_from("select").is_err());
    }

    #[test]
    fn insert_keeps_the_rest_of_the_line() {
        let mut session = session(0);
        run(&mut session, "insert 1 hello world").unwrap();

        assert_eq!(run(&mut session, "move first").unwrap(), vec!["#1 1 hello world"]);
    }

    #[test]
    fn drives_the_cursor() {
        let mut session = session(10);

        assert_eq!(run(&mut session, "seek eq 5").unwrap(), vec!["#6 5 record5"]);
        run(&mut session, "range 8 upper inclusive").unwrap();
        assert_eq!(run(&mut session, "count").unwrap(), vec!["4"]);
        assert_eq!(run(&mut session, "move next").unwrap(), vec!["#7 6 record6"]);
        assert_eq!(run(&mut session, "pos").unwrap(), vec!["1 of 4"]);

        assert_eq!(
            run(&mut session, "scan").unwrap(),
            vec!["#7 6 record6", "#8 7 record7", "#9 8 record8"]
        );
        assert_eq!(session.engine().sequential_scans(), 0);

        assert_eq!(run(&mut session, "trymove next").unwrap(), vec!["after last"]);
        assert_eq!(
            run(&mut session, "move next"),
            Err(StorageError::NoCurrentRecord)
        );

        run(&mut session, "reset").unwrap();
        assert_eq!(run(&mut session, "goto 1 1").unwrap(), vec!["#10 9 record9"]);
    }

    #[test]
    fn reports_failed_seeks() {
        let mut session = session(10);

        assert_eq!(
            run(&mut session, "seek eq 100"),
            Err(StorageError::RecordNotFound)
        );
        assert_eq!(run(&mut session, "show"), Err(StorageError::NoCurrentRecord));
        assert!(run(&mut session, "seek eq five").is_err());
    }

    #[test]
    fn deletes_the_current_record() {
        let mut session = session(3);

        run(&mut session, "seek eq 1").unwrap();
        assert_eq!(run(&mut session, "delete").unwrap(), vec!["deleted #2"]);
        assert_eq!(run(&mut session, "count").unwrap(), vec!["1"]);
        assert_eq!(run(&mut session, "scan").unwrap(), vec!["#3 2 record2"]);
        run(&mut session, "before").unwrap();
        assert_eq!(run(&mut session, "count").unwrap(), vec!["2"]);
    }

    #[test]
    fn switches_indexes() {
        let mut session = session(0);
        for line in ["1 bob", "2 Alice", "3 carol"] {
            session.insert_line(line).unwrap();
        }

        session.switch_index("name").unwrap();
        assert_eq!(session.engine().open_handles(), 1);
        assert_eq!(
            run(&mut session, "scan").unwrap(),
            vec!["#2 2 Alice", "#1 1 bob", "#3 3 carol"]
        );
        assert_eq!(run(&mut session, "seek eq ALICE").unwrap(), vec!["#2 2 Alice"]);
        assert!(session.switch_index("missing").is_err());
    }
}
