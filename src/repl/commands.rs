use std::error::Error;

use crate::storage::{SortOrder, Session};

/// Commands that are not part of the cursor statements.
///
/// These commands mostly control what the REPL session does
#[derive(Debug, Clone, PartialEq)]
pub enum MetaCommand {
    /// Close the current REPL session
    Exit,
    /// Prints out the table and index layout
    Layout,
    /// Reopens the cursor over another index
    Index(String),
    /// Inserts generated rows
    Seed(u64),
}

impl MetaCommand {
    pub fn execute(&self, session: &mut Session) -> Result<(), Box<dyn Error>> {
        match self {
            Self::Exit => Ok(()),
            Self::Layout => {
                let engine = session.engine();
                println!("=== Table `{}` ===", session.table());
                for column in engine.columns(session.table())? {
                    println!("Column {}: {:?}", column.name, column.column_type);
                }
                println!();

                for schema in engine.indexes(session.table())? {
                    let key: Vec<String> = schema
                        .columns()
                        .iter()
                        .map(|c| match c.order {
                            SortOrder::Ascending => format!("+{}", c.name),
                            SortOrder::Descending => format!("-{}", c.name),
                        })
                        .collect();

                    println!("=== Index `{}` ===", schema.name());
                    println!("Key: {}", key.join(" "));
                    println!("Case sensitive: {}", schema.case_sensitive());
                    println!();
                }

                println!("Current index: {}", session.cursor().schema().name());
                println!("Open handles: {}", engine.open_handles());
                Ok(())
            }
            Self::Index(name) => {
                session.switch_index(name)?;
                println!("using index `{name}`");
                Ok(())
            }
            Self::Seed(count) => {
                seed(session, *count)?;
                println!("inserted {count} records");
                Ok(())
            }
        }
    }
}

/// Inserts rows `0..count`, each named `record{i}`
pub fn seed(session: &Session, count: u64) -> crate::storage::Result<()> {
    for i in 0..count {
        session.insert_line(&format!("{i} record{i}"))?;
    }
    Ok(())
}

impl TryFrom<&str> for MetaCommand {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut words = value.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some(".exit"), None, _) => Ok(MetaCommand::Exit),
            (Some(".layout"), None, _) => Ok(MetaCommand::Layout),
            (Some(".index"), Some(name), None) => Ok(MetaCommand::Index(name.to_string())),
            (Some(".seed"), Some(count), None) => count
                .parse()
                .map(MetaCommand::Seed)
                .map_err(|e| format!("`{count}` is not a count; {e}")),
            _ => Err(format!("unknown command `{value}`.")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_meta_commands() {
        assert_eq!(MetaCommand::try_from(".exit"), Ok(MetaCommand::Exit));
        assert_eq!(
            MetaCommand::try_from(".index name"),
            Ok(MetaCommand::Index("name".to_string()))
        );
        assert_eq!(MetaCommand::try_from(".seed 20"), Ok(MetaCommand::Seed(20)));
        assert!(MetaCommand::try_from(".seed lots").is_err());
        assert!(MetaCommand::try_from(".index").is_err());
        assert!(MetaCommand::try_from(".tables").is_err());
    }
}
