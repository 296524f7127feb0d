pub mod commands;

pub use commands::{seed, MetaCommand};
use log::{info, warn};
use std::{
    error::Error,
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use crate::storage::{
    ColumnType, IndexDef, MemoryEngine, Result as StorageResult, Session, Statement, TableDef,
};

/// Name of the table every REPL session works on
pub const SAMPLE_TABLE: &str = "table";

/// Creates an engine holding the sample table `table(key Int, name Text)`, indexed by `key`
/// (`primary`) and case-insensitively by `name` (`name`)
pub fn sample_engine() -> StorageResult<MemoryEngine> {
    let engine = MemoryEngine::new();
    engine.register_table(
        TableDef::new(SAMPLE_TABLE)
            .column("key", ColumnType::Int)
            .column("name", ColumnType::Text)
            .index(IndexDef::new("primary", "+key\0\0"))
            .index(IndexDef::new("name", "+name\0\0").case_insensitive()),
    )?;

    Ok(engine)
}

/// Inserts every non-empty line of `path` as a row
fn load(session: &Session, path: &Path) -> Result<(), Box<dyn Error>> {
    let contents = std::fs::read_to_string(path)?;
    let mut loaded = 0;
    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        session.insert_line(line)?;
        loaded += 1;
    }

    info!("loaded {loaded} records from {}", path.display());
    Ok(())
}

/// Starts a cursor REPL session
pub fn start_repl(name: String, file: Option<PathBuf>, records: u64) -> Result<(), Box<dyn Error>> {
    let mut session = Session::open(sample_engine()?, SAMPLE_TABLE, "primary")?;
    if let Some(path) = file {
        load(&session, &path)?;
    }
    seed(&session, records)?;

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("{name} > ");
        stdout.flush()?;

        let mut input: String = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('.') {
            match MetaCommand::try_from(input) {
                Ok(MetaCommand::Exit) => break,
                Ok(command) => {
                    if let Err(e) = command.execute(&mut session) {
                        warn!("`{input}` failed: {e}");
                        println!("error: {e}");
                    }
                }
                Err(e) => println!("error: {e}"),
            }
            continue;
        }

        match Statement::try_from(input) {
            Ok(statement) => match statement.execute(&mut session) {
                Ok(lines) => {
                    for line in lines {
                        println!("{line}");
                    }
                }
                Err(e) => {
                    warn!("`{input}` failed: {e}");
                    println!("error: {e}");
                }
            },
            Err(e) => println!("error: {e}"),
        }
    }

    Ok(())
}
