use std::path::PathBuf;

use clap::Parser;
use isam_cursor::start_repl;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Optional name shown in the prompt
    name: Option<String>,

    /// Optionally, loads rows from a file; one `key name` per line
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Inserts this many generated rows before the session starts
    #[arg(short, long, value_name = "N", default_value_t = 0)]
    seed: u64,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let name = cli.name.unwrap_or("db".into());

    if let Err(e) = start_repl(name, cli.file, cli.seed) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
