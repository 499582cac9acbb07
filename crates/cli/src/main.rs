//! zredolog: inspect mailbox redo logs.
//!
//! - `zredolog dump <file>`: print every record of one segment
//! - `zredolog verify <dir>`: check frames and records of every segment
//! - `zredolog replay <dir>`: dry-run replay into an in-memory store
//!
//! Reports go to stdout; `-v` logging goes to stderr.

mod commands;
mod format;
mod parse;
mod run;

use std::process;

use tracing_subscriber::EnvFilter;

use commands::build_cli;
use format::OutputMode;
use parse::matches_to_action;

fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let matches = build_cli().get_matches();
    init_logging(matches.get_count("verbose"));

    let mode = if matches.get_flag("json") {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let action = match matches_to_action(&matches) {
        Ok(action) => action,
        Err(e) => {
            eprintln!("{:#}", e);
            process::exit(2);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match run::run(action, mode, &mut out) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
