//! Clap command tree definition.

use clap::{Arg, ArgAction, Command};

/// Build the complete CLI command tree.
pub fn build_cli() -> Command {
    Command::new("zredolog")
        .about("Inspect, verify and dry-run replay mailbox redo logs")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("json")
                .long("json")
                .help("JSON output mode")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log progress to stderr (repeat for more detail)")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand(build_dump())
        .subcommand(build_verify())
        .subcommand(build_replay())
}

fn build_dump() -> Command {
    Command::new("dump")
        .about("Print every record in a log segment")
        .arg(
            Arg::new("file")
                .required(true)
                .help("Segment file (redo.log or an archived redo-NNNNNN.log)"),
        )
        .arg(
            Arg::new("max-version")
                .long("max-version")
                .value_name("MAJOR.MINOR")
                .help("Reject records newer than this version"),
        )
}

fn build_verify() -> Command {
    Command::new("verify")
        .about("Check the active log and every archived segment for truncation or corruption")
        .arg(
            Arg::new("dir")
                .required(true)
                .help("Log directory (holds redo.log and archive/)"),
        )
}

fn build_replay() -> Command {
    Command::new("replay")
        .about("Replay committed transactions into an in-memory store and print statistics")
        .arg(Arg::new("dir").required(true).help("Log directory"))
        .arg(
            Arg::new("archives")
                .long("archives")
                .help("Replay archived segments before the active log")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("from")
                .long("from")
                .value_name("SEQUENCE")
                .value_parser(clap::value_parser!(u64))
                .requires("archives")
                .help("First archived sequence to replay"),
        )
        .arg(
            Arg::new("skip-failures")
                .long("skip-failures")
                .help("Continue past records the store rejects")
                .action(ArgAction::SetTrue),
        )
}
