//! ArgMatches → CliAction conversion.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::ArgMatches;
use zredo_core::Version;
use zredo_durability::ReplayPolicy;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum CliAction {
    /// Print one segment
    Dump {
        file: PathBuf,
        max_version: Version,
    },
    /// Scan a log directory
    Verify { dir: PathBuf },
    /// Dry-run replay of a log directory
    Replay {
        dir: PathBuf,
        /// First archived sequence to include, or `None` for the active log only
        archives_from: Option<u64>,
        policy: ReplayPolicy,
    },
}

/// Parse `MAJOR.MINOR`.
pub fn parse_version(s: &str) -> anyhow::Result<Version> {
    let (major, minor) = s
        .split_once('.')
        .ok_or_else(|| anyhow!("expected MAJOR.MINOR, got {:?}", s))?;
    let major = major.parse().with_context(|| format!("bad major version in {:?}", s))?;
    let minor = minor.parse().with_context(|| format!("bad minor version in {:?}", s))?;
    Ok(Version::new(major, minor))
}

/// Convert parsed arguments into an action.
pub fn matches_to_action(matches: &ArgMatches) -> anyhow::Result<CliAction> {
    match matches.subcommand() {
        Some(("dump", sub)) => {
            let file = required_path(sub, "file")?;
            let max_version = match sub.get_one::<String>("max-version") {
                Some(v) => parse_version(v)?,
                None => Version::CURRENT,
            };
            Ok(CliAction::Dump { file, max_version })
        }
        Some(("verify", sub)) => Ok(CliAction::Verify {
            dir: required_path(sub, "dir")?,
        }),
        Some(("replay", sub)) => {
            let archives_from = if sub.get_flag("archives") {
                Some(sub.get_one::<u64>("from").copied().unwrap_or(0))
            } else {
                None
            };
            let policy = if sub.get_flag("skip-failures") {
                ReplayPolicy::skip_failures()
            } else {
                ReplayPolicy::halt()
            };
            Ok(CliAction::Replay {
                dir: required_path(sub, "dir")?,
                archives_from,
                policy,
            })
        }
        Some((other, _)) => bail!("unknown command: {}", other),
        None => bail!("no command given"),
    }
}

fn required_path(matches: &ArgMatches, name: &str) -> anyhow::Result<PathBuf> {
    matches
        .get_one::<String>(name)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("missing <{}>", name))
}
