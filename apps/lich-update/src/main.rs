#![warn(clippy::pedantic)]

//! # Lich5 Self-Update Manager (lich5-update)
//!
//! `lich5-update` keeps a Lich5 installation current. It announces new
//! releases, installs the newest stable release, a beta or the head of any
//! branch, refreshes individual scripts, library and data files, and takes and
//! restores snapshots of the core files so a bad update can be rolled back.
//!
//! ## Requests
//!
//! - `--announce` - Report whether a newer release exists (the default)
//! - `--update` - Install the newest stable release
//! - `--beta` - Join the beta and install the newest beta
//! - `--branch=<NAME>` - Install the head of a branch
//! - `--snapshot` - Snapshot the core files
//! - `--revert` - Restore the newest snapshot
//! - `--script=`, `--library=`, `--data=` - Update one file
//!
//! Requests are matched case-insensitively. Anything else is reported as
//! unknown and ignored.
//!
//! ## Examples
//!
//! ```bash
//! lich5-update --announce
//! lich5-update --update
//! LICH_HOME=/opt/lich5 lich5-update --revert
//! lich5-update --beta --library=version.rb
//! ```

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lich_update::commands::{RunOptions, Updater};
use lich_update::config::UpdaterConfig;
use lich_update::engine::{HttpTransport, InstallPaths};
use lich_update::errors::UpdateError;
use lich_update::report::{ConsoleReporter, StdinPrompt};
use lich_update::request::Request;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "LICH_UPDATE_LOG";

/// Lich5 self-update manager.
#[derive(Parser)]
#[command(
    name = "lich5-update",
    version,
    about = "Update, snapshot and roll back a Lich5 installation",
    disable_help_flag = true,
    after_help = "\
Run 'lich5-update --help' for the list of requests.

ENVIRONMENT VARIABLES:
    LICH_HOME               Lich5 installation root
    LICH_GAME               Game code for core script refresh (GS3, GSX, DR, ...)
    LICH_BETA_REF           Pin the beta channel to a tag or branch
    LICH_UPDATE_API         Release metadata API base URL
    LICH_UPDATE_LOG         Log filter, e.g. 'debug' (default: warn)"
)]
pub struct Cli {
    /// Lich5 installation root.
    #[arg(long, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Updater configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Game code deciding which core scripts are refreshed.
    #[arg(long, value_name = "CODE", env = "LICH_GAME")]
    pub game: Option<String>,

    /// Accept the beta confirmation without asking.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub yes: bool,

    /// Log diagnostics to stderr.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// The request, e.g. `--update` or `--branch=pre/beta/5.15.0`.
    #[arg(
        value_name = "REQUEST",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub request: Vec<String>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        let exit_code = handle_error(&e);
        std::process::exit(exit_code);
    }
}

/// Prints the error and returns the exit code for its kind.
///
/// `2` when another process holds the installation, `3` when an update
/// stopped part-way, `1` otherwise.
fn handle_error(e: &anyhow::Error) -> i32 {
    eprintln!("Error: {e:?}");
    e.downcast_ref::<UpdateError>()
        .map_or(1, UpdateError::exit_code)
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("lich_update={default_level}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

/// Options that take no value.
const SWITCHES: [&str; 2] = ["--yes", "--verbose"];

/// Options that take a value, as `--name value` or `--name=value`.
const VALUED: [&str; 3] = ["--home", "--config", "--game"];

/// Where a command-line token belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// A complete option token.
    Flag,
    /// An option whose value is the next token.
    FlagWithValue,
    /// Part of the request.
    Request,
}

fn slot(arg: &OsStr) -> Slot {
    let Some(text) = arg.to_str() else {
        return Slot::Request;
    };
    if SWITCHES.contains(&text) {
        return Slot::Flag;
    }
    if VALUED.contains(&text) {
        return Slot::FlagWithValue;
    }
    match text.split_once('=') {
        Some((name, _)) if VALUED.contains(&name) => Slot::Flag,
        _ => Slot::Request,
    }
}

/// Moves options written after the request in front of it, so
/// `lich5-update --update --verbose` behaves like `lich5-update --verbose --update`.
fn hoist_options<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    let mut args = args.into_iter();
    let mut options: Vec<OsString> = args.next().into_iter().collect();
    let mut request = Vec::new();
    while let Some(arg) = args.next() {
        match slot(&arg) {
            Slot::Flag => options.push(arg),
            Slot::FlagWithValue => {
                options.push(arg);
                options.extend(args.next());
            }
            Slot::Request => request.push(arg),
        }
    }
    options.extend(request);
    options
}

async fn run() -> Result<()> {
    let cli = Cli::parse_from(hoist_options(std::env::args_os()));
    init_logging(cli.verbose);

    let request = Request::parse(&cli.request);

    let defaults = UpdaterConfig::default();
    let root = InstallPaths::resolve_root(cli.home, &defaults.layout)?;
    let default_paths = InstallPaths::with_root(root.clone(), &defaults.layout);
    let mut config =
        UpdaterConfig::load_or_default(cli.config.as_deref(), &default_paths.config_file())?;
    config.remote.apply_env_overrides();

    let beta_override = std::env::var(&config.channels.beta_override_env)
        .ok()
        .filter(|v| !v.trim().is_empty());
    let options = RunOptions {
        game: cli.game.filter(|g| !g.trim().is_empty()),
        beta_override,
    };

    let paths = InstallPaths::with_root(root, &config.layout);
    let transport = Arc::new(HttpTransport::new(&config.remote)?);
    let updater = Updater::new(
        config,
        paths,
        transport,
        Arc::new(ConsoleReporter),
        Arc::new(StdinPrompt {
            assume_yes: cli.yes,
        }),
        options,
    );
    updater.dispatch(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hoisted(args: &[&str]) -> Vec<String> {
        hoist_options(args.iter().map(OsString::from))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn options_after_the_request_move_in_front() {
        assert_eq!(
            hoisted(&["lich5-update", "--update", "--verbose", "--home", "/opt/lich5"]),
            vec!["lich5-update", "--verbose", "--home", "/opt/lich5", "--update"]
        );
        assert_eq!(
            hoisted(&["lich5-update", "--beta", "--library=version.rb", "--game=DR", "--yes"]),
            vec!["lich5-update", "--game=DR", "--yes", "--beta", "--library=version.rb"]
        );
    }

    #[test]
    fn request_tokens_keep_their_order() {
        assert_eq!(
            hoisted(&["lich5-update", "--yes", "--branch", "pre/beta/5.15.0"]),
            vec!["lich5-update", "--yes", "--branch", "pre/beta/5.15.0"]
        );
        assert_eq!(hoisted(&["lich5-update"]), vec!["lich5-update"]);
    }

    #[test]
    fn hoisted_options_reach_the_parser() {
        let cli = Cli::parse_from(hoist_options(
            ["lich5-update", "--snapshot", "--verbose", "--game", "GS3"].map(OsString::from),
        ));
        assert!(cli.verbose);
        assert_eq!(cli.game.as_deref(), Some("GS3"));
        assert_eq!(cli.request, vec!["--snapshot"]);
    }
}
