//! Request parsing.
//!
//! The updater takes one primary action per invocation, written the way Lich
//! users type it in game: `--update`, `-a`, `--branch=pre/beta/5.15.0`,
//! `--beta --script=go2.lic`. [`Request::parse`] maps any token list onto the
//! closed set of [`Request`] variants; it never fails, unknown input becomes
//! [`Request::Unknown`].

use crate::engine::files::FileKind;

/// One operator request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Report whether a newer release exists.
    Announce,
    /// Update to the newest stable release.
    Update,
    /// Install a branch head.
    Branch(String),
    /// Join the beta, or update one file from the beta channel.
    Beta(Option<(FileKind, String)>),
    /// Take a snapshot only.
    Snapshot,
    /// Restore the newest snapshot.
    Revert,
    /// Update one file from its stable location.
    UpdateFile(FileKind, String),
    /// Print usage.
    Help,
    /// Anything else, verbatim.
    Unknown(String),
}

impl Request {
    /// Parses request tokens. No tokens means [`Request::Announce`].
    #[must_use]
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Self {
        let Some(first) = tokens.first() else {
            return Self::Announce;
        };
        let first = first.as_ref().trim();
        let lower = first.to_ascii_lowercase();

        match lower.as_str() {
            "--announce" | "-a" => return Self::Announce,
            "--update" | "-u" => return Self::Update,
            "--snapshot" | "-s" => return Self::Snapshot,
            "--revert" | "-r" => return Self::Revert,
            "--help" | "-h" => return Self::Help,
            "--beta" | "--test" => {
                let file = tokens.get(1).and_then(|t| parse_file_flag(t.as_ref()));
                return Self::Beta(file);
            }
            "--branch" => {
                let name = tokens.get(1).map(|t| t.as_ref().to_string()).unwrap_or_default();
                return Self::Branch(name);
            }
            _ => {}
        }

        if let Some(name) = flag_value(first, "--branch=") {
            return Self::Branch(name.to_string());
        }
        if let Some((kind, name)) = parse_file_flag(first) {
            return Self::UpdateFile(kind, name);
        }

        let raw: Vec<&str> = tokens.iter().map(|t| t.as_ref()).collect();
        Self::Unknown(raw.join(" "))
    }

    /// Whether the request mutates the installation and needs the lock.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Update
                | Self::Branch(_)
                | Self::Beta(_)
                | Self::Snapshot
                | Self::Revert
                | Self::UpdateFile(..)
        )
    }
}

/// `--script=`, `--library=` or `--data=` with its value.
fn parse_file_flag(token: &str) -> Option<(FileKind, String)> {
    let token = token.trim();
    let rest = token.strip_prefix("--")?;
    let (kind, name) = rest.split_once('=')?;
    Some((FileKind::parse(kind)?, name.trim().to_string()))
}

/// Value of a `--flag=value` token, matching the flag case-insensitively.
fn flag_value<'t>(token: &'t str, flag: &str) -> Option<&'t str> {
    let head = token.get(..flag.len())?;
    head.eq_ignore_ascii_case(flag).then(|| &token[flag.len()..])
}

/// Usage text printed for `--help`.
pub const HELP: &str = "\
Usage: lich5-update [OPTIONS] [REQUEST]

Requests:
    --help                   Display this message
    --announce               Get summary of changes for next version
    --update                 Update all changes for next version
    --branch=<NAME>          Install Lich5 from the head of a repository branch
    --beta                   Join the beta test and install the newest beta
    --snapshot               Grab current snapshot of Lich5 ecosystem and put in backup
    --revert                 Roll the Lich5 ecosystem back to the most recent snapshot
    --script=<NAME>          Update an individual script file found in Lich-5
    --library=<NAME>         Update an individual library file found in Lich-5
    --data=<NAME>            Update an individual data file found in Lich-5
    --beta --library=<NAME>  Update an individual library file from the beta channel

Options (accepted before or after the request):
    --home <DIR>             Lich5 installation root (default: $LICH_HOME, the current
                             directory if it holds lich.rbw, else ~/lich5)
    --config <FILE>          Updater configuration (default: data/lich-update.toml)
    --game <CODE>            Game code for core script refresh, e.g. GS3 or DR ($LICH_GAME)
    --yes                    Accept the beta confirmation without asking
    --verbose                Log diagnostics to stderr ($LICH_UPDATE_LOG)

Examples:
    lich5-update --announce          Check to see if a new version is available
    lich5-update --update            Update the Lich5 ecosystem to the current release
    lich5-update --revert            Roll the Lich5 ecosystem back to latest snapshot
    lich5-update --script=go2.lic    Refresh go2.lic from the scripts repository

*NOTE* Running --snapshot at every login creates a new snapshot folder each
time. NOT recommended.";

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(tokens: &[&str]) -> Request {
        Request::parse(tokens)
    }

    #[test]
    fn long_and_short_flags() {
        assert_eq!(parse(&["--announce"]), Request::Announce);
        assert_eq!(parse(&["-a"]), Request::Announce);
        assert_eq!(parse(&["-u"]), Request::Update);
        assert_eq!(parse(&["-s"]), Request::Snapshot);
        assert_eq!(parse(&["-r"]), Request::Revert);
        assert_eq!(parse(&["-h"]), Request::Help);
    }

    #[test]
    fn flags_are_case_insensitive() {
        assert_eq!(parse(&["--UPDATE"]), Request::Update);
        assert_eq!(parse(&["--Revert"]), Request::Revert);
        assert_eq!(
            parse(&["--Script=Go2.lic"]),
            Request::UpdateFile(FileKind::Script, "Go2.lic".to_string())
        );
    }

    #[test]
    fn empty_request_announces() {
        assert_eq!(Request::parse::<&str>(&[]), Request::Announce);
    }

    #[test]
    fn branch_forms() {
        assert_eq!(
            parse(&["--branch=pre/beta/5.15.0"]),
            Request::Branch("pre/beta/5.15.0".to_string())
        );
        assert_eq!(parse(&["--BRANCH=Feature"]), Request::Branch("Feature".to_string()));
        assert_eq!(parse(&["--branch", "main"]), Request::Branch("main".to_string()));
        assert_eq!(parse(&["--branch="]), Request::Branch(String::new()));
        assert_eq!(parse(&["--branch"]), Request::Branch(String::new()));
    }

    #[test]
    fn beta_with_and_without_file() {
        assert_eq!(parse(&["--beta"]), Request::Beta(None));
        assert_eq!(parse(&["--test"]), Request::Beta(None));
        assert_eq!(
            parse(&["--beta", "--library=version.rb"]),
            Request::Beta(Some((FileKind::Library, "version.rb".to_string())))
        );
    }

    #[test]
    fn file_flags() {
        assert_eq!(
            parse(&["--data=effect-list.xml"]),
            Request::UpdateFile(FileKind::Data, "effect-list.xml".to_string())
        );
        assert_eq!(
            parse(&["--library=version.rb"]),
            Request::UpdateFile(FileKind::Library, "version.rb".to_string())
        );
    }

    #[test]
    fn anything_else_is_unknown() {
        assert_eq!(parse(&["--frobnicate"]), Request::Unknown("--frobnicate".to_string()));
        assert_eq!(parse(&["--refresh", "now"]), Request::Unknown("--refresh now".to_string()));
        assert_eq!(parse(&["--sample=x"]), Request::Unknown("--sample=x".to_string()));
    }

    #[test]
    fn only_state_changing_requests_lock() {
        assert!(Request::Update.is_mutating());
        assert!(Request::Revert.is_mutating());
        assert!(!Request::Announce.is_mutating());
        assert!(!Request::Help.is_mutating());
        assert!(!Request::Unknown(String::new()).is_mutating());
    }
}
