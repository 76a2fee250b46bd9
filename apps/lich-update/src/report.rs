//! Operator-facing output and confirmation.
//!
//! The update engine never prints directly. Progress and outcomes go through a
//! [`Reporter`]; yes/no questions go through a [`Prompt`]. The binary wires
//! both to the terminal, tests wire them to in-memory recorders.

use std::io::{BufRead, Write};
use std::sync::Arc;

/// Sink for human-readable progress and outcome messages.
pub trait Reporter: Send + Sync {
    /// Reports one message. An empty message is a blank line.
    fn report(&self, message: &str);

    /// Reports a blank separator line.
    fn blank(&self) {
        self.report("");
    }
}

/// Shared handle to a reporter.
pub type SharedReporter = Arc<dyn Reporter>;

/// Prints every message to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&self, message: &str) {
        println!("{message}");
    }
}

/// Source of operator confirmations.
pub trait Prompt: Send + Sync {
    /// Asks a yes/no question; `true` means the operator accepted.
    fn confirm(&self, question: &str) -> bool;
}

/// Reads the answer from a single stdin line.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt {
    /// Accept without asking.
    pub assume_yes: bool,
}

impl Prompt for StdinPrompt {
    fn confirm(&self, question: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        print!("{question} [y/N] ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        is_affirmative(&line)
    }
}

/// Only an explicit `y`/`yes` counts as consent.
fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}


#[cfg(test)]
mod tests {
    use super::recording::RecordingReporter;
    use super::*;

    #[test]
    fn affirmative_answers_are_case_insensitive() {
        assert!(is_affirmative("Y\n"));
        assert!(is_affirmative("  yes "));
        assert!(!is_affirmative("n"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("yep"));
    }

    #[test]
    fn assume_yes_skips_the_question() {
        assert!(StdinPrompt { assume_yes: true }.confirm("Join the beta?"));
    }

    #[test]
    fn blank_reports_empty_line() {
        let reporter = RecordingReporter::default();
        reporter.report("one");
        reporter.blank();
        assert_eq!(reporter.messages(), vec!["one".to_string(), String::new()]);
    }
}
