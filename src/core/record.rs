//! Output records
//!
//! The vocabulary every other component exchanges: one classified line of
//! text, and the outcome of a finished run.

use std::time::SystemTime;

/// Where a line of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    /// Text read from the child (stdout and stderr are merged)
    Stdout,
    /// Errors raised by the session itself
    Stderr,
    /// Echo of input sent to the child
    Stdin,
    /// Lifecycle notices (starting, exit code, terminated)
    System,
}

/// A single line of output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    /// Line text, escape sequences preserved as emitted
    pub text: String,
    pub kind: OutputKind,
    pub timestamp: SystemTime,
}

impl OutputRecord {
    pub fn new(text: impl Into<String>, kind: OutputKind) -> Self {
        Self {
            text: text.into(),
            kind,
            timestamp: SystemTime::now(),
        }
    }

    pub fn stdout(text: impl Into<String>) -> Self {
        Self::new(text, OutputKind::Stdout)
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self::new(text, OutputKind::Stderr)
    }

    pub fn stdin(text: impl Into<String>) -> Self {
        Self::new(text, OutputKind::Stdin)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(text, OutputKind::System)
    }
}

/// How a run came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnding {
    /// The process exited on its own
    Completed,
    /// The process was killed by `stop`
    Terminated,
    /// The process never started
    StartFailed,
}

/// Exit code reported when no process could be started
pub const START_FAILED_EXIT_CODE: i32 = -1;

/// Final result of one run, delivered exactly once
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub ending: RunEnding,
    /// Records of this run in delivery order
    pub records: Vec<OutputRecord>,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.ending == RunEnding::Completed && self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_kind() {
        assert_eq!(OutputRecord::stdout("a").kind, OutputKind::Stdout);
        assert_eq!(OutputRecord::stderr("a").kind, OutputKind::Stderr);
        assert_eq!(OutputRecord::stdin("a").kind, OutputKind::Stdin);
        assert_eq!(OutputRecord::system("a").kind, OutputKind::System);
    }

    #[test]
    fn test_outcome_success() {
        let outcome = ExecutionOutcome {
            exit_code: 0,
            ending: RunEnding::Completed,
            records: Vec::new(),
        };
        assert!(outcome.success());

        let killed = ExecutionOutcome {
            ending: RunEnding::Terminated,
            ..outcome.clone()
        };
        assert!(!killed.success());

        let failed = ExecutionOutcome {
            exit_code: START_FAILED_EXIT_CODE,
            ending: RunEnding::StartFailed,
            records: Vec::new(),
        };
        assert!(!failed.success());
    }
}
