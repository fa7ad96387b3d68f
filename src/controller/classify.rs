//! Failure classification for finished script runs.
//!
//! Signatures are checked against stderr in a fixed order and the first match
//! wins. Text that matches nothing falls back to the `Kind: message` shape of
//! the last non-empty stderr line; that is also the only place the
//! success-equivalent kinds are recognized.

use std::{fmt, sync::OnceLock};

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::sandbox::{ExecutionOutcome, ExitStatus};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    MissingDependency,
    MissingFile,
    MissingSchemaElement,
    /// The host ran out of memory or disk.
    Environment,
    Runtime,
    Timeout,
    AlreadyHandled,
    DuplicateRequest,
    /// A `Kind: message` line that no signature recognized.
    Other(String),
    Unknown,
}

impl ErrorKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "syntax" => Self::Syntax,
            "missing_dependency" => Self::MissingDependency,
            "missing_file" => Self::MissingFile,
            "missing_schema_element" => Self::MissingSchemaElement,
            "environment" => Self::Environment,
            "runtime" => Self::Runtime,
            "timeout" => Self::Timeout,
            "already_handled" => Self::AlreadyHandled,
            "duplicate_request" => Self::DuplicateRequest,
            "unknown" => Self::Unknown,
            other => Self::Other(other.strip_prefix("other:").unwrap_or(other).to_string()),
        }
    }

    /// Outcomes that mean the work is already done.
    pub fn is_success_equivalent(&self) -> bool {
        matches!(self, Self::AlreadyHandled | Self::DuplicateRequest)
    }

    /// Failures a replacement script may fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Syntax
                | Self::MissingDependency
                | Self::MissingFile
                | Self::Runtime
                | Self::Timeout
                | Self::Other(_)
                | Self::Unknown
        )
    }

    /// Failures caused by the dataset's shape; repairs cannot help.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::MissingSchemaElement)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => f.write_str("syntax"),
            Self::MissingDependency => f.write_str("missing_dependency"),
            Self::MissingFile => f.write_str("missing_file"),
            Self::MissingSchemaElement => f.write_str("missing_schema_element"),
            Self::Environment => f.write_str("environment"),
            Self::Runtime => f.write_str("runtime"),
            Self::Timeout => f.write_str("timeout"),
            Self::AlreadyHandled => f.write_str("already_handled"),
            Self::DuplicateRequest => f.write_str("duplicate_request"),
            Self::Other(name) => write!(f, "other:{name}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What the controller should do with a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Succeeded,
    /// Already-done outcome; counts as success and spends no budget.
    SuccessEquivalent(ErrorKind),
    Retryable(ErrorKind),
    Structural(ErrorKind),
    /// Outside the retryable set; ends the run without asking for a repair.
    Fatal(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    /// Most specific line of the diagnostic, for reports.
    pub message: String,
}

impl Classification {
    pub fn kind(&self) -> Option<&ErrorKind> {
        match &self.verdict {
            Verdict::Succeeded => None,
            Verdict::SuccessEquivalent(k)
            | Verdict::Retryable(k)
            | Verdict::Structural(k)
            | Verdict::Fatal(k) => Some(k),
        }
    }
}

struct Signature {
    kind: ErrorKind,
    pattern: &'static str,
}

fn taxonomy() -> &'static [(ErrorKind, Regex)] {
    static TAXONOMY: OnceLock<Vec<(ErrorKind, Regex)>> = OnceLock::new();
    TAXONOMY.get_or_init(|| {
        let signatures = [
            Signature { kind: ErrorKind::Syntax, pattern: r"\b(SyntaxError|IndentationError|TabError)\b" },
            Signature {
                kind: ErrorKind::MissingDependency,
                pattern: r"\b(ModuleNotFoundError|ImportError)\b|No module named",
            },
            Signature {
                kind: ErrorKind::MissingFile,
                pattern: r"\bFileNotFoundError\b|No such file or directory",
            },
            Signature {
                kind: ErrorKind::MissingSchemaElement,
                pattern: r"(?i)no such (table|column)|has no column named|\bKeyError\b",
            },
            Signature {
                kind: ErrorKind::Environment,
                pattern: r"\bMemoryError\b|Cannot allocate memory|No space left on device",
            },
            Signature {
                kind: ErrorKind::Runtime,
                pattern: r"Traceback \(most recent call last\)|\b[A-Z]\w*(Error|Exception):",
            },
            Signature { kind: ErrorKind::Timeout, pattern: r"\bTimeoutError\b|(?i:timed out)" },
        ];
        signatures
            .into_iter()
            .filter_map(|s| Regex::new(s.pattern).ok().map(|re| (s.kind, re)))
            .collect()
    })
}

fn kind_line() -> Option<&'static Regex> {
    static KIND_LINE: OnceLock<Option<Regex>> = OnceLock::new();
    KIND_LINE
        .get_or_init(|| Regex::new(r"^\s*([A-Za-z_][\w.]*)\s*:\s*(.*)$").ok())
        .as_ref()
}

fn last_meaningful_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

/// Finds the first taxonomy signature in `stderr`, ignoring the fallback.
pub fn match_signature(stderr: &str) -> Option<ErrorKind> {
    taxonomy()
        .iter()
        .find(|(_, re)| re.is_match(stderr))
        .map(|(kind, _)| kind.clone())
}

pub fn classify(outcome: &ExecutionOutcome) -> Classification {
    classify_parts(outcome.exit_status, &outcome.stderr, &outcome.stdout)
}

pub fn classify_parts(exit_status: ExitStatus, stderr: &str, stdout: &str) -> Classification {
    let message = last_meaningful_line(stderr)
        .or_else(|| last_meaningful_line(stdout))
        .unwrap_or_default()
        .to_string();

    if exit_status == ExitStatus::TimedOut {
        return Classification {
            verdict: Verdict::Retryable(ErrorKind::Timeout),
            message: if message.is_empty() { "script exceeded its time limit".into() } else { message },
        };
    }

    let signature = match_signature(stderr);
    if exit_status.success() && signature.is_none() {
        return Classification { verdict: Verdict::Succeeded, message: String::new() };
    }

    let kind = signature.unwrap_or_else(|| fallback_kind(stderr));
    let verdict = if kind.is_success_equivalent() {
        Verdict::SuccessEquivalent(kind)
    } else if kind.is_structural() {
        Verdict::Structural(kind)
    } else if kind.is_retryable() {
        Verdict::Retryable(kind)
    } else {
        Verdict::Fatal(kind)
    };
    Classification { verdict, message }
}

fn fallback_kind(stderr: &str) -> ErrorKind {
    let Some(name) = last_meaningful_line(stderr)
        .and_then(|line| kind_line()?.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
    else {
        return ErrorKind::Unknown;
    };
    let short = name.rsplit('.').next().unwrap_or(name).replace('_', "");
    if short.eq_ignore_ascii_case("AlreadyHandled") {
        ErrorKind::AlreadyHandled
    } else if short.eq_ignore_ascii_case("DuplicateRequest") {
        ErrorKind::DuplicateRequest
    } else {
        ErrorKind::Other(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> Classification {
        classify_parts(ExitStatus::Exited(1), stderr, "")
    }

    #[test]
    fn first_signature_wins() {
        let trace = "Traceback (most recent call last):\n  File \"a.py\", line 1\nModuleNotFoundError: No module named 'pandas'\n";
        assert_eq!(failed(trace).verdict, Verdict::Retryable(ErrorKind::MissingDependency));

        let trace = "Traceback (most recent call last):\nsqlite3.OperationalError: no such table: hubz\n";
        assert_eq!(failed(trace).verdict, Verdict::Structural(ErrorKind::MissingSchemaElement));

        let trace = "  File \"a.py\", line 3\n    x = (\nSyntaxError: '(' was never closed\n";
        let c = failed(trace);
        assert_eq!(c.verdict, Verdict::Retryable(ErrorKind::Syntax));
        assert_eq!(c.message, "SyntaxError: '(' was never closed");
    }

    #[test]
    fn generic_python_error_is_runtime() {
        let trace = "Traceback (most recent call last):\nZeroDivisionError: division by zero\n";
        assert_eq!(failed(trace).verdict, Verdict::Retryable(ErrorKind::Runtime));
    }

    #[test]
    fn unmatched_text_falls_back_to_kind_line() {
        assert_eq!(
            failed("warming up\nquota: exceeded for project\n").verdict,
            Verdict::Retryable(ErrorKind::Other("quota".into()))
        );
        assert_eq!(failed("boom\n\n").verdict, Verdict::Retryable(ErrorKind::Unknown));
        assert_eq!(failed("").verdict, Verdict::Retryable(ErrorKind::Unknown));
    }

    #[test]
    fn clean_exit_with_noise_on_stderr_succeeds() {
        let c = classify_parts(ExitStatus::Exited(0), "note: using cached data\n", "done\n");
        assert_eq!(c.verdict, Verdict::Succeeded);
    }

    #[test]
    fn clean_exit_with_traceback_fails() {
        let c = classify_parts(ExitStatus::Exited(0), "Traceback (most recent call last):\nValueError: bad\n", "");
        assert_eq!(c.verdict, Verdict::Retryable(ErrorKind::Runtime));
    }

    #[test]
    fn timeout_status_beats_stderr_text() {
        let c = classify_parts(ExitStatus::TimedOut, "ImportError: late\n", "");
        assert_eq!(c.verdict, Verdict::Retryable(ErrorKind::Timeout));
    }

    #[test]
    fn duplicate_markers_short_circuit() {
        let c = classify_parts(ExitStatus::Exited(1), "DuplicateRequest: change already recorded\n", "");
        assert_eq!(c.verdict, Verdict::SuccessEquivalent(ErrorKind::DuplicateRequest));
        let c = classify_parts(ExitStatus::Exited(3), "checking\nalready_handled: nothing to do\n", "");
        assert_eq!(c.verdict, Verdict::SuccessEquivalent(ErrorKind::AlreadyHandled));
    }

    #[test]
    fn prose_mentioning_duplicates_does_not_mask_a_crash() {
        let c = classify_parts(
            ExitStatus::Exited(1),
            "Traceback (most recent call last):\nZeroDivisionError: division by zero\n",
            "checking whether the update was already applied...\n",
        );
        assert_eq!(c.verdict, Verdict::Retryable(ErrorKind::Runtime));

        let c = classify_parts(ExitStatus::Exited(1), "boom\n", "duplicate request detected\n");
        assert_eq!(c.verdict, Verdict::Retryable(ErrorKind::Unknown));

        let c = classify_parts(ExitStatus::Exited(1), "note: update already applied\n", "");
        assert_eq!(c.verdict, Verdict::Retryable(ErrorKind::Other("note".into())));
    }

    #[test]
    fn kinds_outside_the_retryable_set_are_fatal() {
        let trace = "Traceback (most recent call last):\nMemoryError\n";
        assert_eq!(failed(trace).verdict, Verdict::Fatal(ErrorKind::Environment));
        assert!(!ErrorKind::Environment.is_retryable());
        assert!(!ErrorKind::Environment.is_structural());
    }

    #[test]
    fn kind_names_round_trip() {
        let kinds = [
            ErrorKind::Syntax,
            ErrorKind::MissingDependency,
            ErrorKind::MissingFile,
            ErrorKind::MissingSchemaElement,
            ErrorKind::Environment,
            ErrorKind::Runtime,
            ErrorKind::Timeout,
            ErrorKind::AlreadyHandled,
            ErrorKind::DuplicateRequest,
            ErrorKind::Other("quota".into()),
            ErrorKind::Unknown,
        ];
        for kind in kinds {
            assert_eq!(ErrorKind::parse(&kind.to_string()), kind);
        }
    }
}
