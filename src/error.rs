//! Structural errors: conditions a caller can fix by naming something that exists.
//!
//! These never enter the repair loop. Plumbing errors travel as `anyhow::Error`;
//! callers that need to branch on a structural failure use `downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkbenchError {
    #[error("scenario '{reference}' not found; available scenarios: {}", list_or_none(.available))]
    UnknownScenario {
        reference: String,
        available: Vec<String>,
    },

    #[error("a scenario named '{0}' already exists")]
    DuplicateScenarioName(String),

    #[error("scenario name cannot be empty")]
    EmptyScenarioName,

    #[error("cannot delete root scenario '{0}' while other scenarios exist")]
    RootDeletion(String),

    #[error("table '{table}' not found in scenario '{scenario}'; available tables: {}", list_or_none(.available))]
    MissingTable {
        scenario: String,
        table: String,
        available: Vec<String>,
    },

    #[error("column '{column}' not found in '{table}' of scenario '{scenario}'; available columns: {}", list_or_none(.available))]
    MissingColumn {
        scenario: String,
        table: String,
        column: String,
        available: Vec<String>,
    },

    #[error("cannot open snapshot of scenario '{scenario}': {reason}")]
    SnapshotUnavailable { scenario: String, reason: String },

    #[error("seed dataset '{0}' does not exist")]
    MissingSeed(String),

    #[error("comparison needs at least two scenarios, got {0}")]
    TooFewScenarios(usize),

    #[error("no current scenario selected; create one with `workbench scenario create`")]
    NoCurrentScenario,
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_what_is_available() {
        let err = WorkbenchError::MissingColumn {
            scenario: "Base".into(),
            table: "hubs".into(),
            column: "Cost".into(),
            available: vec!["Location".into(), "Demand".into()],
        };
        let text = err.to_string();
        assert!(text.contains("'Cost'"));
        assert!(text.contains("'Base'"));
        assert!(text.contains("Location, Demand"));

        let err = WorkbenchError::UnknownScenario {
            reference: "ghost".into(),
            available: vec![],
        };
        assert!(err.to_string().ends_with("(none)"));
    }
}
