//! Execution history, generated artifacts, and comparison records.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{controller::classify::ErrorKind, sandbox::ExitStatus};

/// One execution of a script within a run. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionAttempt {
    pub run_id: String,
    pub scenario_id: String,
    pub script_identity: String,
    pub source_digest: String,
    pub attempt_number: u32,
    pub stdout: String,
    pub stderr: String,
    pub exit_status: ExitStatus,
    pub error_kind: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Script,
    OutputTable,
    OutputChart,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::OutputTable => "output_table",
            Self::OutputChart => "output_chart",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "script" => Some(Self::Script),
            "output_table" => Some(Self::OutputTable),
            "output_chart" => Some(Self::OutputChart),
            _ => None,
        }
    }

    /// Kind of a file produced by a script run, judged by extension.
    pub fn for_output(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "tsv" | "json" | "xlsx" | "xls" | "parquet" | "txt" | "md" => {
                Some(Self::OutputTable)
            }
            "png" | "jpg" | "jpeg" | "svg" | "pdf" | "html" | "gif" => Some(Self::OutputChart),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedArtifact {
    pub scenario_id: String,
    pub filename: String,
    pub kind: ArtifactKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub comparison_name: String,
    pub scenario_ids: Vec<String>,
    pub scenario_names: Vec<String>,
    pub comparison_kind: String,
    pub output_path: Option<PathBuf>,
    pub description: Option<String>,
    pub created_by_scenario_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
