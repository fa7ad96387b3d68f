//! Cross-scenario aggregation: one logical query fanned out over several
//! snapshots, merged into a single schema-reconciled, scenario-tagged set.

use std::{collections::BTreeSet, fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    error::WorkbenchError,
    history::{ArtifactKind, ComparisonRecord, GeneratedArtifact},
    scenario::{
        snapshot::{open_read_only, quote_ident, table_columns, table_names},
        Scenario, SnapshotStore,
    },
    utils::slugify,
    value::Cell,
};

pub mod diff;

pub use diff::{diff, Delta, DiffRow};

/// What to read from every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Target {
    Table(String),
    /// A read-only SQL query, run unchanged against each snapshot.
    Query(String),
}

impl Target {
    /// `SELECT ...`/`WITH ...` text is a query, anything else a table name.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let head = trimmed
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if head == "select" || head == "with" {
            Self::Query(trimmed.to_string())
        } else {
            Self::Table(trimmed.to_string())
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Table(name) => name,
            Self::Query(_) => "query",
        }
    }

    fn sql(&self) -> String {
        match self {
            Self::Table(name) => format!("SELECT * FROM {}", quote_ident(name)),
            Self::Query(sql) => sql.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedRow {
    pub scenario_name: String,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedRowSet {
    pub target: Target,
    /// Scenario names in caller order; the first is the baseline.
    pub scenarios: Vec<String>,
    pub columns: Vec<String>,
    pub rows: Vec<TaggedRow>,
}

impl TaggedRowSet {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn baseline(&self) -> Option<&str> {
        self.scenarios.first().map(String::as_str)
    }

    pub fn rows_for<'a>(&'a self, scenario_name: &'a str) -> impl Iterator<Item = &'a TaggedRow> + 'a {
        self.rows.iter().filter(move |r| r.scenario_name == scenario_name)
    }
}

struct Prepared {
    scenario: Scenario,
    conn: Connection,
    columns: Vec<String>,
}

/// Merges `target` across `scenario_refs` (ids or names, caller order).
///
/// Every scenario is checked before any row is read: an unopenable snapshot,
/// a missing table, or a missing required column aborts the whole call naming
/// the scenario. Columns are `required`, then `optional`, then every other
/// column seen in any scenario sorted by name; a scenario without a column
/// contributes NULL for it.
pub fn aggregate(
    store: &SnapshotStore,
    scenario_refs: &[String],
    target: &Target,
    required: &[String],
    optional: &[String],
) -> Result<TaggedRowSet> {
    if scenario_refs.len() < 2 {
        return Err(WorkbenchError::TooFewScenarios(scenario_refs.len()).into());
    }

    let mut prepared = Vec::with_capacity(scenario_refs.len());
    for reference in scenario_refs {
        let scenario = store.resolve(reference)?;
        prepared.push(preflight(scenario, target, required)?);
    }

    let mut columns: Vec<String> = Vec::new();
    for name in required.iter().chain(optional) {
        if !columns.contains(name) {
            columns.push(name.clone());
        }
    }
    let extras: BTreeSet<&String> = prepared
        .iter()
        .flat_map(|p| p.columns.iter())
        .filter(|c| !columns.contains(c))
        .collect();
    columns.extend(extras.into_iter().cloned());

    let mut rows = Vec::new();
    for p in &prepared {
        let before = rows.len();
        extract(p, target, &columns, &mut rows)?;
        debug!(scenario = %p.scenario.name, rows = rows.len() - before, "extracted rows");
    }

    info!(
        target = target.label(),
        scenarios = prepared.len(),
        columns = columns.len(),
        rows = rows.len(),
        "aggregated"
    );
    Ok(TaggedRowSet {
        target: target.clone(),
        scenarios: prepared.into_iter().map(|p| p.scenario.name).collect(),
        columns,
        rows,
    })
}

fn preflight(scenario: Scenario, target: &Target, required: &[String]) -> Result<Prepared> {
    let conn = open_read_only(&scenario.snapshot_path).map_err(|err| WorkbenchError::SnapshotUnavailable {
        scenario: scenario.name.clone(),
        reason: format!("{err:#}"),
    })?;

    let columns: Vec<String> = match target {
        Target::Table(table) => match table_columns(&conn, table)? {
            Some(cols) => cols.into_iter().map(|c| c.name).collect(),
            None => {
                return Err(WorkbenchError::MissingTable {
                    scenario: scenario.name.clone(),
                    table: table.clone(),
                    available: table_names(&conn)?,
                }
                .into())
            }
        },
        Target::Query(sql) => {
            let stmt = conn
                .prepare(sql)
                .with_context(|| format!("preparing comparison query for scenario '{}'", scenario.name))?;
            if !stmt.readonly() {
                bail!("comparison query must be read-only");
            }
            stmt.column_names().into_iter().map(str::to_string).collect()
        }
    };

    for column in required {
        if !columns.contains(column) {
            return Err(WorkbenchError::MissingColumn {
                scenario: scenario.name.clone(),
                table: target.label().to_string(),
                column: column.clone(),
                available: columns,
            }
            .into());
        }
    }
    Ok(Prepared { scenario, conn, columns })
}

fn extract(p: &Prepared, target: &Target, unified: &[String], out: &mut Vec<TaggedRow>) -> Result<()> {
    // Position in this scenario's result for each unified column.
    let mapping: Vec<Option<usize>> = unified
        .iter()
        .map(|name| p.columns.iter().position(|c| c == name))
        .collect();

    let mut stmt = p.conn.prepare(&target.sql())?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(mapping.len());
        for slot in &mapping {
            cells.push(match slot {
                Some(idx) => Cell::from_value_ref(row.get_ref(*idx)?),
                None => Cell::Null,
            });
        }
        out.push(TaggedRow { scenario_name: p.scenario.name.clone(), cells });
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ComparisonDocument<'a> {
    comparison_name: &'a str,
    comparison_kind: &'a str,
    created_at: String,
    result: &'a TaggedRowSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    diff: Option<&'a [DiffRow]>,
}

/// Writes `rows` (and `diff`, when given) as a JSON artifact in the creating
/// scenario's directory and appends a comparison history record.
pub fn save_comparison(
    store: &SnapshotStore,
    created_by: &Scenario,
    name: &str,
    rows: &TaggedRowSet,
    diff: Option<&[DiffRow]>,
    description: Option<&str>,
) -> Result<ComparisonRecord> {
    let now = Utc::now();
    let kind = if diff.is_some() { "diff" } else { "table" };
    let filename = format!("comparison_{}_{}.json", slugify(name), now.format("%Y%m%dT%H%M%S%3f"));
    let path: PathBuf = created_by.directory().join(&filename);

    let document = ComparisonDocument {
        comparison_name: name,
        comparison_kind: kind,
        created_at: crate::store::format_time(&now),
        result: rows,
        diff,
    };
    let body = serde_json::to_string_pretty(&document)?;
    fs::write(&path, body).with_context(|| format!("writing comparison {}", path.display()))?;

    store.db().upsert_artifact(&GeneratedArtifact {
        scenario_id: created_by.id.clone(),
        filename,
        kind: ArtifactKind::OutputTable,
        created_at: now,
    })?;

    let mut scenario_ids = Vec::with_capacity(rows.scenarios.len());
    for scenario_name in &rows.scenarios {
        scenario_ids.push(store.resolve(scenario_name)?.id);
    }
    let record = ComparisonRecord {
        comparison_name: name.to_string(),
        scenario_ids,
        scenario_names: rows.scenarios.clone(),
        comparison_kind: kind.to_string(),
        output_path: Some(path),
        description: description.map(str::to_string),
        created_by_scenario_id: Some(created_by.id.clone()),
        created_at: now,
    };
    store.db().insert_comparison(&record)?;
    info!(comparison = name, path = ?record.output_path, "comparison saved");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_detects_queries() {
        assert_eq!(Target::parse("hubs"), Target::Table("hubs".into()));
        assert_eq!(
            Target::parse("  select Location from hubs"),
            Target::Query("select Location from hubs".into())
        );
        assert!(matches!(Target::parse("WITH t AS (SELECT 1) SELECT * FROM t"), Target::Query(_)));
        assert_eq!(Target::parse("hubs").label(), "hubs");
    }

    #[tokio::test]
    async fn fewer_than_two_scenarios_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        store.create("Base", None, None).await.expect("create");
        let err = aggregate(&store, &["Base".to_string()], &Target::parse("hubs"), &[], &[])
            .expect_err("too few");
        assert_eq!(err.downcast_ref::<WorkbenchError>(), Some(&WorkbenchError::TooFewScenarios(1)));
    }
}
