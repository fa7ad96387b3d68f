//! Baseline diff over an aggregated row set.

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::Serialize;

use super::TaggedRowSet;
use crate::value::Cell;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "delta", rename_all = "snake_case")]
pub enum Delta {
    Change { absolute: f64, percent: f64 },
    /// Baseline or compared value is non-numeric, or the baseline is zero.
    NotApplicable,
}

impl Delta {
    fn between(baseline: &Cell, value: &Cell) -> Self {
        match (baseline.as_f64(), value.as_f64()) {
            (Some(base), Some(v)) if base != 0.0 => Self::Change {
                absolute: v - base,
                percent: (v - base) / base.abs() * 100.0,
            },
            _ => Self::NotApplicable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffRow {
    pub scenario_name: String,
    pub key: Cell,
    pub column: String,
    pub baseline: Cell,
    pub value: Cell,
    pub delta: Delta,
}

/// Compares every non-baseline row against the baseline row with the same
/// `key` value, one entry per value column. Rows without a baseline match are
/// skipped. The baseline is the first scenario of the row set.
pub fn diff(set: &TaggedRowSet, key: &str, value_columns: &[String]) -> Result<Vec<DiffRow>> {
    let Some(key_idx) = set.column_index(key) else {
        bail!("key column '{key}' is not in the comparison; columns: {}", set.columns.join(", "));
    };
    let mut value_idx = Vec::with_capacity(value_columns.len());
    for column in value_columns {
        let Some(idx) = set.column_index(column) else {
            bail!("value column '{column}' is not in the comparison; columns: {}", set.columns.join(", "));
        };
        value_idx.push((column, idx));
    }
    let Some(baseline) = set.baseline() else {
        return Ok(Vec::new());
    };

    let mut baseline_rows = HashMap::new();
    for row in set.rows_for(baseline) {
        baseline_rows.entry(row.cells[key_idx].match_key()).or_insert(row);
    }

    let mut out = Vec::new();
    for row in set.rows.iter().filter(|r| r.scenario_name != baseline) {
        let Some(base_row) = baseline_rows.get(&row.cells[key_idx].match_key()) else {
            continue;
        };
        for (column, idx) in &value_idx {
            let base = &base_row.cells[*idx];
            let value = &row.cells[*idx];
            out.push(DiffRow {
                scenario_name: row.scenario_name.clone(),
                key: row.cells[key_idx].clone(),
                column: (*column).clone(),
                baseline: base.clone(),
                value: value.clone(),
                delta: Delta::between(base, value),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{TaggedRow, Target};

    fn set() -> TaggedRowSet {
        let row = |s: &str, loc: &str, demand: Cell| TaggedRow {
            scenario_name: s.into(),
            cells: vec![Cell::Text(loc.into()), demand],
        };
        TaggedRowSet {
            target: Target::Table("hubs".into()),
            scenarios: vec!["Base".into(), "High".into()],
            columns: vec!["Location".into(), "Demand".into()],
            rows: vec![
                row("Base", "London", Cell::Integer(5000)),
                row("Base", "Leeds", Cell::Integer(0)),
                row("High", "London", Cell::Integer(7000)),
                row("High", "Leeds", Cell::Integer(10)),
                row("High", "York", Cell::Integer(1)),
            ],
        }
    }

    #[test]
    fn deltas_against_baseline() {
        let rows = diff(&set(), "Location", &["Demand".to_string()]).expect("diff");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, Cell::Text("London".into()));
        match rows[0].delta {
            Delta::Change { absolute, percent } => {
                assert_eq!(absolute, 2000.0);
                assert!((percent - 40.0).abs() < 1e-9);
            }
            Delta::NotApplicable => panic!("expected a change"),
        }
        assert_eq!(rows[1].delta, Delta::NotApplicable);
    }

    #[test]
    fn text_values_are_not_applicable() {
        assert_eq!(
            Delta::between(&Cell::Text("a".into()), &Cell::Integer(1)),
            Delta::NotApplicable
        );
        assert_eq!(Delta::between(&Cell::Integer(4), &Cell::Null), Delta::NotApplicable);
    }

    #[test]
    fn unknown_key_column_is_an_error() {
        assert!(diff(&set(), "Depot", &[]).is_err());
        assert!(diff(&set(), "Location", &["Cost".to_string()]).is_err());
    }
}
