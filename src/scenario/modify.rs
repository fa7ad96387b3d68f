//! Structured data edits against one scenario's snapshot.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::snapshot::{quote_ident, table_columns, table_names};
use crate::{error::WorkbenchError, value::Cell};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NewValue {
    Set { value: serde_json::Value },
    ScalePercent { percent: f64 },
}

/// An already-structured edit, as produced by the request classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationRequest {
    pub table: String,
    pub column: String,
    pub value: NewValue,
    /// Restrict the edit to rows where `filter.0 = filter.1`.
    #[serde(default)]
    pub filter: Option<(String, serde_json::Value)>,
}

impl ModificationRequest {
    pub fn set(table: &str, column: &str, value: Cell) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            value: NewValue::Set { value: cell_to_json(&value) },
            filter: None,
        }
    }

    pub fn scale_percent(table: &str, column: &str, percent: f64) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            value: NewValue::ScalePercent { percent },
            filter: None,
        }
    }

    pub fn filtered(mut self, column: &str, value: Cell) -> Self {
        self.filter = Some((column.to_string(), cell_to_json(&value)));
        self
    }
}

fn cell_to_json(cell: &Cell) -> serde_json::Value {
    serde_json::to_value(cell).unwrap_or(serde_json::Value::Null)
}

fn json_to_cell(value: &serde_json::Value) -> Cell {
    match value {
        serde_json::Value::Null => Cell::Null,
        serde_json::Value::Bool(b) => Cell::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Cell::Integer)
            .or_else(|| n.as_f64().map(Cell::Real))
            .unwrap_or(Cell::Null),
        serde_json::Value::String(s) => Cell::Text(s.clone()),
        other => Cell::Text(other.to_string()),
    }
}

/// Applies `request` and returns the number of rows changed. Missing tables
/// or columns are structural errors naming what exists.
pub fn apply(conn: &Connection, scenario_name: &str, request: &ModificationRequest) -> Result<usize> {
    let Some(columns) = table_columns(conn, &request.table)? else {
        return Err(WorkbenchError::MissingTable {
            scenario: scenario_name.to_string(),
            table: request.table.clone(),
            available: table_names(conn)?,
        }
        .into());
    };
    let available: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let mut referenced = vec![request.column.as_str()];
    if let Some((filter_column, _)) = &request.filter {
        referenced.push(filter_column.as_str());
    }
    for column in referenced {
        if !available.iter().any(|c| c == column) {
            return Err(WorkbenchError::MissingColumn {
                scenario: scenario_name.to_string(),
                table: request.table.clone(),
                column: column.to_string(),
                available: available.clone(),
            }
            .into());
        }
    }

    let table = quote_ident(&request.table);
    let column = quote_ident(&request.column);
    let (assignment, first) = match &request.value {
        NewValue::Set { value } => (format!("{column} = ?1"), json_to_cell(value)),
        NewValue::ScalePercent { percent } => (
            format!("{column} = {column} * (1.0 + ?1 / 100.0)"),
            Cell::Real(*percent),
        ),
    };

    let changed = match &request.filter {
        Some((filter_column, filter_value)) => {
            let sql = format!(
                "UPDATE {table} SET {assignment} WHERE {} = ?2",
                quote_ident(filter_column)
            );
            conn.execute(&sql, rusqlite::params![first, json_to_cell(filter_value)])
        }
        None => {
            let sql = format!("UPDATE {table} SET {assignment}");
            conn.execute(&sql, rusqlite::params![first])
        }
    }
    .with_context(|| format!("updating {}.{} in scenario '{}'", request.table, request.column, scenario_name))?;

    info!(scenario = scenario_name, table = %request.table, column = %request.column, changed, "applied modification");
    Ok(changed)
}
