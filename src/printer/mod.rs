//! Printers: colored status lines and markdown tables (termimad).

use owo_colors::OwoColorize;
use termimad::MadSkin;

use crate::{
    aggregate::{Delta, DiffRow, TaggedRowSet},
    controller::RunReport,
    history::{ComparisonRecord, ExecutionAttempt},
    scenario::{Scenario, TableSchema},
    utils::truncate_for_display,
};

pub struct TextPrinter {
    pub color: Option<&'static str>,
}

impl TextPrinter {
    pub fn print(&self, text: &str) {
        match self.color {
            Some("green") => println!("{}", text.green()),
            Some("red") => println!("{}", text.red()),
            Some("cyan") => println!("{}", text.cyan()),
            Some("yellow") => println!("{}", text.yellow()),
            _ => println!("{}", text),
        }
    }
}

pub struct MarkdownPrinter {
    pub skin: MadSkin,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default() }
    }
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        self.skin.print_text(text);
        println!();
    }
}

/// Prints `markdown` through termimad, or as-is when prettifying is off.
pub fn emit(markdown: &str, prettify: bool) {
    if prettify {
        MarkdownPrinter::default().print(markdown);
    } else {
        println!("{markdown}");
    }
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn table(header: &[&str], rows: impl IntoIterator<Item = Vec<String>>) -> String {
    let mut out = String::new();
    out.push('|');
    for h in header {
        out.push_str(&format!(" {} |", cell(h)));
    }
    out.push_str("\n|");
    for _ in header {
        out.push_str(":-|");
    }
    out.push('\n');
    for row in rows {
        out.push('|');
        for value in row {
            out.push_str(&format!(" {} |", cell(&value)));
        }
        out.push('\n');
    }
    out
}

pub fn rowset_markdown(set: &TaggedRowSet) -> String {
    let mut header = vec!["scenario_name"];
    header.extend(set.columns.iter().map(String::as_str));
    let rows = set.rows.iter().map(|r| {
        let mut row = vec![r.scenario_name.clone()];
        row.extend(r.cells.iter().map(ToString::to_string));
        row
    });
    format!(
        "**{}** across {}\n\n{}",
        set.target.label(),
        set.scenarios.join(", "),
        table(&header, rows)
    )
}

pub fn diff_markdown(rows: &[DiffRow], baseline: &str) -> String {
    if rows.is_empty() {
        return format!("No rows match the baseline *{baseline}*.\n");
    }
    let body = rows.iter().map(|d| {
        let (absolute, percent) = match d.delta {
            Delta::Change { absolute, percent } => (format!("{absolute:+}"), format!("{percent:+.2}%")),
            Delta::NotApplicable => ("n/a".to_string(), "n/a".to_string()),
        };
        vec![
            d.scenario_name.clone(),
            d.key.to_string(),
            d.column.clone(),
            d.baseline.to_string(),
            d.value.to_string(),
            absolute,
            percent,
        ]
    });
    format!(
        "Differences against baseline *{baseline}*\n\n{}",
        table(&["scenario", "key", "column", "baseline", "value", "delta", "delta %"], body)
    )
}

pub fn scenarios_markdown(scenarios: &[Scenario], current: Option<&str>) -> String {
    let parents: std::collections::HashMap<&str, &str> =
        scenarios.iter().map(|s| (s.id.as_str(), s.name.as_str())).collect();
    let rows = scenarios.iter().map(|s| {
        vec![
            if Some(s.id.as_str()) == current { "*".to_string() } else { String::new() },
            s.name.clone(),
            s.id.clone(),
            s.parent_scenario_id
                .as_deref()
                .map(|p| parents.get(p).copied().unwrap_or(p).to_string())
                .unwrap_or_else(|| "(root)".to_string()),
            s.modified_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            s.description.clone().unwrap_or_default(),
        ]
    });
    table(&["", "name", "id", "parent", "modified", "description"], rows)
}

pub fn schema_markdown(scenario: &Scenario, tables: &[TableSchema]) -> String {
    let mut out = format!(
        "## {}\n\n- id: `{}`\n- snapshot: `{}`\n- root: {}\n",
        scenario.name,
        scenario.id,
        scenario.snapshot_path.display(),
        scenario.is_root
    );
    if let Some(description) = &scenario.description {
        out.push_str(&format!("- description: {description}\n"));
    }
    out.push('\n');
    if tables.is_empty() {
        out.push_str("(empty dataset: no tables)\n");
        return out;
    }
    let rows = tables.iter().map(|t| {
        vec![
            t.name.clone(),
            t.columns
                .iter()
                .map(|c| if c.decl_type.is_empty() { c.name.clone() } else { format!("{} {}", c.name, c.decl_type) })
                .collect::<Vec<_>>()
                .join(", "),
            t.row_count.to_string(),
        ]
    });
    out.push_str(&table(&["table", "columns", "rows"], rows));
    out
}

pub fn attempts_markdown(attempts: &[ExecutionAttempt], limit: usize) -> String {
    let rows = attempts.iter().map(|a| {
        vec![
            a.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            a.run_id.chars().take(8).collect(),
            a.script_identity.clone(),
            a.attempt_number.to_string(),
            a.exit_status.to_string(),
            a.error_kind.as_ref().map(ToString::to_string).unwrap_or_default(),
            truncate_for_display(a.stderr.lines().last().unwrap_or_default(), limit),
        ]
    });
    table(&["time", "run", "script", "attempt", "exit", "kind", "last stderr line"], rows)
}

pub fn comparisons_markdown(records: &[ComparisonRecord]) -> String {
    let rows = records.iter().map(|r| {
        vec![
            r.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            r.comparison_name.clone(),
            r.comparison_kind.clone(),
            r.scenario_names.join(", "),
            r.output_path.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
        ]
    });
    table(&["time", "name", "kind", "scenarios", "output"], rows)
}

/// Run report with the last attempt's output, capped at `limit` characters.
pub fn report_markdown(report: &RunReport, limit: usize) -> String {
    let mut out = String::new();
    for line in report.to_string().lines() {
        out.push_str(&format!("- {line}\n"));
    }
    if !report.artifacts.is_empty() {
        out.push_str("\n**Outputs**\n\n");
        for artifact in &report.artifacts {
            out.push_str(&format!("- `{}` ({})\n", artifact.filename, artifact.kind.as_str()));
        }
    }
    if let Some(last) = report.last_attempt() {
        if !last.stdout.trim().is_empty() {
            out.push_str(&format!("\n**stdout**\n\n```\n{}\n```\n", truncate_for_display(&last.stdout, limit)));
        }
        if !report.succeeded() && !last.stderr.trim().is_empty() {
            out.push_str(&format!("\n**stderr**\n\n```\n{}\n```\n", truncate_for_display(&last.stderr, limit)));
        }
    }
    out
}
