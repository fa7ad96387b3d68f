//! `workbench compare`: cross-scenario aggregation with optional diff.

use anyhow::Result;

use super::Workspace;
use crate::{
    aggregate::{aggregate, diff, save_comparison, Target},
    cli::CompareArgs,
    context::RequestContext,
    printer::{diff_markdown, rowset_markdown, TextPrinter},
};

pub fn run(ws: &Workspace, args: CompareArgs) -> Result<()> {
    let ctx = RequestContext::build(&ws.store, None)?;
    let target = Target::parse(&args.target);
    let rows = aggregate(&ws.store, &args.scenarios, &target, &args.required, &args.optional)?;
    ws.emit(&rowset_markdown(&rows));

    let deltas = match args.key.as_deref() {
        Some(key) => {
            let values = if args.values.is_empty() {
                args.required.iter().filter(|c| c.as_str() != key).cloned().collect()
            } else {
                args.values.clone()
            };
            let deltas = diff(&rows, key, &values)?;
            ws.emit(&diff_markdown(&deltas, rows.baseline().unwrap_or_default()));
            Some(deltas)
        }
        None => None,
    };

    if let Some(name) = args.save.as_deref() {
        let created_by = match ctx.current() {
            Some(current) => current.clone(),
            None => ws.store.resolve(&args.scenarios[0])?,
        };
        let record = save_comparison(
            &ws.store,
            &created_by,
            name,
            &rows,
            deltas.as_deref(),
            args.description.as_deref(),
        )?;
        if let Some(path) = &record.output_path {
            TextPrinter { color: Some("green") }.print(&format!("Saved comparison {name} to {}", path.display()));
        }
    }
    Ok(())
}
