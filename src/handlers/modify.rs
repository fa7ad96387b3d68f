//! `workbench modify`: structured edits to one scenario's data.

use anyhow::{anyhow, Result};

use super::Workspace;
use crate::{
    cli::ModifyArgs,
    context::RequestContext,
    printer::TextPrinter,
    scenario::ModificationRequest,
    value::Cell,
};

/// Builds the edit described by the command-line arguments.
pub fn request_from_args(args: &ModifyArgs) -> Result<ModificationRequest> {
    let request = match (&args.set, args.percent) {
        (Some(raw), None) => ModificationRequest::set(&args.table, &args.column, Cell::parse_literal(raw)),
        (None, Some(percent)) => ModificationRequest::scale_percent(&args.table, &args.column, percent),
        _ => return Err(anyhow!("give exactly one of --set or --percent")),
    };
    match args.filter.as_deref() {
        Some(filter) => {
            let (column, value) = filter
                .split_once('=')
                .ok_or_else(|| anyhow!("--where expects COLUMN=VALUE, got '{filter}'"))?;
            Ok(request.filtered(column.trim(), Cell::parse_literal(value)))
        }
        None => Ok(request),
    }
}

pub async fn run(ws: &Workspace, args: ModifyArgs) -> Result<()> {
    let ctx = RequestContext::build(&ws.store, args.scenario.as_deref())?;
    let scenario = ctx.require_current()?;
    let request = request_from_args(&args)?;
    let changed = ws.store.apply_modification(&scenario.id, &request).await?;
    TextPrinter { color: Some("green") }.print(&format!(
        "Updated {changed} row(s) of {}.{} in scenario {}",
        request.table, request.column, scenario.name
    ));
    Ok(())
}
