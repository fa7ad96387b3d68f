//! `workbench history` and `workbench comparisons`.

use anyhow::Result;

use super::Workspace;
use crate::{
    context::RequestContext,
    printer::{attempts_markdown, comparisons_markdown, TextPrinter},
};

pub fn attempts(ws: &Workspace, scenario: Option<&str>, limit: usize) -> Result<()> {
    let ctx = RequestContext::build(&ws.store, scenario)?;
    let scenario = ctx.require_current()?;
    let attempts = ws.store.db().list_attempts(&scenario.id, limit)?;
    if attempts.is_empty() {
        TextPrinter { color: Some("yellow") }.print(&format!("No runs recorded for {}", scenario.name));
        return Ok(());
    }
    ws.emit(&attempts_markdown(&attempts, ws.cfg.display_limit()));
    Ok(())
}

pub fn comparisons(ws: &Workspace, limit: usize) -> Result<()> {
    let records = ws.store.db().list_comparisons(limit)?;
    if records.is_empty() {
        TextPrinter { color: Some("yellow") }.print("No saved comparisons");
        return Ok(());
    }
    ws.emit(&comparisons_markdown(&records));
    Ok(())
}
