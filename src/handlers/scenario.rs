//! `workbench scenario ...`

use anyhow::{bail, Result};

use super::Workspace;
use crate::{
    cli::ScenarioCommand,
    context::RequestContext,
    printer::{scenarios_markdown, schema_markdown, TextPrinter},
};

pub async fn run(ws: &Workspace, command: ScenarioCommand) -> Result<()> {
    let store = &ws.store;
    let ok = TextPrinter { color: Some("green") };
    let warn = TextPrinter { color: Some("yellow") };

    match command {
        ScenarioCommand::Create { name, parent, seed, description, switch } => {
            let parent_id = match parent.as_deref() {
                Some(reference) => Some(store.resolve(reference)?.id),
                None => None,
            };
            let mut scenario = store.create(&name, parent_id.as_deref(), seed.as_deref()).await?;
            if let Some(text) = description.as_deref() {
                store.set_description(&scenario.id, Some(text))?;
                scenario.description = Some(text.to_string());
            }
            if switch {
                store.switch(&scenario.id)?;
            }
            let origin = match &scenario.parent_scenario_id {
                Some(pid) => match store.get(pid)? {
                    Some(p) => format!("branched from {}", p.name),
                    None => "branched".to_string(),
                },
                None => "root".to_string(),
            };
            ok.print(&format!("Created scenario {} ({}, {})", scenario.name, scenario.id, origin));
        }
        ScenarioCommand::List => {
            let scenarios = store.list()?;
            if scenarios.is_empty() {
                warn.print("No scenarios yet; create one with `workbench scenario create <name>`.");
                return Ok(());
            }
            let current = store.db().current_scenario_id()?;
            ws.emit(&scenarios_markdown(&scenarios, current.as_deref()));
        }
        ScenarioCommand::Show { scenario } => {
            let ctx = RequestContext::build(store, scenario.as_deref())?;
            let scenario = ctx.require_current()?;
            let tables = store.schema(scenario)?;
            ws.emit(&schema_markdown(scenario, &tables));
        }
        ScenarioCommand::Switch { scenario } => {
            let target = store.resolve(&scenario)?;
            if !store.switch(&target.id)? {
                bail!("scenario '{}' disappeared before it could be selected", target.name);
            }
            ok.print(&format!("Current scenario: {}", target.name));
        }
        ScenarioCommand::Delete { scenario } => {
            let target = store.resolve(&scenario)?;
            if store.delete(&target.id).await? {
                ok.print(&format!("Deleted scenario {}", target.name));
                match store.current()? {
                    Some(current) => ok.print(&format!("Current scenario: {}", current.name)),
                    None => warn.print("No scenarios remain."),
                }
            } else {
                warn.print(&format!("Scenario {} was already gone", target.name));
            }
        }
        ScenarioCommand::Copy { source, target } => {
            let src = store.resolve(&source)?;
            let dst = store.resolve(&target)?;
            if store.copy(&src.id, &dst.id).await? {
                ok.print(&format!("Copied data of {} into {}", src.name, dst.name));
            } else {
                warn.print(&format!(
                    "Snapshot of {} is missing; {} was reset to an empty dataset",
                    src.name, dst.name
                ));
            }
        }
        ScenarioCommand::Lineage { scenario } => {
            let ctx = RequestContext::build(store, scenario.as_deref())?;
            let chain = store.lineage(&ctx.require_current()?.id)?;
            let names: Vec<String> = chain
                .iter()
                .map(|s| if s.is_root { format!("{} (root)", s.name) } else { s.name.clone() })
                .collect();
            println!("{}", names.join(" <- "));
        }
    }
    Ok(())
}
