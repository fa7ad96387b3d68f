//! `workbench run`: generate, execute, repair.

use std::{fs, time::Duration};

use anyhow::{bail, Context, Result};
use tracing::info;

use super::Workspace;
use crate::{
    cli::RunArgs,
    collaborator::{LlmCollaborator, ScriptCollaborator},
    context::RequestContext,
    controller::RetryController,
    printer::{report_markdown, TextPrinter},
    sandbox::Sandbox,
};

pub async fn run(ws: &Workspace, args: RunArgs, model: &str) -> Result<()> {
    let ctx = RequestContext::build(&ws.store, args.scenario.as_deref())?;
    let scenario = ctx.require_current()?;

    let collaborator = LlmCollaborator::from_config(&ws.cfg, model, !args.no_cache)?;

    let source = match &args.script {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading script {}", path.display()))?,
        None => {
            info!(request = %ctx.request_id, "generating script");
            collaborator.generate(&args.prompt, ctx.schema_summary()).await?
        }
    };

    let max_attempts = args.max_attempts.unwrap_or_else(|| ws.cfg.max_attempts());
    let timeout = match args.timeout {
        Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
        Some(secs) => bail!("--timeout must be a positive number of seconds, got {secs}"),
        None => ws.cfg.execution_timeout(),
    };
    let controller = RetryController::new(&ws.store, Sandbox::from_config(&ws.cfg), max_attempts, timeout);

    TextPrinter { color: Some("cyan") }.print(&format!(
        "Running {} in scenario {} (up to {} attempts)",
        args.name,
        scenario.name,
        controller.max_attempts()
    ));
    let report = controller
        .run(&collaborator, scenario, &args.prompt, &args.name, source)
        .await?;

    ws.emit(&report_markdown(&report, ws.cfg.display_limit()));
    if !report.succeeded() {
        bail!("run ended in {}", report.state.name());
    }
    Ok(())
}
