//! Drives a generated script through bounded execute/classify/repair cycles
//! against one scenario.

use std::{
    collections::VecDeque,
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    collaborator::{RepairRequest, RepairResponse, ScriptCollaborator},
    history::{ArtifactKind, ExecutionAttempt, GeneratedArtifact},
    sandbox::{ExecutionOutcome, Sandbox},
    scenario::{Scenario, SnapshotStore},
};

pub mod classify;
pub mod machine;

use classify::{classify, Classification, ErrorKind};
use machine::{Effect, Event, Machine, RunState, TerminalReason};

/// Outcome of one run, as shown to the user.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub request: String,
    pub run_id: String,
    pub scenario_name: String,
    pub script_identity: String,
    pub state: RunState,
    pub attempts: Vec<ExecutionAttempt>,
    pub artifacts: Vec<GeneratedArtifact>,
    pub final_kind: Option<ErrorKind>,
    pub message: String,
    pub refusal_reason: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.state, RunState::Succeeded { .. })
    }

    pub fn last_attempt(&self) -> Option<&ExecutionAttempt> {
        self.attempts.last()
    }

    fn reason(&self) -> Option<&'static str> {
        match &self.state {
            RunState::FailedTerminal { reason, .. } => Some(match reason {
                TerminalReason::Exhausted => "attempts exhausted",
                TerminalReason::Refused => "repair declined",
                TerminalReason::Structural => "dataset is missing a required table or column",
                TerminalReason::NotRetryable => "failure cannot be fixed by a new script",
            }),
            _ => None,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Request: {}", self.request)?;
        writeln!(f, "Scenario: {}", self.scenario_name)?;
        write!(f, "Outcome: {} after {} attempt(s)", self.state.name(), self.attempts.len())?;
        if let Some(reason) = self.reason() {
            write!(f, " ({reason})")?;
        }
        if let Some(kind) = &self.final_kind {
            write!(f, "\nError kind: {kind}")?;
        }
        if !self.message.is_empty() {
            write!(f, "\nMessage: {}", self.message)?;
        }
        if let Some(reason) = &self.refusal_reason {
            write!(f, "\nRepair refusal: {reason}")?;
        }
        Ok(())
    }
}

pub struct RetryController<'a> {
    store: &'a SnapshotStore,
    sandbox: Sandbox,
    machine: Machine,
    timeout: Duration,
}

impl<'a> RetryController<'a> {
    pub fn new(store: &'a SnapshotStore, sandbox: Sandbox, max_attempts: u32, timeout: Duration) -> Self {
        Self { store, sandbox, machine: Machine::new(max_attempts), timeout }
    }

    pub fn max_attempts(&self) -> u32 {
        self.machine.max_attempts()
    }

    /// Writes `source` as `script_name` into the scenario directory and runs
    /// it until it succeeds, fails structurally, the collaborator declines a
    /// repair, or the attempt budget is spent. Runs against one scenario are
    /// serialized.
    pub async fn run<C: ScriptCollaborator>(
        &self,
        collaborator: &C,
        scenario: &Scenario,
        request: &str,
        script_name: &str,
        source: String,
    ) -> Result<RunReport> {
        if Path::new(script_name).file_name().and_then(|n| n.to_str()) != Some(script_name) {
            bail!("script name '{script_name}' must be a plain file name");
        }
        let _guard = self.store.locks().acquire(&scenario.id).await;

        let run_id = Uuid::new_v4().to_string();
        let working_dir = scenario.directory().to_path_buf();
        let script_path = working_dir.join(script_name);
        let mut source = source;
        self.write_script(scenario, script_name, &script_path, &source)?;
        info!(run = %run_id, scenario = %scenario.name, script = script_name, "run started");

        let mut state = RunState::Pending;
        let mut effects: VecDeque<Effect> = VecDeque::new();
        let start = self.machine.step(&state, Event::Start)?;
        state = start.state;
        effects.extend(start.effects);

        let mut attempts: Vec<ExecutionAttempt> = Vec::new();
        let mut artifacts: Vec<GeneratedArtifact> = Vec::new();
        let mut last: Option<(ExecutionOutcome, Classification)> = None;
        let mut refusal_reason = None;

        while let Some(effect) = effects.pop_front() {
            let transition = match effect {
                Effect::Execute(attempt) => {
                    debug!(run = %run_id, attempt, "executing");
                    let outcome = self.sandbox.execute(&script_path, &working_dir, self.timeout).await?;
                    let classification = classify(&outcome);
                    debug!(
                        run = %run_id,
                        attempt,
                        exit = %outcome.exit_status,
                        verdict = ?classification.verdict,
                        "attempt finished"
                    );
                    let verdict = classification.verdict.clone();
                    last = Some((outcome, classification));
                    self.machine.step(&state, Event::Completed(verdict))?
                }
                Effect::RecordAttempt(attempt) => {
                    let Some((outcome, classification)) = &last else {
                        bail!("attempt {attempt} recorded before it executed");
                    };
                    let record = ExecutionAttempt {
                        run_id: run_id.clone(),
                        scenario_id: scenario.id.clone(),
                        script_identity: script_name.to_string(),
                        source_digest: digest(&source),
                        attempt_number: attempt,
                        stdout: outcome.stdout.clone(),
                        stderr: outcome.stderr.clone(),
                        exit_status: outcome.exit_status,
                        error_kind: classification.kind().cloned(),
                        timestamp: Utc::now(),
                    };
                    self.store.db().append_attempt(&record)?;
                    attempts.push(record);
                    artifacts.extend(self.register_outputs(scenario, &outcome.new_files)?);
                    continue;
                }
                Effect::RequestRepair { attempt, kind } => {
                    let Some((outcome, _)) = &last else {
                        bail!("repair requested for attempt {attempt} before it executed");
                    };
                    let repair_request = RepairRequest {
                        source: &source,
                        error_kind: &kind,
                        stderr: &outcome.stderr,
                        stdout: &outcome.stdout,
                    };
                    let response = match collaborator.repair(&repair_request).await {
                        Ok(response) => response,
                        Err(err) => {
                            warn!(run = %run_id, attempt, "repair failed: {err:#}");
                            RepairResponse::Refusal { reason: Some(format!("{err:#}")) }
                        }
                    };
                    match response.replacement() {
                        Some(replacement) => {
                            if let Some(name) = response.filename() {
                                if name != script_name {
                                    warn!(run = %run_id, proposed = name, "ignoring repair filename; script identity is fixed");
                                }
                            }
                            source = replacement.to_string();
                            self.write_script(scenario, script_name, &script_path, &source)?;
                            info!(run = %run_id, attempt, kind = %kind, "script repaired");
                            self.machine.step(&state, Event::Repaired)?
                        }
                        None => {
                            if let RepairResponse::Refusal { reason } = &response {
                                refusal_reason = reason.clone();
                            }
                            info!(run = %run_id, attempt, "repair declined");
                            self.machine.step(&state, Event::Refused)?
                        }
                    }
                }
                Effect::Exhaust => self.machine.step(&state, Event::BudgetExhausted)?,
            };
            state = transition.state;
            effects.extend(transition.effects);
        }

        if !state.is_terminal() {
            bail!("run {run_id} stopped in non-terminal state {}", state.name());
        }
        self.store.db().touch_scenario(&scenario.id, &Utc::now())?;

        let (final_kind, message) = match &last {
            Some((_, classification)) => (classification.kind().cloned(), classification.message.clone()),
            None => (None, String::new()),
        };
        info!(run = %run_id, state = state.name(), attempts = attempts.len(), "run finished");
        Ok(RunReport {
            request: request.to_string(),
            run_id,
            scenario_name: scenario.name.clone(),
            script_identity: script_name.to_string(),
            state,
            attempts,
            artifacts,
            final_kind,
            message,
            refusal_reason,
        })
    }

    fn write_script(&self, scenario: &Scenario, script_name: &str, path: &Path, source: &str) -> Result<()> {
        fs::write(path, source).with_context(|| format!("writing script {}", path.display()))?;
        self.store.db().upsert_artifact(&GeneratedArtifact {
            scenario_id: scenario.id.clone(),
            filename: script_name.to_string(),
            kind: ArtifactKind::Script,
            created_at: Utc::now(),
        })
    }

    fn register_outputs(&self, scenario: &Scenario, new_files: &[PathBuf]) -> Result<Vec<GeneratedArtifact>> {
        let mut registered = Vec::new();
        for file in new_files {
            let Some(kind) = ArtifactKind::for_output(file) else {
                continue;
            };
            let artifact = GeneratedArtifact {
                scenario_id: scenario.id.clone(),
                filename: file.to_string_lossy().into_owned(),
                kind,
                created_at: Utc::now(),
            };
            self.store.db().upsert_artifact(&artifact)?;
            debug!(file = %artifact.filename, kind = kind.as_str(), "registered output");
            registered.push(artifact);
        }
        Ok(registered)
    }
}

pub fn digest(source: &str) -> String {
    format!("{:x}", md5::compute(source.as_bytes()))
}
