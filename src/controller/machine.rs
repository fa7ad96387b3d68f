//! Retry/repair state machine.
//!
//! `step` is pure: it maps `(state, event)` to the next state plus the effects
//! the driver must perform. All attempt-budget decisions live here.

use thiserror::Error;

use super::classify::{ErrorKind, Verdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running { attempt: u32 },
    FailedRetryable { attempt: u32, kind: ErrorKind },
    Succeeded { attempt: u32 },
    FailedTerminal { attempt: u32, kind: ErrorKind, reason: TerminalReason },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::FailedTerminal { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running { .. } => "RUNNING",
            Self::FailedRetryable { .. } => "FAILED_RETRYABLE",
            Self::Succeeded { .. } => "SUCCEEDED",
            Self::FailedTerminal { .. } => "FAILED_TERMINAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// Every attempt in the budget failed.
    Exhausted,
    /// The repair collaborator declined to produce a replacement.
    Refused,
    /// The dataset lacks something the script needs; repairs cannot help.
    Structural,
    /// The failure kind is not one a replacement script can fix.
    NotRetryable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Completed(Verdict),
    Repaired,
    Refused,
    BudgetExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Run the current script as attempt `n`.
    Execute(u32),
    /// Append the finished attempt to history.
    RecordAttempt(u32),
    /// Ask the collaborator for a replacement script.
    RequestRepair { attempt: u32, kind: ErrorKind },
    /// No budget left; the driver must feed `Event::BudgetExhausted`.
    Exhaust,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: RunState,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("illegal transition: {event:?} in state {state}")]
pub struct IllegalTransition {
    pub state: &'static str,
    pub event: Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Machine {
    max_attempts: u32,
}

impl Machine {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1) }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn step(&self, state: &RunState, event: Event) -> Result<Transition, IllegalTransition> {
        use RunState::*;

        let next = match (state, &event) {
            (Pending, Event::Start) => Transition {
                state: Running { attempt: 1 },
                effects: vec![Effect::Execute(1)],
            },
            (Running { attempt }, Event::Completed(verdict)) => {
                let attempt = *attempt;
                match verdict {
                    Verdict::Succeeded | Verdict::SuccessEquivalent(_) => Transition {
                        state: Succeeded { attempt },
                        effects: vec![Effect::RecordAttempt(attempt)],
                    },
                    Verdict::Structural(kind) => Transition {
                        state: FailedTerminal {
                            attempt,
                            kind: kind.clone(),
                            reason: TerminalReason::Structural,
                        },
                        effects: vec![Effect::RecordAttempt(attempt)],
                    },
                    Verdict::Fatal(kind) => Transition {
                        state: FailedTerminal {
                            attempt,
                            kind: kind.clone(),
                            reason: TerminalReason::NotRetryable,
                        },
                        effects: vec![Effect::RecordAttempt(attempt)],
                    },
                    Verdict::Retryable(kind) => {
                        let follow_up = if attempt < self.max_attempts {
                            Effect::RequestRepair { attempt, kind: kind.clone() }
                        } else {
                            Effect::Exhaust
                        };
                        Transition {
                            state: FailedRetryable { attempt, kind: kind.clone() },
                            effects: vec![Effect::RecordAttempt(attempt), follow_up],
                        }
                    }
                }
            }
            (FailedRetryable { attempt, .. }, Event::Repaired) if *attempt < self.max_attempts => {
                let attempt = attempt + 1;
                Transition {
                    state: Running { attempt },
                    effects: vec![Effect::Execute(attempt)],
                }
            }
            (FailedRetryable { attempt, kind }, Event::Refused) => Transition {
                state: FailedTerminal {
                    attempt: *attempt,
                    kind: kind.clone(),
                    reason: TerminalReason::Refused,
                },
                effects: vec![],
            },
            (FailedRetryable { attempt, kind }, Event::BudgetExhausted) if *attempt >= self.max_attempts => {
                Transition {
                    state: FailedTerminal {
                        attempt: *attempt,
                        kind: kind.clone(),
                        reason: TerminalReason::Exhausted,
                    },
                    effects: vec![],
                }
            }
            _ => {
                return Err(IllegalTransition { state: state.name(), event: event.clone() });
            }
        };
        Ok(next)
    }
}
