//! The safety-check state machine.
//!
//! `step` is pure: it takes the current machine by reference plus one input
//! and returns the next machine together with the effects the runtime must
//! carry out. Countdown scheduling and cancellation are effects too, tagged
//! with a generation so ticks from a cancelled countdown are recognised and
//! dropped.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nirbhay_config::EscalationConfig;
use nirbhay_config::schema::is_valid_safety_code;
use nirbhay_core::{NirbhayError, Result, RiskEvent};

/// Why a session ended in an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
    /// The user answered "no" to "are you safe?".
    Declined,
    /// No answer before the question countdown ran out.
    QuestionTimeout,
    /// The entered code did not match.
    WrongCode,
    /// No code before the code-entry countdown ran out.
    CodeTimeout,
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Declined => "user reported not safe",
            Self::QuestionTimeout => "no response to safety check",
            Self::WrongCode => "incorrect safety code",
            Self::CodeTimeout => "safety code not entered in time",
        })
    }
}

/// Terminal outcome of one safety-check session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Safe,
    Alerting(AlertReason),
    /// The trip ended while the session was open. Nothing is dispatched.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckState {
    #[default]
    Idle,
    Questioning {
        remaining: u32,
    },
    CodeEntry {
        remaining: u32,
    },
    Resolved {
        outcome: Outcome,
    },
}

impl CheckState {
    /// A session is open while a question or code entry is pending.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Questioning { .. } | Self::CodeEntry { .. })
    }

    /// Seconds left on the running countdown, if any.
    pub fn remaining(&self) -> Option<u32> {
        match self {
            Self::Questioning { remaining } | Self::CodeEntry { remaining } => Some(*remaining),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Questioning { .. } => "questioning",
            Self::CodeEntry { .. } => "code_entry",
            Self::Resolved { outcome: Outcome::Safe } => "resolved_safe",
            Self::Resolved {
                outcome: Outcome::Alerting(_),
            } => "resolved_alerting",
            Self::Resolved {
                outcome: Outcome::Cancelled,
            } => "resolved_cancelled",
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckInput {
    Risk(RiskEvent),
    /// Answer to "are you safe?".
    Answer(bool),
    Code(String),
    /// One second elapsed on the countdown of the given generation.
    Tick { generation: u64 },
    /// The trip is ending.
    Cancel,
}

impl CheckInput {
    fn name(&self) -> &'static str {
        match self {
            Self::Risk(_) => "risk",
            Self::Answer(true) => "answer_yes",
            Self::Answer(false) => "answer_no",
            Self::Code(_) => "code",
            Self::Tick { .. } => "tick",
            Self::Cancel => "cancel",
        }
    }
}

/// Work the runtime performs after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Pause risk evaluation while the user is being asked.
    SuspendSensing,
    Vibrate,
    StartCountdown { generation: u64, secs: u32 },
    CancelCountdown { generation: u64 },
    /// Invoke the alert dispatcher. Emitted at most once per session.
    DispatchAlert { risk: RiskEvent, reason: AlertReason },
    /// Return the trip to normal monitoring.
    ResumeMonitoring,
}

/// Escalation settings captured when the machine is built.
#[derive(Debug, Clone)]
pub struct Policy {
    pub countdown_secs: u32,
    pub safety_code: Option<String>,
    pub vibrate: bool,
}

impl From<&EscalationConfig> for Policy {
    fn from(config: &EscalationConfig) -> Self {
        Self {
            countdown_secs: config.countdown_secs,
            safety_code: config.safety_code.clone(),
            vibrate: config.vibrate,
        }
    }
}

impl Policy {
    /// Only a configured, well-formed code can ever match.
    pub fn code_matches(&self, entered: &str) -> bool {
        match self.safety_code.as_deref() {
            Some(expected) => is_valid_safety_code(expected) && entered.trim() == expected,
            None => false,
        }
    }
}

/// The risk that opened a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyCheckSession {
    pub id: Uuid,
    pub risk: RiskEvent,
    pub opened_at: DateTime<Utc>,
}

/// Machine value: state, the current session, and the countdown generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscalationMachine {
    pub state: CheckState,
    pub session: Option<SafetyCheckSession>,
    /// Generation of the countdown that is allowed to tick. Bumped on every start and cancel.
    pub generation: u64,
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: EscalationMachine,
    pub effects: Vec<Effect>,
    /// Set when this step resolved the open session.
    pub outcome: Option<Outcome>,
}

impl Transition {
    fn unchanged(machine: &EscalationMachine) -> Self {
        Self {
            next: machine.clone(),
            effects: Vec::new(),
            outcome: None,
        }
    }
}

impl EscalationMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Advance by one input. Errors leave the caller's machine untouched.
    ///
    /// - a risk while a session is open is refused with `SessionAlreadyOpen`;
    /// - answers and codes outside their states are refused;
    /// - ticks from a stale generation, or with no countdown running, change nothing.
    pub fn step(&self, input: &CheckInput, policy: &Policy) -> Result<Transition> {
        let mut next = self.clone();
        let mut effects = Vec::new();

        match (&self.state, input) {
            // ── Open a session ───
            (CheckState::Idle | CheckState::Resolved { outcome: Outcome::Safe }, CheckInput::Risk(risk)) => {
                next.session = Some(SafetyCheckSession {
                    id: Uuid::new_v4(),
                    risk: risk.clone(),
                    opened_at: Utc::now(),
                });
                next.state = CheckState::Questioning {
                    remaining: policy.countdown_secs,
                };
                effects.push(Effect::SuspendSensing);
                if policy.vibrate {
                    effects.push(Effect::Vibrate);
                }
                next.generation += 1;
                effects.push(Effect::StartCountdown {
                    generation: next.generation,
                    secs: policy.countdown_secs,
                });
            }
            (state, CheckInput::Risk(_)) if state.is_open() => {
                let id = self.session.as_ref().map(|s| s.id).unwrap_or_default();
                return Err(NirbhayError::SessionAlreadyOpen(id));
            }

            // ── Questioning ───
            (CheckState::Questioning { .. }, CheckInput::Answer(true)) => {
                effects.push(Effect::CancelCountdown {
                    generation: self.generation,
                });
                next.generation += 1;
                next.state = CheckState::CodeEntry {
                    remaining: policy.countdown_secs,
                };
                effects.push(Effect::StartCountdown {
                    generation: next.generation,
                    secs: policy.countdown_secs,
                });
            }
            (CheckState::Questioning { .. }, CheckInput::Answer(false)) => {
                self.alert(&mut next, &mut effects, AlertReason::Declined);
            }

            // ── Code entry ───
            // One attempt only: any code resolves the session.
            (CheckState::CodeEntry { .. }, CheckInput::Code(code)) => {
                if policy.code_matches(code) {
                    self.resolve(&mut next, &mut effects, Outcome::Safe);
                    effects.push(Effect::ResumeMonitoring);
                } else {
                    self.alert(&mut next, &mut effects, AlertReason::WrongCode);
                }
            }

            // ── Countdown ───
            (CheckState::Questioning { remaining }, CheckInput::Tick { generation })
                if *generation == self.generation =>
            {
                match remaining.saturating_sub(1) {
                    0 => self.alert(&mut next, &mut effects, AlertReason::QuestionTimeout),
                    left => next.state = CheckState::Questioning { remaining: left },
                }
            }
            (CheckState::CodeEntry { remaining }, CheckInput::Tick { generation })
                if *generation == self.generation =>
            {
                match remaining.saturating_sub(1) {
                    0 => self.alert(&mut next, &mut effects, AlertReason::CodeTimeout),
                    left => next.state = CheckState::CodeEntry { remaining: left },
                }
            }
            (_, CheckInput::Tick { .. }) => return Ok(Transition::unchanged(self)),

            // ── Trip ending ───
            (state, CheckInput::Cancel) if state.is_open() => {
                self.resolve(&mut next, &mut effects, Outcome::Cancelled);
            }
            (_, CheckInput::Cancel) => return Ok(Transition::unchanged(self)),

            (state, CheckInput::Answer(_) | CheckInput::Code(_)) if !state.is_open() => {
                return Err(NirbhayError::NoOpenSession);
            }
            (state, input) => {
                return Err(NirbhayError::UnexpectedInput {
                    state: state.to_string(),
                    input: input.name().to_string(),
                });
            }
        }

        let outcome = match next.state {
            CheckState::Resolved { outcome } if self.state.is_open() => Some(outcome),
            _ => None,
        };
        Ok(Transition {
            next,
            effects,
            outcome,
        })
    }

    fn resolve(&self, next: &mut EscalationMachine, effects: &mut Vec<Effect>, outcome: Outcome) {
        effects.push(Effect::CancelCountdown {
            generation: self.generation,
        });
        next.generation += 1;
        next.state = CheckState::Resolved { outcome };
    }

    fn alert(&self, next: &mut EscalationMachine, effects: &mut Vec<Effect>, reason: AlertReason) {
        self.resolve(next, effects, Outcome::Alerting(reason));
        if let Some(session) = &self.session {
            effects.push(Effect::DispatchAlert {
                risk: session.risk.clone(),
                reason,
            });
        }
    }
}
