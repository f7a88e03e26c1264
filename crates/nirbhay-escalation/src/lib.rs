//! # nirbhay-escalation
//!
//! When a risk is detected the traveller is asked whether they are safe and,
//! if they say yes, for their safety code. Silence, "no", or a wrong code all
//! end in an alert. The machine is pure; [`Countdown`] is the only piece that
//! touches the clock.

pub mod countdown;
pub mod machine;

pub use countdown::{Countdown, CountdownTick};
pub use machine::{
    AlertReason, CheckInput, CheckState, Effect, EscalationMachine, Outcome, Policy, SafetyCheckSession, Transition,
};
