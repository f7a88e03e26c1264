//! # nirbhay-risk
//!
//! Fixed, explainable risk rules evaluated over a short window of motion
//! readings and location points. Rules are checked in priority order and the
//! first match produces the single [`RiskEvent`](nirbhay_core::RiskEvent)
//! for the tick.

pub mod engine;
pub mod rules;

pub use engine::{RiskEngine, RiskWindow};
pub use rules::{RiskRule, RuleContext, is_night};
