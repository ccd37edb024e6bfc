pub mod doctor;
pub mod phase;
pub mod pid;

use thiserror::Error;

pub use phase::{ControlMode, FlightPhase, PhaseConfig, PhaseMachine, StepInput, StepOutcome, Transition, TransitionReason};
pub use pid::{Axis, Pid, PidConfig, PidGains};

/// A parameter was rejected where it was applied. The previous value stays in force.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ConfigError {
    pub field: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { field: field.into(), reason: reason.into() }
    }
}
