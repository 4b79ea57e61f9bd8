use std::fmt;

use log::debug;

use crate::error::DispatchError;

/// Where a dispatch run is
///
/// Assembling, Submitting, Monitoring and Terminating repeat once per mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    Validating,
    Resolving,
    Assembling,
    Submitting,
    Monitoring,
    Terminating,
    Summarizing,
    Done,
    Failed,
}

impl RunState {
    pub fn can_move_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Validating, Resolving | Assembling | Summarizing) => true,
            (Resolving, Assembling | Summarizing) => true,
            (Assembling, Assembling | Submitting | Monitoring | Summarizing) => true,
            (Submitting, Submitting | Terminating | Assembling | Monitoring | Summarizing) => true,
            (Terminating, Submitting | Assembling | Summarizing) => true,
            (Monitoring, Monitoring | Assembling | Summarizing) => true,
            (Summarizing, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RunState::Validating => "validating",
            RunState::Resolving => "resolving",
            RunState::Assembling => "assembling",
            RunState::Submitting => "submitting",
            RunState::Monitoring => "monitoring",
            RunState::Terminating => "terminating",
            RunState::Summarizing => "summarizing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// The current state, only moved along allowed transitions
#[derive(Debug)]
pub struct Progress {
    state: RunState,
}

impl Progress {
    pub fn new() -> Progress {
        Progress { state: RunState::Validating }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), DispatchError> {
        if !self.state.can_move_to(next) {
            return Err(DispatchError::Transition { from: self.state.to_string(), to: next.to_string() });
        }
        debug!("Run state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_allowed() {
        let mut progress = Progress::new();
        for next in [
            RunState::Resolving,
            RunState::Assembling,
            RunState::Submitting,
            RunState::Monitoring,
            RunState::Assembling,
            RunState::Submitting,
            RunState::Terminating,
            RunState::Submitting,
            RunState::Summarizing,
            RunState::Done,
        ] {
            progress.advance(next).unwrap();
        }
        assert_eq!(progress.state(), RunState::Done);
    }

    #[test]
    fn failed_is_reachable_but_final() {
        let mut progress = Progress::new();
        progress.advance(RunState::Resolving).unwrap();
        progress.advance(RunState::Failed).unwrap();
        assert!(progress.advance(RunState::Summarizing).is_err());
    }

    #[test]
    fn skipping_ahead_is_rejected() {
        let mut progress = Progress::new();
        assert!(matches!(progress.advance(RunState::Monitoring), Err(DispatchError::Transition { .. })));
        assert!(!RunState::Summarizing.can_move_to(RunState::Assembling));
    }
}
