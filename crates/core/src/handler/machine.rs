//! Explicit handler lifecycle state machine.
//!
//! Every run walks the ordered states in sequence; any ordered state can
//! divert to the error-notification path. The transition table is data, so
//! the legal lifecycle is auditable in one place and illegal jumps fail
//! loudly instead of silently corrupting a run.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initial,
    Initialised,
    Resolved,
    Preprocessed,
    Checked,
    Processed,
    Published,
    Postprocessed,
    NotifiedSuccess,
    NotifiedError,
    CompletedSuccess,
    CompletedError,
}

impl State {
    /// States on the forward path, from which an error diversion is legal.
    fn is_ordered(self) -> bool {
        !matches!(
            self,
            State::NotifiedSuccess
                | State::NotifiedError
                | State::CompletedSuccess
                | State::CompletedError
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, State::CompletedSuccess | State::CompletedError)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Initialise,
    Resolve,
    Preprocess,
    Check,
    Process,
    Publish,
    Postprocess,
    NotifySuccess,
    NotifyError,
    CompleteSuccess,
    CompleteError,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("illegal lifecycle transition: {trigger} from {state}")]
pub struct MachineError {
    pub state: State,
    pub trigger: Trigger,
}

const FORWARD: [(State, Trigger, State); 9] = [
    (State::Initial, Trigger::Initialise, State::Initialised),
    (State::Initialised, Trigger::Resolve, State::Resolved),
    (State::Resolved, Trigger::Preprocess, State::Preprocessed),
    (State::Preprocessed, Trigger::Check, State::Checked),
    (State::Checked, Trigger::Process, State::Processed),
    (State::Processed, Trigger::Publish, State::Published),
    (State::Published, Trigger::Postprocess, State::Postprocessed),
    (State::Postprocessed, Trigger::NotifySuccess, State::NotifiedSuccess),
    (State::NotifiedSuccess, Trigger::CompleteSuccess, State::CompletedSuccess),
];

pub struct StateMachine {
    state: State,
}

impl StateMachine {
    pub fn new() -> Self {
        debug_assert!(Self::table_is_coherent());
        Self {
            state: State::Initial,
        }
    }

    /// Each ordered state must have exactly one forward transition out of
    /// it, ending at the success terminal.
    fn table_is_coherent() -> bool {
        let mut state = State::Initial;
        for (from, _, to) in FORWARD {
            if from != state {
                return false;
            }
            state = to;
        }
        state == State::CompletedSuccess
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn next(&self, trigger: Trigger) -> Option<State> {
        match trigger {
            Trigger::NotifyError if self.state.is_ordered() => Some(State::NotifiedError),
            Trigger::CompleteError if self.state == State::NotifiedError => {
                Some(State::CompletedError)
            }
            _ => FORWARD
                .iter()
                .find(|(from, t, _)| *from == self.state && *t == trigger)
                .map(|(_, _, to)| *to),
        }
    }

    pub fn fire(&mut self, trigger: Trigger) -> Result<State, MachineError> {
        match self.next(trigger) {
            Some(next) => {
                self.state = next;
                Ok(next)
            }
            None => Err(MachineError {
                state: self.state,
                trigger,
            }),
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_success_walk() {
        let mut machine = StateMachine::new();
        let triggers = [
            Trigger::Initialise,
            Trigger::Resolve,
            Trigger::Preprocess,
            Trigger::Check,
            Trigger::Process,
            Trigger::Publish,
            Trigger::Postprocess,
            Trigger::NotifySuccess,
            Trigger::CompleteSuccess,
        ];
        for trigger in triggers {
            machine.fire(trigger).unwrap();
        }
        assert_eq!(machine.state(), State::CompletedSuccess);
        assert!(machine.state().is_terminal());
    }

    #[test]
    fn out_of_order_triggers_are_rejected() {
        let mut machine = StateMachine::new();
        let err = machine.fire(Trigger::Publish).unwrap_err();
        assert_eq!(err.state, State::Initial);
        assert_eq!(err.trigger, Trigger::Publish);
        // The failed fire leaves the state untouched.
        assert_eq!(machine.state(), State::Initial);
    }

    #[test]
    fn error_diversion_is_legal_from_every_ordered_state() {
        for stop_after in 0..=7 {
            let mut machine = StateMachine::new();
            let triggers = [
                Trigger::Initialise,
                Trigger::Resolve,
                Trigger::Preprocess,
                Trigger::Check,
                Trigger::Process,
                Trigger::Publish,
                Trigger::Postprocess,
            ];
            for trigger in triggers.iter().take(stop_after) {
                machine.fire(*trigger).unwrap();
            }
            machine.fire(Trigger::NotifyError).unwrap();
            machine.fire(Trigger::CompleteError).unwrap();
            assert_eq!(machine.state(), State::CompletedError);
        }
    }

    #[test]
    fn no_exit_from_terminal_states() {
        let mut machine = StateMachine::new();
        machine.fire(Trigger::NotifyError).unwrap();
        machine.fire(Trigger::CompleteError).unwrap();
        assert!(machine.fire(Trigger::Initialise).is_err());
        assert!(machine.fire(Trigger::NotifyError).is_err());
    }
}
