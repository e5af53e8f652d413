//! Connector Lifecycle State Machine
//!
//! Defines valid lifecycle transitions for a connector instance. A connector
//! walks this machine exactly once; `Stopped` and `Error` are terminal and a
//! fresh instance is required to try again.

use std::fmt;

/// Lifecycle states of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorState {
    Init,
    StartingUp,
    Started,
    ShuttingDown,
    Stopped,
    Error,
}

impl ConnectorState {
    /// No transition leaves a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectorState::Stopped | ConnectorState::Error)
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectorState::Init => "INIT",
            ConnectorState::StartingUp => "STARTING_UP",
            ConnectorState::Started => "STARTED",
            ConnectorState::ShuttingDown => "SHUTTING_DOWN",
            ConnectorState::Stopped => "STOPPED",
            ConnectorState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `start()` was called
    StartRequested,
    /// Configure and start steps completed
    StartSucceeded,
    /// `stop()` was called
    StopRequested,
    /// Stop step completed
    StopSucceeded,
    /// A configure, start or stop step failed
    Failed,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(ConnectorState),
    /// Transition was invalid from current state
    Invalid {
        from: ConnectorState,
        event: LifecycleEvent,
    },
}

/// The lifecycle state machine owned by every connector
#[derive(Debug)]
pub struct ConnectorStateMachine {
    current_state: ConnectorState,
}

impl Default for ConnectorStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorStateMachine {
    /// Create a new state machine in Init state
    pub fn new() -> Self {
        Self {
            current_state: ConnectorState::Init,
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectorState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LifecycleEvent) -> TransitionResult {
        match self.get_next_state(event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn get_next_state(&self, event: LifecycleEvent) -> Option<ConnectorState> {
        use ConnectorState::*;
        use LifecycleEvent::*;

        match (self.current_state, event) {
            (Init, StartRequested) => Some(StartingUp),
            (StartingUp, StartSucceeded) => Some(Started),
            (Started, StopRequested) => Some(ShuttingDown),
            (ShuttingDown, StopSucceeded) => Some(Stopped),

            // Failures only happen while a step is running
            (StartingUp | ShuttingDown, Failed) => Some(Error),

            _ => None,
        }
    }
}

/// Check if a transition from one state to another is valid
pub fn is_valid_transition(from: ConnectorState, to: ConnectorState) -> bool {
    use ConnectorState::*;

    matches!(
        (from, to),
        (Init, StartingUp)
            | (StartingUp, Started)
            | (StartingUp, Error)
            | (Started, ShuttingDown)
            | (ShuttingDown, Stopped)
            | (ShuttingDown, Error)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = ConnectorStateMachine::new();
        assert_eq!(fsm.state(), ConnectorState::Init);
    }

    #[test]
    fn test_normal_lifecycle() {
        let mut fsm = ConnectorStateMachine::new();

        let result = fsm.process_event(LifecycleEvent::StartRequested);
        assert_eq!(result, TransitionResult::Success(ConnectorState::StartingUp));

        let result = fsm.process_event(LifecycleEvent::StartSucceeded);
        assert_eq!(result, TransitionResult::Success(ConnectorState::Started));

        let result = fsm.process_event(LifecycleEvent::StopRequested);
        assert_eq!(result, TransitionResult::Success(ConnectorState::ShuttingDown));

        let result = fsm.process_event(LifecycleEvent::StopSucceeded);
        assert_eq!(result, TransitionResult::Success(ConnectorState::Stopped));
        assert!(fsm.state().is_terminal());
    }

    #[test]
    fn test_failure_during_start_is_terminal() {
        let mut fsm = ConnectorStateMachine::new();
        fsm.process_event(LifecycleEvent::StartRequested);

        let result = fsm.process_event(LifecycleEvent::Failed);
        assert_eq!(result, TransitionResult::Success(ConnectorState::Error));

        // No reset out of Error
        let result = fsm.process_event(LifecycleEvent::StartRequested);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), ConnectorState::Error);
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut fsm = ConnectorStateMachine::new();

        // Can't stop before starting
        let result = fsm.process_event(LifecycleEvent::StopRequested);
        assert_eq!(
            result,
            TransitionResult::Invalid {
                from: ConnectorState::Init,
                event: LifecycleEvent::StopRequested,
            }
        );
        assert_eq!(fsm.state(), ConnectorState::Init);

        // Failed is meaningless when no step is running
        let result = fsm.process_event(LifecycleEvent::Failed);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), ConnectorState::Init);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ConnectorState::StartingUp.to_string(), "STARTING_UP");
        assert_eq!(ConnectorState::ShuttingDown.to_string(), "SHUTTING_DOWN");
    }

    #[test]
    fn test_static_transitions() {
        assert!(is_valid_transition(ConnectorState::Init, ConnectorState::StartingUp));
        assert!(is_valid_transition(ConnectorState::ShuttingDown, ConnectorState::Error));
        assert!(!is_valid_transition(ConnectorState::Error, ConnectorState::Init));
        assert!(!is_valid_transition(ConnectorState::Stopped, ConnectorState::StartingUp));
    }
}
