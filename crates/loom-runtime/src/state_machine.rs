//! Turn state machine.
//!
//! ```text
//! idle          -> planning
//! planning      -> data_fetching | analyzing | presenting | completed
//! data_fetching -> analyzing | presenting | error
//! analyzing     -> presenting | data_fetching | error
//! presenting    -> completed | analyzing | error
//! error         -> planning | completed
//! ```
//!
//! Forced moves to `error` bypass the table.

use loom_core::{TurnId, now_rfc3339};
use loom_events::TurnState;
use loom_events::types::StateTransitionPayload;

use crate::errors::{ReasonCode, Result, RuntimeError};

/// Whether `from -> to` is in the transition table.
#[must_use]
pub fn is_allowed(from: TurnState, to: TurnState) -> bool {
    use TurnState::{Analyzing, Completed, DataFetching, Error, Idle, Planning, Presenting};
    matches!(
        (from, to),
        (Idle, Planning)
            | (Planning, DataFetching | Analyzing | Presenting | Completed)
            | (DataFetching, Analyzing | Presenting | Error)
            | (Analyzing, Presenting | DataFetching | Error)
            | (Presenting, Completed | Analyzing | Error)
            | (Error, Planning | Completed)
    )
}

/// Tracks one turn's current state and produces transition payloads.
#[derive(Debug)]
pub struct TurnStateMachine {
    turn_id: TurnId,
    state: TurnState,
}

impl TurnStateMachine {
    /// Machine for a new turn, starting from the worldline's last state
    /// (`idle` unless the previous turn ended in `error`).
    #[must_use]
    pub fn new(turn_id: TurnId, previous: Option<TurnState>) -> Self {
        let state = match previous {
            Some(TurnState::Error) => TurnState::Error,
            _ => TurnState::Idle,
        };
        Self { turn_id, state }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Turn id.
    #[must_use]
    pub fn turn_id(&self) -> &TurnId {
        &self.turn_id
    }

    /// Whether the turn reached `completed` or `error`.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// The opening move into `planning`.
    pub fn start(&mut self) -> Result<StateTransitionPayload> {
        let reason = if self.state == TurnState::Error {
            ReasonCode::ResumedAfterError
        } else {
            ReasonCode::TurnStarted
        };
        self.transition(TurnState::Planning, reason)?
            .ok_or(RuntimeError::InvalidTransition {
                from: self.state,
                to: TurnState::Planning,
            })
    }

    /// Move to `to`. Staying in the current state is not a transition and
    /// yields `None`.
    pub fn transition(
        &mut self,
        to: TurnState,
        reason: ReasonCode,
    ) -> Result<Option<StateTransitionPayload>> {
        if to == self.state {
            return Ok(None);
        }
        if !is_allowed(self.state, to) {
            return Err(RuntimeError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        Ok(Some(self.record(to, reason)))
    }

    /// Move to `error` regardless of the table.
    pub fn force_error(&mut self, reason: ReasonCode) -> StateTransitionPayload {
        self.record(TurnState::Error, reason)
    }

    fn record(&mut self, to: TurnState, reason: ReasonCode) -> StateTransitionPayload {
        let payload = StateTransitionPayload {
            turn_id: self.turn_id.clone(),
            from_state: self.state,
            to_state: to,
            reason: reason.as_str().to_string(),
            timestamp: now_rfc3339(),
        };
        self.state = to;
        payload
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const ALL: [TurnState; 7] = [
        TurnState::Idle,
        TurnState::Planning,
        TurnState::DataFetching,
        TurnState::Analyzing,
        TurnState::Presenting,
        TurnState::Completed,
        TurnState::Error,
    ];

    #[test]
    fn table_has_exactly_the_listed_edges() {
        let allowed: usize = ALL
            .iter()
            .map(|&from| ALL.iter().filter(|&&to| is_allowed(from, to)).count())
            .sum();
        assert_eq!(allowed, 1 + 4 + 3 + 3 + 3 + 2);
        assert!(!is_allowed(TurnState::Completed, TurnState::Planning));
        assert!(!is_allowed(TurnState::Planning, TurnState::Error));
        assert!(!is_allowed(TurnState::DataFetching, TurnState::Completed));
    }

    #[test]
    fn fresh_turn_starts_from_idle() {
        let mut sm = TurnStateMachine::new(TurnId::from("turn_1"), Some(TurnState::Completed));
        let t = sm.start().unwrap();
        assert_eq!((t.from_state, t.to_state), (TurnState::Idle, TurnState::Planning));
        assert_eq!(t.reason, "turn_started");
    }

    #[test]
    fn turn_after_error_resumes() {
        let mut sm = TurnStateMachine::new(TurnId::from("turn_2"), Some(TurnState::Error));
        let t = sm.start().unwrap();
        assert_eq!((t.from_state, t.to_state), (TurnState::Error, TurnState::Planning));
        assert_eq!(t.reason, "resumed_after_error");
    }

    #[test]
    fn same_state_is_not_a_transition() {
        let mut sm = TurnStateMachine::new(TurnId::from("turn_1"), None);
        let _ = sm.start().unwrap();
        assert!(sm.transition(TurnState::DataFetching, ReasonCode::ToolSelected).unwrap().is_some());
        assert!(sm.transition(TurnState::DataFetching, ReasonCode::ToolSelected).unwrap().is_none());
        assert_eq!(sm.state(), TurnState::DataFetching);
    }

    #[test]
    fn invalid_move_rejected_without_changing_state() {
        let mut sm = TurnStateMachine::new(TurnId::from("turn_1"), None);
        let _ = sm.start().unwrap();
        let _ = sm.transition(TurnState::DataFetching, ReasonCode::ToolSelected).unwrap();
        let err = sm.transition(TurnState::Completed, ReasonCode::FinalMessage).unwrap_err();
        assert_matches!(
            err,
            RuntimeError::InvalidTransition { from: TurnState::DataFetching, to: TurnState::Completed }
        );
        assert_eq!(sm.state(), TurnState::DataFetching);
    }

    #[test]
    fn force_error_bypasses_table() {
        let mut sm = TurnStateMachine::new(TurnId::from("turn_1"), None);
        let _ = sm.start().unwrap();
        let t = sm.force_error(ReasonCode::IterationCapReached);
        assert_eq!((t.from_state, t.to_state), (TurnState::Planning, TurnState::Error));
        assert_eq!(t.reason, "iteration_cap_reached");
        assert!(sm.is_finished());
    }
}
