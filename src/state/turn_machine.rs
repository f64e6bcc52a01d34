use thiserror::Error;

/// Phases a player process moves through during one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Registered, but the registry has not reached two members yet.
    WaitingForOpponent,
    /// The turn marker names the opponent.
    WaitingForMyTurn,
    /// The turn marker names this process; a move is expected.
    MyTurnActive,
    /// A terminal outcome has been recorded; nothing else may happen.
    GameOver,
}

/// Events fed into the machine by the watch handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    /// The registry holds at least two players.
    QuorumReached,
    /// The turn marker changed to a non-empty value.
    TurnAssigned {
        /// Whether the marker names this process.
        mine: bool,
    },
    /// The `winner` entry became non-empty.
    OutcomeRecorded,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the machine was in when the event was received.
    pub from: TurnPhase,
    /// The event that cannot be applied from this phase.
    pub event: TurnEvent,
}

/// Local turn state machine; `version` counts applied transitions.
#[derive(Debug, Clone)]
pub struct TurnMachine {
    phase: TurnPhase,
    version: usize,
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self {
            phase: TurnPhase::WaitingForOpponent,
            version: 0,
        }
    }
}

impl TurnMachine {
    /// Create a machine waiting for the opponent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Apply `event`, returning the new phase.
    pub fn apply(&mut self, event: TurnEvent) -> Result<TurnPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        if next != self.phase {
            self.phase = next;
            self.version += 1;
        }
        Ok(next)
    }

    fn compute_transition(&self, event: TurnEvent) -> Result<TurnPhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (TurnPhase::GameOver, event) => {
                return Err(InvalidTransition {
                    from: TurnPhase::GameOver,
                    event,
                });
            }
            (_, TurnEvent::OutcomeRecorded) => TurnPhase::GameOver,
            (_, TurnEvent::TurnAssigned { mine: true }) => TurnPhase::MyTurnActive,
            (_, TurnEvent::TurnAssigned { mine: false }) => TurnPhase::WaitingForMyTurn,
            (TurnPhase::WaitingForOpponent, TurnEvent::QuorumReached) => {
                TurnPhase::WaitingForMyTurn
            }
            // Quorum regained mid-match leaves the turn where it was.
            (phase, TurnEvent::QuorumReached) => phase,
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_waits_for_opponent() {
        let sm = TurnMachine::new();
        assert_eq!(sm.phase(), TurnPhase::WaitingForOpponent);
        assert_eq!(sm.version(), 0);
    }

    #[test]
    fn turns_alternate_until_outcome() {
        let mut sm = TurnMachine::new();
        assert_eq!(
            sm.apply(TurnEvent::QuorumReached),
            Ok(TurnPhase::WaitingForMyTurn)
        );
        assert_eq!(
            sm.apply(TurnEvent::TurnAssigned { mine: true }),
            Ok(TurnPhase::MyTurnActive)
        );
        assert_eq!(
            sm.apply(TurnEvent::TurnAssigned { mine: false }),
            Ok(TurnPhase::WaitingForMyTurn)
        );
        assert_eq!(sm.apply(TurnEvent::OutcomeRecorded), Ok(TurnPhase::GameOver));
        assert_eq!(sm.version(), 4);
    }

    #[test]
    fn turn_may_arrive_before_quorum_is_seen() {
        let mut sm = TurnMachine::new();
        assert_eq!(
            sm.apply(TurnEvent::TurnAssigned { mine: true }),
            Ok(TurnPhase::MyTurnActive)
        );
        assert_eq!(sm.apply(TurnEvent::QuorumReached), Ok(TurnPhase::MyTurnActive));
        assert_eq!(sm.version(), 1);
    }

    #[test]
    fn game_over_is_terminal() {
        let mut sm = TurnMachine::new();
        sm.apply(TurnEvent::OutcomeRecorded).unwrap();

        let err = sm.apply(TurnEvent::TurnAssigned { mine: true }).unwrap_err();
        assert_eq!(err.from, TurnPhase::GameOver);
        assert_eq!(err.event, TurnEvent::TurnAssigned { mine: true });
        assert!(sm.apply(TurnEvent::OutcomeRecorded).is_err());
    }
}
