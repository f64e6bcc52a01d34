/// Single ordered task feeding watch events to their handlers.
pub mod dispatcher;
/// One-shot election of the first mover.
pub mod election;
/// Startup, turn loop and result screen of a participant.
pub mod lifecycle;
/// Registry watching and the disconnection grace period.
pub mod membership;
/// Serialized board mutation under the move lock.
pub mod mutation_gate;
/// Layout and lifecycle of the shared entries of a match.
pub mod namespace;
/// Forfeiture and final outcome reads.
pub mod outcome;
/// Turn marker handling and the turn-timeout countdown.
pub mod turn_sequencer;
