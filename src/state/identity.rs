use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role a process plays in the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// First player seat, drawn as `X`.
    #[serde(rename = "player1")]
    PlayerOne,
    /// Second player seat, drawn as `O`.
    #[serde(rename = "player2")]
    PlayerTwo,
    /// Read-only spectator; never registers and never moves.
    #[serde(rename = "observer")]
    Observer,
}

/// Returned when an identity prompt receives something other than a known role.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown identity `{0}`; expected player1, player2 or observer")]
pub struct UnknownIdentity(pub String);

impl Identity {
    /// Name stored in shared entries and used as the registry marker.
    pub const fn as_str(self) -> &'static str {
        match self {
            Identity::PlayerOne => "player1",
            Identity::PlayerTwo => "player2",
            Identity::Observer => "observer",
        }
    }

    /// True for the two seats that take turns.
    pub const fn is_player(self) -> bool {
        !matches!(self, Identity::Observer)
    }

    /// The other seat; observers have none.
    pub const fn opponent(self) -> Option<Identity> {
        match self {
            Identity::PlayerOne => Some(Identity::PlayerTwo),
            Identity::PlayerTwo => Some(Identity::PlayerOne),
            Identity::Observer => None,
        }
    }

    /// Board glyph.
    pub const fn symbol(self) -> char {
        match self {
            Identity::PlayerOne => 'X',
            Identity::PlayerTwo => 'O',
            Identity::Observer => '?',
        }
    }

    /// Decode a player seat from a shared entry; empty or foreign payloads yield `None`.
    pub fn from_wire(bytes: &[u8]) -> Option<Identity> {
        match bytes {
            b"player1" => Some(Identity::PlayerOne),
            b"player2" => Some(Identity::PlayerTwo),
            _ => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Identity {
    type Err = UnknownIdentity;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "player1" | "player-one" => Ok(Identity::PlayerOne),
            "player2" | "player-two" => Ok(Identity::PlayerTwo),
            "observer" | "spectator" => Ok(Identity::Observer),
            _ => Err(UnknownIdentity(value.trim().to_owned())),
        }
    }
}

/// Terminal decision stored in the `winner` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// One seat won.
    Winner(Identity),
    /// The grid filled up without a four-in-a-row.
    Draw,
}

impl Verdict {
    /// Payload written to the `winner` entry.
    pub const fn as_str(self) -> &'static str {
        match self {
            Verdict::Winner(identity) => identity.as_str(),
            Verdict::Draw => "draw",
        }
    }

    /// Decode the `winner` entry; empty means undecided.
    pub fn from_wire(bytes: &[u8]) -> Option<Verdict> {
        match bytes {
            b"draw" => Some(Verdict::Draw),
            other => Identity::from_wire(other).map(Verdict::Winner),
        }
    }

    /// The winning seat, if any.
    pub fn winner(self) -> Option<Identity> {
        match self {
            Verdict::Winner(identity) => Some(identity),
            Verdict::Draw => None,
        }
    }

    /// The losing seat, if any.
    pub fn loser(self) -> Option<Identity> {
        self.winner().and_then(Identity::opponent)
    }
}

/// Why the match ended, stored in the `outcome_reason` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeReason {
    /// The winner lined up four discs.
    FourInARow,
    /// The loser let its turn expire.
    Timeout,
    /// The loser stayed away longer than the grace period.
    Disconnection,
    /// Nobody can move any more.
    BoardFull,
}

impl OutcomeReason {
    /// Payload written to the `outcome_reason` entry.
    pub const fn as_str(self) -> &'static str {
        match self {
            OutcomeReason::FourInARow => "four-in-a-row",
            OutcomeReason::Timeout => "timeout",
            OutcomeReason::Disconnection => "disconnection",
            OutcomeReason::BoardFull => "board-full",
        }
    }

    /// Decode the `outcome_reason` entry; empty or unknown payloads yield `None`.
    pub fn from_wire(bytes: &[u8]) -> Option<OutcomeReason> {
        match bytes {
            b"four-in-a-row" => Some(OutcomeReason::FourInARow),
            b"timeout" => Some(OutcomeReason::Timeout),
            b"disconnection" => Some(OutcomeReason::Disconnection),
            b"board-full" => Some(OutcomeReason::BoardFull),
            _ => None,
        }
    }
}

impl fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_accepts_aliases_case_insensitively() {
        assert_eq!(" Player1 ".parse::<Identity>(), Ok(Identity::PlayerOne));
        assert_eq!("player-two".parse::<Identity>(), Ok(Identity::PlayerTwo));
        assert_eq!("SPECTATOR".parse::<Identity>(), Ok(Identity::Observer));
        assert_eq!(
            "referee".parse::<Identity>(),
            Err(UnknownIdentity("referee".into()))
        );
    }

    #[test]
    fn turn_payload_only_names_players() {
        assert_eq!(Identity::from_wire(b"player2"), Some(Identity::PlayerTwo));
        assert_eq!(Identity::from_wire(b"observer"), None);
        assert_eq!(Identity::from_wire(b""), None);
    }

    #[test]
    fn verdict_reports_both_sides() {
        let verdict = Verdict::from_wire(b"player1").unwrap();
        assert_eq!(verdict.winner(), Some(Identity::PlayerOne));
        assert_eq!(verdict.loser(), Some(Identity::PlayerTwo));
        assert_eq!(Verdict::from_wire(b"draw"), Some(Verdict::Draw));
        assert_eq!(Verdict::Draw.loser(), None);
        assert_eq!(Verdict::from_wire(b""), None);
    }

    #[test]
    fn reasons_use_stable_names() {
        for reason in [
            OutcomeReason::FourInARow,
            OutcomeReason::Timeout,
            OutcomeReason::Disconnection,
            OutcomeReason::BoardFull,
        ] {
            assert_eq!(OutcomeReason::from_wire(reason.as_str().as_bytes()), Some(reason));
        }
    }
}
