//! Fixed hierarchy of shared entries a match lives in.
//!
//! ```text
//! <root>/players/<identity>   ephemeral presence markers
//! <root>/board                JSON grid
//! <root>/turn                 identity expected to move, or empty
//! <root>/winner               write-once verdict, or empty
//! <root>/outcome_reason       reason paired with the verdict, or empty
//! <root>/election             one-shot first-mover election
//! <root>/reset_lock           serializes match resets
//! <root>/move_lock            serializes board mutations
//! ```

use tracing::{debug, info, warn};

use crate::{
    coord::{CoordError, CreateMode, SharedCoordinator, join},
    error::MatchError,
    state::{
        board::Board,
        identity::{Identity, OutcomeReason, Verdict},
    },
};

/// Terminal outcome as read back from the namespace; either half may still be missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutcomeSnapshot {
    /// Content of `winner`.
    pub verdict: Option<Verdict>,
    /// Content of `outcome_reason`.
    pub reason: Option<OutcomeReason>,
}

impl OutcomeSnapshot {
    /// True once both the verdict and its reason are visible.
    pub fn is_complete(&self) -> bool {
        self.verdict.is_some() && self.reason.is_some()
    }
}

/// Handle on the shared entries of one match.
#[derive(Clone)]
pub struct MatchNamespace {
    coord: SharedCoordinator,
    root: String,
}

impl MatchNamespace {
    /// Namespace rooted at `root`; a trailing slash is dropped and an empty root means `/connect4`.
    pub fn new(coord: SharedCoordinator, root: impl Into<String>) -> Self {
        let root = root.into();
        let root = match root.trim_end_matches('/') {
            "" => "/connect4".to_owned(),
            trimmed => trimmed.to_owned(),
        };
        Self { coord, root }
    }

    /// Session used for every access.
    pub fn coord(&self) -> &SharedCoordinator {
        &self.coord
    }

    /// Normalized root path.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Registry of ephemeral presence markers.
    pub fn players(&self) -> String {
        join(&self.root, "players")
    }

    /// Presence marker of `identity`.
    pub fn player(&self, identity: Identity) -> String {
        join(&self.players(), identity.as_str())
    }

    /// JSON-encoded grid.
    pub fn board(&self) -> String {
        join(&self.root, "board")
    }

    /// Seat whose move it is; empty before the election.
    pub fn turn(&self) -> String {
        join(&self.root, "turn")
    }

    /// Write-once verdict.
    pub fn winner(&self) -> String {
        join(&self.root, "winner")
    }

    /// Reason written by the verdict's author.
    pub fn outcome_reason(&self) -> String {
        join(&self.root, "outcome_reason")
    }

    /// Candidates of the first-mover election.
    pub fn election(&self) -> String {
        join(&self.root, "election")
    }

    /// Lock serializing namespace resets.
    pub fn reset_lock(&self) -> String {
        join(&self.root, "reset_lock")
    }

    /// Lock serializing board mutations.
    pub fn move_lock(&self) -> String {
        join(&self.root, "move_lock")
    }

    /// Create every fixed entry that is missing. Existing payloads are left untouched.
    pub async fn ensure_skeleton(&self) -> Result<(), MatchError> {
        for path in [
            self.players(),
            self.turn(),
            self.winner(),
            self.outcome_reason(),
            self.election(),
            self.reset_lock(),
            self.move_lock(),
        ] {
            self.coord.ensure_path(&path).await?;
        }

        match self
            .coord
            .create(&self.board(), Board::empty().encode()?, CreateMode::Persistent)
            .await
        {
            Ok(()) => info!(path = %self.board(), "created empty board"),
            Err(CoordError::AlreadyExists { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        debug!(root = %self.root, "namespace skeleton ready");
        Ok(())
    }

    /// Bring every entry back to its initial value for a fresh match.
    ///
    /// Callers hold `reset_lock` and have observed an empty registry.
    pub async fn reset_for_new_match(&self) -> Result<(), MatchError> {
        let stale = self.clear_children(&self.players()).await?;
        if stale > 0 {
            warn!(count = stale, "removed stale player markers");
        }
        self.clear_children(&self.election()).await?;

        self.persist_board(&Board::empty()).await?;
        self.coord.write(&self.turn(), Vec::new()).await?;
        self.coord.write(&self.outcome_reason(), Vec::new()).await?;
        self.coord.write(&self.winner(), Vec::new()).await?;
        info!(root = %self.root, "namespace reset for a new match");
        Ok(())
    }

    async fn clear_children(&self, parent: &str) -> Result<usize, MatchError> {
        let names = self.coord.children(parent).await?;
        let mut removed = 0;
        for name in names {
            match self.coord.delete(&join(parent, &name)).await {
                Ok(()) => removed += 1,
                Err(CoordError::NoNode { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }

    /// Current board; a missing or malformed payload is replaced by an empty grid.
    pub async fn load_board(&self) -> Result<Board, MatchError> {
        let entry = match self.coord.read(&self.board()).await {
            Ok(entry) => entry,
            Err(CoordError::NoNode { .. }) => return Ok(Board::empty()),
            Err(err) => return Err(err.into()),
        };
        match Board::decode(&entry.data) {
            Ok(board) => Ok(board),
            Err(err) => {
                warn!(error = %err, "stored board unreadable; starting from an empty grid");
                Ok(Board::empty())
            }
        }
    }

    /// Overwrite the shared grid.
    pub async fn persist_board(&self, board: &Board) -> Result<(), MatchError> {
        self.coord.write(&self.board(), board.encode()?).await?;
        Ok(())
    }

    /// Identity named by the turn marker, `None` while the match has not started.
    pub async fn read_turn(&self) -> Result<Option<Identity>, MatchError> {
        match self.coord.read(&self.turn()).await {
            Ok(entry) => Ok(Identity::from_wire(&entry.data)),
            Err(CoordError::NoNode { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Hand the turn to `identity`.
    pub async fn write_turn(&self, identity: Identity) -> Result<(), MatchError> {
        self.coord
            .write(&self.turn(), identity.as_str().as_bytes().to_vec())
            .await?;
        Ok(())
    }

    /// Hand the first turn to `identity` unless a turn was already assigned.
    pub async fn claim_first_turn(&self, identity: Identity) -> Result<bool, MatchError> {
        let current = self.coord.read(&self.turn()).await?;
        if !current.is_empty() {
            return Ok(false);
        }
        match self
            .coord
            .compare_and_write(
                &self.turn(),
                identity.as_str().as_bytes().to_vec(),
                current.version,
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(CoordError::VersionConflict { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Register the presence marker of `identity`, bound to this session.
    pub async fn register_presence(&self, identity: Identity) -> Result<(), MatchError> {
        match self
            .coord
            .create(
                &self.player(identity),
                self.coord.session_id().into_bytes(),
                CreateMode::Ephemeral,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(CoordError::AlreadyExists { .. }) => Err(MatchError::IdentityInUse(identity)),
            Err(err) => Err(err.into()),
        }
    }

    /// Names currently present in the registry.
    pub async fn registered(&self) -> Result<Vec<String>, MatchError> {
        Ok(self.coord.children(&self.players()).await?)
    }

    /// Record the terminal outcome unless one is already recorded.
    ///
    /// Returns `true` only for the single caller whose write settled the match;
    /// that caller alone then writes the reason.
    pub async fn declare_outcome(
        &self,
        verdict: Verdict,
        reason: OutcomeReason,
    ) -> Result<bool, MatchError> {
        let current = self.coord.read(&self.winner()).await?;
        if !current.is_empty() {
            debug!(verdict = verdict.as_str(), "outcome already recorded");
            return Ok(false);
        }

        match self
            .coord
            .compare_and_write(
                &self.winner(),
                verdict.as_str().as_bytes().to_vec(),
                current.version,
            )
            .await
        {
            Ok(_) => {}
            Err(CoordError::VersionConflict { .. }) => {
                debug!(verdict = verdict.as_str(), "lost the race to record the outcome");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }

        self.coord
            .write(&self.outcome_reason(), reason.as_str().as_bytes().to_vec())
            .await?;
        info!(verdict = verdict.as_str(), reason = %reason, "outcome recorded");
        Ok(true)
    }

    /// Read verdict and reason; the two reads are not atomic.
    pub async fn read_outcome(&self) -> Result<OutcomeSnapshot, MatchError> {
        let verdict = self.read_optional(&self.winner()).await?;
        let reason = self.read_optional(&self.outcome_reason()).await?;
        Ok(OutcomeSnapshot {
            verdict: verdict.as_deref().and_then(Verdict::from_wire),
            reason: reason.as_deref().and_then(OutcomeReason::from_wire),
        })
    }

    async fn read_optional(&self, path: &str) -> Result<Option<Vec<u8>>, MatchError> {
        match self.coord.read(path).await {
            Ok(entry) => Ok(Some(entry.data)),
            Err(CoordError::NoNode { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::coord::memory::MemoryCoordinator;

    async fn namespace(service: &MemoryCoordinator) -> MatchNamespace {
        let ns = MatchNamespace::new(service.connect_shared().await, "/connect4");
        ns.ensure_skeleton().await.unwrap();
        ns
    }

    #[tokio::test]
    async fn root_drops_trailing_slash_and_defaults_when_empty() {
        let service = MemoryCoordinator::new();
        let ns = MatchNamespace::new(service.connect_shared().await, "/games/c4/");
        assert_eq!(ns.root(), "/games/c4");
        assert_eq!(ns.board(), "/games/c4/board");
        let ns = MatchNamespace::new(service.connect_shared().await, "/");
        assert_eq!(ns.root(), "/connect4");
    }

    #[tokio::test]
    async fn skeleton_never_overwrites_a_live_match() {
        let service = MemoryCoordinator::new();
        let ns = namespace(&service).await;

        let mut board = Board::empty();
        board.drop_disc(3, Identity::PlayerOne).unwrap();
        ns.persist_board(&board).await.unwrap();
        ns.write_turn(Identity::PlayerTwo).await.unwrap();

        ns.ensure_skeleton().await.unwrap();
        assert_eq!(ns.load_board().await.unwrap(), board);
        assert_eq!(ns.read_turn().await.unwrap(), Some(Identity::PlayerTwo));
    }

    #[tokio::test]
    async fn reset_clears_entries_and_stale_markers() {
        let service = MemoryCoordinator::new();
        let ns = namespace(&service).await;
        ns.coord()
            .create(
                &ns.player(Identity::PlayerOne),
                Vec::new(),
                CreateMode::Persistent,
            )
            .await
            .unwrap();
        ns.coord()
            .create(&join(&ns.election(), "old"), Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        ns.write_turn(Identity::PlayerOne).await.unwrap();
        ns.declare_outcome(Verdict::Winner(Identity::PlayerOne), OutcomeReason::Timeout)
            .await
            .unwrap();

        ns.reset_for_new_match().await.unwrap();

        assert!(ns.registered().await.unwrap().is_empty());
        assert!(ns.coord().children(&ns.election()).await.unwrap().is_empty());
        assert_eq!(ns.read_turn().await.unwrap(), None);
        assert_eq!(ns.read_outcome().await.unwrap(), OutcomeSnapshot::default());
        assert_eq!(ns.load_board().await.unwrap(), Board::empty());
    }

    #[tokio::test]
    async fn malformed_board_loads_as_empty() {
        let service = MemoryCoordinator::new();
        let ns = namespace(&service).await;
        ns.coord()
            .write(&ns.board(), b"{broken".to_vec())
            .await
            .unwrap();
        assert_eq!(ns.load_board().await.unwrap(), Board::empty());
    }

    #[tokio::test]
    async fn duplicate_identity_is_rejected_until_owner_leaves() {
        let service = MemoryCoordinator::new();
        let first = service.connect().await;
        let ns_first = MatchNamespace::new(Arc::new(first.clone()), "/connect4");
        ns_first.ensure_skeleton().await.unwrap();
        let ns_second = namespace(&service).await;

        ns_first.register_presence(Identity::PlayerOne).await.unwrap();
        let err = ns_second
            .register_presence(Identity::PlayerOne)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::IdentityInUse(Identity::PlayerOne)));

        first.expire().await;
        ns_second.register_presence(Identity::PlayerOne).await.unwrap();
    }

    #[tokio::test]
    async fn outcome_is_written_once() {
        let service = MemoryCoordinator::new();
        let ns = namespace(&service).await;

        assert!(
            ns.declare_outcome(Verdict::Winner(Identity::PlayerTwo), OutcomeReason::Timeout)
                .await
                .unwrap()
        );
        assert!(
            !ns.declare_outcome(
                Verdict::Winner(Identity::PlayerOne),
                OutcomeReason::FourInARow
            )
            .await
            .unwrap()
        );

        let outcome = ns.read_outcome().await.unwrap();
        assert_eq!(outcome.verdict, Some(Verdict::Winner(Identity::PlayerTwo)));
        assert_eq!(outcome.reason, Some(OutcomeReason::Timeout));
    }

    #[tokio::test]
    async fn racing_declarations_settle_on_one_winner() {
        let service = MemoryCoordinator::new();
        let ns = namespace(&service).await;
        let rival = MatchNamespace::new(service.connect_shared().await, "/connect4");

        let (left, right) = tokio::join!(
            ns.declare_outcome(Verdict::Winner(Identity::PlayerOne), OutcomeReason::Timeout),
            rival.declare_outcome(
                Verdict::Winner(Identity::PlayerTwo),
                OutcomeReason::Disconnection
            ),
        );
        assert_ne!(left.unwrap(), right.unwrap());

        let outcome = ns.read_outcome().await.unwrap();
        assert!(outcome.is_complete());
        match outcome.verdict {
            Some(Verdict::Winner(Identity::PlayerOne)) => {
                assert_eq!(outcome.reason, Some(OutcomeReason::Timeout))
            }
            Some(Verdict::Winner(Identity::PlayerTwo)) => {
                assert_eq!(outcome.reason, Some(OutcomeReason::Disconnection))
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_turn_can_only_be_claimed_once() {
        let service = MemoryCoordinator::new();
        let ns = namespace(&service).await;

        assert!(ns.claim_first_turn(Identity::PlayerTwo).await.unwrap());
        assert!(!ns.claim_first_turn(Identity::PlayerOne).await.unwrap());
        assert_eq!(ns.read_turn().await.unwrap(), Some(Identity::PlayerTwo));
    }
}
