use tokio::task::JoinHandle;
use tokio_stream::{StreamExt, wrappers::UnboundedReceiverStream};
use tracing::{debug, warn};

use crate::{
    coord::{ChildrenEvent, DataEvent, WatchStream},
    error::MatchError,
    services::{
        membership::MembershipTracker, namespace::MatchNamespace, turn_sequencer::TurnSequencer,
    },
    state::SharedMatch,
};

/// Change notification tagged with the entry it came from.
#[derive(Debug)]
enum WatchEvent {
    Turn(DataEvent),
    Winner(DataEvent),
    Players(ChildrenEvent),
}

/// Subscriptions a player keeps for the whole match.
pub struct MatchWatches {
    turn: WatchStream<DataEvent>,
    winner: WatchStream<DataEvent>,
    players: WatchStream<ChildrenEvent>,
}

impl MatchWatches {
    /// Open the `turn`, `winner` and registry streams.
    pub async fn subscribe(namespace: &MatchNamespace) -> Result<Self, MatchError> {
        let coord = namespace.coord();
        Ok(Self {
            winner: coord.watch_data(&namespace.winner()).await?,
            turn: coord.watch_data(&namespace.turn()).await?,
            players: coord.watch_children(&namespace.players()).await?,
        })
    }
}

/// Start the single task that feeds every watch event to its handler, one at a time.
///
/// The task ends once every subscription has closed, which only happens when the
/// session is gone.
pub fn spawn(ctx: SharedMatch, watches: MatchWatches) -> JoinHandle<()> {
    let MatchWatches {
        turn,
        winner,
        players,
    } = watches;
    let mut events = UnboundedReceiverStream::new(winner)
        .map(WatchEvent::Winner)
        .merge(UnboundedReceiverStream::new(turn).map(WatchEvent::Turn))
        .merge(UnboundedReceiverStream::new(players).map(WatchEvent::Players));

    tokio::spawn(async move {
        let sequencer = TurnSequencer::new(ctx.clone());
        let mut membership = MembershipTracker::new(ctx.clone());

        while let Some(event) = events.next().await {
            let handled = match event {
                WatchEvent::Turn(value) => sequencer.on_turn_changed(value).await,
                WatchEvent::Winner(value) => sequencer.on_winner_changed(value).await,
                WatchEvent::Players(names) => membership.on_players_changed(&names).await,
            };
            match handled {
                Ok(()) => {}
                Err(err) if err.is_session_lost() => {
                    warn!(identity = %ctx.identity(), "session lost; dispatcher stopping");
                    break;
                }
                Err(err) => {
                    warn!(identity = %ctx.identity(), error = %err, "watch handler failed");
                }
            }
        }
        debug!(identity = %ctx.identity(), "dispatcher finished");
    })
}
