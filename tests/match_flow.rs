use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use connect4_coord::{
    console::Console,
    coord::{Coordinator, CreateMode, SharedCoordinator, memory::MemoryCoordinator},
    error::MatchError,
    services::{
        lifecycle,
        namespace::{MatchNamespace, OutcomeSnapshot},
    },
    state::{
        MatchContext, MatchSettings,
        board::Board,
        identity::{Identity, OutcomeReason, Verdict},
    },
};
use futures::future::{BoxFuture, pending};
use tokio::{
    task::JoinHandle,
    time::{sleep, timeout},
};

const ROOT: &str = "/connect4";
const DEADLINE: Duration = Duration::from_secs(10);

/// Console fed from a fixed list of lines; once exhausted, prompts never answer.
#[derive(Default)]
struct ScriptedConsole {
    lines: Mutex<VecDeque<String>>,
    notices: Mutex<Vec<String>>,
    boards: AtomicUsize,
}

impl ScriptedConsole {
    fn new(lines: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(lines.iter().map(|line| (*line).to_owned()).collect()),
            ..Self::default()
        })
    }

    fn silent() -> Arc<Self> {
        Self::new(&[])
    }

    fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }
}

impl Console for ScriptedConsole {
    fn read_line(&self, _prompt: &str) -> BoxFuture<'_, io::Result<Option<String>>> {
        Box::pin(async move {
            let next = self.lines.lock().unwrap().pop_front();
            match next {
                Some(line) => Ok(Some(line)),
                None => pending().await,
            }
        })
    }

    fn show_board(&self, _board: &Board) {
        self.boards.fetch_add(1, Ordering::SeqCst);
    }

    fn notice(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_owned());
    }
}

fn settings(turn_timeout: Duration, disconnect_grace: Duration) -> MatchSettings {
    MatchSettings {
        turn_timeout,
        disconnect_grace,
        poll_interval: Duration::from_millis(20),
    }
}

fn join(
    coord: SharedCoordinator,
    identity: Identity,
    console: Arc<ScriptedConsole>,
    settings: MatchSettings,
) -> JoinHandle<Result<OutcomeSnapshot, MatchError>> {
    let ctx = MatchContext::new(identity, MatchNamespace::new(coord, ROOT), settings);
    tokio::spawn(lifecycle::run(ctx, console))
}

async fn finish(
    task: JoinHandle<Result<OutcomeSnapshot, MatchError>>,
) -> Result<OutcomeSnapshot, MatchError> {
    timeout(DEADLINE, task)
        .await
        .expect("participant did not finish in time")
        .expect("participant task panicked")
}

async fn wait_for_turn(namespace: &MatchNamespace) -> Identity {
    timeout(DEADLINE, async {
        loop {
            if let Ok(Some(turn)) = namespace.read_turn().await {
                return turn;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no first mover was elected")
}

#[tokio::test]
async fn first_mover_wins_with_four_in_a_row() {
    let service = MemoryCoordinator::new();
    let timings = settings(Duration::from_secs(5), Duration::from_secs(5));

    let observer_console = ScriptedConsole::silent();
    let observer = join(
        service.connect_shared().await,
        Identity::Observer,
        observer_console.clone(),
        timings,
    );
    sleep(Duration::from_millis(50)).await;

    let one_console = ScriptedConsole::new(&["x", "9", "0", "0", "0", "0", "0", "0"]);
    let two_console = ScriptedConsole::new(&["1", "1", "1", "1", "1", "1"]);
    let one = join(
        service.connect_shared().await,
        Identity::PlayerOne,
        one_console.clone(),
        timings,
    );
    let two = join(
        service.connect_shared().await,
        Identity::PlayerTwo,
        two_console.clone(),
        timings,
    );

    let one = finish(one).await.unwrap();
    let two = finish(two).await.unwrap();
    let seen = finish(observer).await.unwrap();

    assert_eq!(one, two);
    assert_eq!(one, seen);
    assert_eq!(one.reason, Some(OutcomeReason::FourInARow));
    let winner = one.verdict.and_then(Verdict::winner).unwrap();

    let inspector = MatchNamespace::new(service.connect_shared().await, ROOT);
    let board = inspector.load_board().await.unwrap();
    assert!(board.has_connect_four(winner));
    assert!(!board.has_connect_four(winner.opponent().unwrap()));

    let (winner_console, loser_console) = match winner {
        Identity::PlayerOne => (&one_console, &two_console),
        _ => (&two_console, &one_console),
    };
    assert!(winner_console.notices().iter().any(|n| n == "You won with four in a row!"));
    assert!(
        loser_console
            .notices()
            .iter()
            .any(|n| n.starts_with("You lost:"))
    );
    assert!(one_console.notices().iter().any(|n| n.contains("not a column number")));
    assert!(observer_console.boards.load(Ordering::SeqCst) >= 7);
}

#[tokio::test]
async fn idle_opponent_forfeits_by_timeout_after_stale_match_reset() {
    let service = MemoryCoordinator::new();
    let stale = MatchNamespace::new(service.connect_shared().await, ROOT);
    stale.ensure_skeleton().await.unwrap();
    stale.write_turn(Identity::PlayerTwo).await.unwrap();
    stale
        .declare_outcome(Verdict::Winner(Identity::PlayerTwo), OutcomeReason::FourInARow)
        .await
        .unwrap();

    let timings = settings(Duration::from_millis(300), Duration::from_secs(5));
    let one = join(
        service.connect_shared().await,
        Identity::PlayerOne,
        ScriptedConsole::new(&["3", "3", "4"]),
        timings,
    );
    let two_console = ScriptedConsole::silent();
    let two = join(
        service.connect_shared().await,
        Identity::PlayerTwo,
        two_console.clone(),
        timings,
    );

    let one = finish(one).await.unwrap();
    let two = finish(two).await.unwrap();
    assert_eq!(
        one,
        OutcomeSnapshot {
            verdict: Some(Verdict::Winner(Identity::PlayerOne)),
            reason: Some(OutcomeReason::Timeout),
        }
    );
    assert_eq!(one, two);
    assert!(two_console.notices().iter().any(|n| n == "You lost: you timed out."));
}

#[tokio::test]
async fn vanished_opponent_forfeits_by_disconnection() {
    let service = MemoryCoordinator::new();
    let timings = settings(Duration::from_secs(5), Duration::from_millis(300));

    let one_console = ScriptedConsole::silent();
    let one = join(
        service.connect_shared().await,
        Identity::PlayerOne,
        one_console.clone(),
        timings,
    );
    let two_session = service.connect().await;
    let two = join(
        Arc::new(two_session.clone()),
        Identity::PlayerTwo,
        ScriptedConsole::silent(),
        timings,
    );

    let inspector = MatchNamespace::new(service.connect_shared().await, ROOT);
    wait_for_turn(&inspector).await;
    two_session.expire().await;

    let one = finish(one).await.unwrap();
    assert_eq!(
        one,
        OutcomeSnapshot {
            verdict: Some(Verdict::Winner(Identity::PlayerOne)),
            reason: Some(OutcomeReason::Disconnection),
        }
    );
    assert!(
        one_console
            .notices()
            .iter()
            .any(|n| n == "You won: player2 disconnected.")
    );
    assert!(matches!(finish(two).await, Err(MatchError::SessionLost)));
}

#[tokio::test]
async fn brief_disconnection_inside_grace_is_forgiven() {
    let service = MemoryCoordinator::new();
    let timings = settings(Duration::from_secs(5), Duration::from_millis(500));

    let one = join(
        service.connect_shared().await,
        Identity::PlayerOne,
        ScriptedConsole::silent(),
        timings,
    );
    let two_session = service.connect().await;
    let _two = join(
        Arc::new(two_session.clone()),
        Identity::PlayerTwo,
        ScriptedConsole::silent(),
        timings,
    );

    let inspector = MatchNamespace::new(service.connect_shared().await, ROOT);
    wait_for_turn(&inspector).await;
    two_session.expire().await;

    // The returning player re-registers on a fresh session before the grace period ends.
    sleep(Duration::from_millis(100)).await;
    inspector
        .coord()
        .create(
            &inspector.player(Identity::PlayerTwo),
            Vec::new(),
            CreateMode::Ephemeral,
        )
        .await
        .unwrap();

    sleep(Duration::from_millis(800)).await;
    assert_eq!(inspector.read_outcome().await.unwrap().verdict, None);
    assert!(!one.is_finished());
    one.abort();
}

#[tokio::test]
async fn second_process_cannot_take_a_claimed_identity() {
    let service = MemoryCoordinator::new();
    let timings = settings(Duration::from_secs(5), Duration::from_secs(5));

    let first = join(
        service.connect_shared().await,
        Identity::PlayerOne,
        ScriptedConsole::silent(),
        timings,
    );
    let inspector = MatchNamespace::new(service.connect_shared().await, ROOT);
    timeout(DEADLINE, async {
        // The registry itself may not exist until the first process lays out the skeleton.
        while inspector.registered().await.map_or(true, |players| players.is_empty()) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let duplicate = join(
        service.connect_shared().await,
        Identity::PlayerOne,
        ScriptedConsole::silent(),
        timings,
    );
    assert!(matches!(
        finish(duplicate).await,
        Err(MatchError::IdentityInUse(Identity::PlayerOne))
    ));
    assert!(!first.is_finished());
    first.abort();
}
