use std::{future::Future, time::Duration};

use tokio::{sync::watch, time::timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CoordError, CoordResult, CreateMode, SharedCoordinator, join};

/// How a blocking recipe waits for its turn.
#[derive(Debug, Clone)]
pub struct Wait {
    /// Upper bound between two re-checks when no change notification arrives.
    pub poll: Duration,
    /// When this flag flips to `true` the wait is abandoned with [`CoordError::Interrupted`].
    pub abort: Option<watch::Receiver<bool>>,
}

impl Wait {
    /// Wait that can only end by acquiring.
    pub fn polling(poll: Duration) -> Self {
        Self { poll, abort: None }
    }

    /// Wait that is abandoned once `abort` reads `true`.
    pub fn abortable(poll: Duration, abort: watch::Receiver<bool>) -> Self {
        Self {
            poll,
            abort: Some(abort),
        }
    }

    fn aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(|flag| *flag.borrow())
    }
}

/// Outcome of a one-shot election for the entrant that ran it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leadership {
    /// This entrant holds the lowest sequence and was notified.
    Elected,
    /// Another entrant came first.
    Follower {
        /// Identifier the leader entered the election with.
        leader: String,
    },
}

/// Exclusive hold on a distributed lock; released explicitly or, as a fallback, on drop.
pub struct LockGuard {
    coord: SharedCoordinator,
    node: Option<String>,
}

impl LockGuard {
    /// Give the lock up so the next contender can proceed.
    pub async fn release(mut self) -> CoordResult<()> {
        match self.node.take() {
            Some(node) => remove_contender(&self.coord, &node).await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(node) = self.node.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let coord = self.coord.clone();
            handle.spawn(async move {
                if let Err(err) = remove_contender(&coord, &node).await {
                    warn!(node = %node, error = %err, "failed to release dropped lock");
                }
            });
        }
    }
}

/// Block until this session holds the lock rooted at `path`.
///
/// Contenders are ephemeral children of `path`; the one with the lowest creation
/// sequence holds the lock. Waiters re-check whenever the child set changes and at
/// least once per [`Wait::poll`].
pub async fn acquire_lock(
    coord: &SharedCoordinator,
    path: &str,
    wait: &Wait,
) -> CoordResult<LockGuard> {
    coord.ensure_path(path).await?;
    let mut changes = coord.watch_children(path).await?;

    let name = Uuid::new_v4().simple().to_string();
    let node = join(path, &name);
    coord
        .create(&node, coord.session_id().into_bytes(), CreateMode::Ephemeral)
        .await?;
    let guard = LockGuard {
        coord: coord.clone(),
        node: Some(node),
    };

    loop {
        let contenders = ordered_contenders(coord, path).await?;
        match contenders.first() {
            Some((_, first)) if *first == name => {
                debug!(lock = %path, "lock acquired");
                return Ok(guard);
            }
            _ if !contenders.iter().any(|(_, contender)| *contender == name) => {
                return Err(CoordError::SessionLost);
            }
            _ => {}
        }

        if wait.aborted() {
            return Err(CoordError::Interrupted);
        }
        if let Ok(None) = timeout(wait.poll, changes.recv()).await {
            return Err(CoordError::SessionLost);
        }
    }
}

/// Run `work` while holding the lock at `path`; the lock is released on every exit path.
pub async fn with_lock<F, Fut, T, E>(
    coord: &SharedCoordinator,
    path: &str,
    wait: &Wait,
    work: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<CoordError>,
{
    let guard = acquire_lock(coord, path, wait).await?;
    let outcome = work().await;
    let released = guard.release().await;

    match (outcome, released) {
        (Err(err), _) => Err(err),
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err.into()),
    }
}

/// Enter the one-shot election at `path` and run `on_elected` if this entrant leads.
///
/// Candidate entries stay in place after the election so that a late entrant
/// observes the original leader instead of electing itself; clearing `path`
/// starts a fresh election.
pub async fn run_election<F, Fut, E>(
    coord: &SharedCoordinator,
    path: &str,
    identity: &str,
    on_elected: F,
) -> Result<Leadership, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: From<CoordError>,
{
    coord.ensure_path(path).await?;
    let name = Uuid::new_v4().simple().to_string();
    coord
        .create(
            &join(path, &name),
            identity.as_bytes().to_vec(),
            CreateMode::Ephemeral,
        )
        .await?;

    let contenders = ordered_contenders(coord, path).await?;
    let Some((_, leader_name)) = contenders.first() else {
        return Err(CoordError::SessionLost.into());
    };

    if *leader_name == name {
        debug!(election = %path, identity, "elected");
        on_elected().await?;
        return Ok(Leadership::Elected);
    }

    let leader = match coord.read(&join(path, leader_name)).await {
        Ok(entry) => String::from_utf8_lossy(&entry.data).into_owned(),
        Err(CoordError::NoNode { .. }) => String::new(),
        Err(err) => return Err(err.into()),
    };
    Ok(Leadership::Follower { leader })
}

/// Children of `path` ordered by their creation sequence.
async fn ordered_contenders(
    coord: &SharedCoordinator,
    path: &str,
) -> CoordResult<Vec<(u64, String)>> {
    let names = coord.children(path).await?;
    let mut contenders = Vec::with_capacity(names.len());
    for name in names {
        match coord.read(&join(path, &name)).await {
            Ok(entry) => contenders.push((entry.created, name)),
            Err(CoordError::NoNode { .. }) => continue,
            Err(err) => return Err(err),
        }
    }
    contenders.sort();
    Ok(contenders)
}

async fn remove_contender(coord: &SharedCoordinator, node: &str) -> CoordResult<()> {
    match coord.delete(node).await {
        // A lost session already took its ephemeral contender with it.
        Ok(()) | Err(CoordError::NoNode { .. }) | Err(CoordError::SessionLost) => Ok(()),
        Err(err) => Err(err),
    }
}
