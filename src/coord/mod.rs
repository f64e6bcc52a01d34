//! Client side of the coordination service: the primitive operations every
//! backend provides, plus the lock and election recipes built on top of them.

/// Error types shared by every backend.
pub mod error;
#[cfg(feature = "etcd-store")]
pub mod etcd;
/// In-process coordination service.
pub mod memory;
/// Distributed lock and one-shot election.
pub mod recipes;

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

pub use self::error::{CoordError, CoordResult};

/// Shared handle to a live coordination session.
pub type SharedCoordinator = Arc<dyn Coordinator>;

/// Persistent subscription: the current value is delivered first, then every change in write order.
pub type WatchStream<T> = mpsc::UnboundedReceiver<T>;

/// Notification for a watched entry; `None` means the entry was deleted.
pub type DataEvent = Option<Entry>;

/// Notification for a watched container; the sorted names of its children.
pub type ChildrenEvent = Vec<String>;

/// Stored value together with the metadata the service attaches to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Raw payload.
    pub data: Vec<u8>,
    /// Modification version, compared by [`Coordinator::compare_and_write`].
    pub version: u64,
    /// Service-wide creation sequence; later creations always compare greater.
    pub created: u64,
}

impl Entry {
    /// True when the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Lifetime of a created entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the session that created it.
    Persistent,
    /// Removed by the service as soon as the creating session ends.
    Ephemeral,
}

/// Primitive operations of a strongly-consistent, hierarchical coordination service.
///
/// Implementations hand out `'static` futures so the trait stays object-safe and
/// handles can be moved into spawned tasks.
pub trait Coordinator: Send + Sync {
    /// Identifier of the underlying session, used for logging.
    fn session_id(&self) -> String;
    /// Create `path` and all of its ancestors with empty payloads when absent.
    fn ensure_path(&self, path: &str) -> BoxFuture<'static, CoordResult<()>>;
    /// Read the entry stored at `path`.
    fn read(&self, path: &str) -> BoxFuture<'static, CoordResult<Entry>>;
    /// Replace the payload of an existing entry, returning the new version.
    fn write(&self, path: &str, data: Vec<u8>) -> BoxFuture<'static, CoordResult<u64>>;
    /// Replace the payload only if the entry is still at `expected` version.
    fn compare_and_write(
        &self,
        path: &str,
        data: Vec<u8>,
        expected: u64,
    ) -> BoxFuture<'static, CoordResult<u64>>;
    /// Create a new entry; fails with [`CoordError::AlreadyExists`] when occupied.
    fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> BoxFuture<'static, CoordResult<()>>;
    /// Delete an entry together with everything below it.
    fn delete(&self, path: &str) -> BoxFuture<'static, CoordResult<()>>;
    /// Names of the direct children of `path`, sorted.
    fn children(&self, path: &str) -> BoxFuture<'static, CoordResult<Vec<String>>>;
    /// Subscribe to the value of `path`.
    fn watch_data(&self, path: &str) -> BoxFuture<'static, CoordResult<WatchStream<DataEvent>>>;
    /// Subscribe to the child set of `path`.
    fn watch_children(
        &self,
        path: &str,
    ) -> BoxFuture<'static, CoordResult<WatchStream<ChildrenEvent>>>;
    /// End the session; ephemeral entries disappear and watch streams close.
    fn close(&self) -> BoxFuture<'static, CoordResult<()>>;
}

/// Join a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}

/// Ancestors of `path` from the root down, `path` itself included.
pub(crate) fn lineage(path: &str) -> Vec<String> {
    let mut current = String::new();
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            current.push('/');
            current.push_str(segment);
            current.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lineage_lists_every_ancestor() {
        assert_eq!(
            lineage("/connect4/players/player1"),
            vec!["/connect4", "/connect4/players", "/connect4/players/player1"]
        );
        assert!(lineage("/").is_empty());
    }

    #[test]
    fn join_ignores_trailing_separator() {
        assert_eq!(join("/connect4/", "board"), "/connect4/board");
        assert_eq!(join("/connect4", "board"), "/connect4/board");
    }
}
