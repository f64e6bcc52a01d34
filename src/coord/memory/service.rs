use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::Arc,
};

use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::coord::{
    ChildrenEvent, Coordinator, CoordError, CoordResult, CreateMode, DataEvent, Entry,
    SharedCoordinator, WatchStream, lineage,
};

/// Shared in-process tree that hands out sessions.
#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    tree: Arc<Mutex<Tree>>,
}

/// One participant's session against a [`MemoryCoordinator`].
#[derive(Clone)]
pub struct MemorySession {
    tree: Arc<Mutex<Tree>>,
    id: u64,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    next_created: u64,
    next_session: u64,
    live: HashSet<u64>,
    data_watchers: Vec<Watcher<DataEvent>>,
    child_watchers: Vec<Watcher<ChildrenEvent>>,
}

struct Node {
    data: Vec<u8>,
    version: u64,
    created: u64,
    owner: Option<u64>,
}

struct Watcher<T> {
    path: String,
    session: u64,
    tx: mpsc::UnboundedSender<T>,
}

impl MemoryCoordinator {
    /// Create an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session.
    pub async fn connect(&self) -> MemorySession {
        let mut tree = self.tree.lock().await;
        tree.next_session += 1;
        let id = tree.next_session;
        tree.live.insert(id);
        debug!(session = id, "memory session opened");
        MemorySession {
            tree: self.tree.clone(),
            id,
        }
    }

    /// Open a new session already wrapped as a [`SharedCoordinator`].
    pub async fn connect_shared(&self) -> SharedCoordinator {
        Arc::new(self.connect().await)
    }
}

impl MemorySession {
    /// Drop the session as if its heartbeats had stopped.
    pub async fn expire(&self) {
        let mut tree = self.tree.lock().await;
        tree.end_session(self.id);
    }

    fn run<T, F>(&self, op: F) -> BoxFuture<'static, CoordResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Tree, u64) -> CoordResult<T> + Send + 'static,
    {
        let tree = self.tree.clone();
        let id = self.id;
        Box::pin(async move {
            let mut guard = tree.lock().await;
            guard.check(id)?;
            op(&mut guard, id)
        })
    }
}

impl Coordinator for MemorySession {
    fn session_id(&self) -> String {
        format!("memory-{}", self.id)
    }

    fn ensure_path(&self, path: &str) -> BoxFuture<'static, CoordResult<()>> {
        let path = path.to_owned();
        self.run(move |tree, _| {
            for ancestor in lineage(&path) {
                if !tree.nodes.contains_key(&ancestor) {
                    tree.insert(ancestor, Vec::new(), None);
                }
            }
            Ok(())
        })
    }

    fn read(&self, path: &str) -> BoxFuture<'static, CoordResult<Entry>> {
        let path = path.to_owned();
        self.run(move |tree, _| tree.entry(&path).ok_or(CoordError::NoNode { path }))
    }

    fn write(&self, path: &str, data: Vec<u8>) -> BoxFuture<'static, CoordResult<u64>> {
        let path = path.to_owned();
        self.run(move |tree, _| tree.set(&path, data, None))
    }

    fn compare_and_write(
        &self,
        path: &str,
        data: Vec<u8>,
        expected: u64,
    ) -> BoxFuture<'static, CoordResult<u64>> {
        let path = path.to_owned();
        self.run(move |tree, _| tree.set(&path, data, Some(expected)))
    }

    fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> BoxFuture<'static, CoordResult<()>> {
        let path = path.to_owned();
        self.run(move |tree, session| {
            if tree.nodes.contains_key(&path) {
                return Err(CoordError::AlreadyExists { path });
            }
            let parent = parent_of(&path);
            if parent != "/" && !tree.nodes.contains_key(parent) {
                return Err(CoordError::NoNode {
                    path: parent.to_owned(),
                });
            }
            let owner = (mode == CreateMode::Ephemeral).then_some(session);
            tree.insert(path, data, owner);
            Ok(())
        })
    }

    fn delete(&self, path: &str) -> BoxFuture<'static, CoordResult<()>> {
        let path = path.to_owned();
        self.run(move |tree, _| {
            if !tree.nodes.contains_key(&path) {
                return Err(CoordError::NoNode { path });
            }
            tree.remove_tree(&path);
            Ok(())
        })
    }

    fn children(&self, path: &str) -> BoxFuture<'static, CoordResult<Vec<String>>> {
        let path = path.to_owned();
        self.run(move |tree, _| {
            if path != "/" && !tree.nodes.contains_key(&path) {
                return Err(CoordError::NoNode { path });
            }
            Ok(tree.children_of(&path))
        })
    }

    fn watch_data(&self, path: &str) -> BoxFuture<'static, CoordResult<WatchStream<DataEvent>>> {
        let path = path.to_owned();
        self.run(move |tree, session| {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(tree.entry(&path));
            tree.data_watchers.push(Watcher { path, session, tx });
            Ok(rx)
        })
    }

    fn watch_children(
        &self,
        path: &str,
    ) -> BoxFuture<'static, CoordResult<WatchStream<ChildrenEvent>>> {
        let path = path.to_owned();
        self.run(move |tree, session| {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(tree.children_of(&path));
            tree.child_watchers.push(Watcher { path, session, tx });
            Ok(rx)
        })
    }

    fn close(&self) -> BoxFuture<'static, CoordResult<()>> {
        let tree = self.tree.clone();
        let id = self.id;
        Box::pin(async move {
            tree.lock().await.end_session(id);
            Ok(())
        })
    }
}

impl Tree {
    fn check(&self, session: u64) -> CoordResult<()> {
        if self.live.contains(&session) {
            Ok(())
        } else {
            Err(CoordError::SessionLost)
        }
    }

    fn entry(&self, path: &str) -> Option<Entry> {
        self.nodes.get(path).map(|node| Entry {
            data: node.data.clone(),
            version: node.version,
            created: node.created,
        })
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_owned()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&prefix))
            .map(|key| &key[prefix.len()..])
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_owned)
            .collect()
    }

    fn insert(&mut self, path: String, data: Vec<u8>, owner: Option<u64>) {
        self.next_created += 1;
        let node = Node {
            data,
            version: 0,
            created: self.next_created,
            owner,
        };
        self.nodes.insert(path.clone(), node);
        self.notify_data(&path);
        self.notify_children(parent_of(&path));
    }

    fn set(&mut self, path: &str, data: Vec<u8>, expected: Option<u64>) -> CoordResult<u64> {
        let node = self.nodes.get_mut(path).ok_or_else(|| CoordError::NoNode {
            path: path.to_owned(),
        })?;
        if expected.is_some_and(|version| version != node.version) {
            return Err(CoordError::VersionConflict {
                path: path.to_owned(),
            });
        }
        node.data = data;
        node.version += 1;
        let version = node.version;
        self.notify_data(path);
        Ok(version)
    }

    fn remove_tree(&mut self, path: &str) {
        let prefix = format!("{path}/");
        let doomed = self
            .nodes
            .keys()
            .filter(|key| key.as_str() == path || key.starts_with(&prefix))
            .cloned()
            .collect::<Vec<_>>();

        let mut parents = BTreeSet::new();
        for key in &doomed {
            self.nodes.remove(key);
            parents.insert(parent_of(key).to_owned());
        }
        for key in &doomed {
            self.notify_data(key);
        }
        for parent in parents {
            self.notify_children(&parent);
        }
    }

    fn end_session(&mut self, session: u64) {
        if !self.live.remove(&session) {
            return;
        }
        let owned = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in owned {
            self.remove_tree(&key);
        }
        self.data_watchers.retain(|watcher| watcher.session != session);
        self.child_watchers.retain(|watcher| watcher.session != session);
        debug!(session, "memory session ended");
    }

    fn notify_data(&mut self, path: &str) {
        let value = self.entry(path);
        self.data_watchers
            .retain(|watcher| watcher.path != path || watcher.tx.send(value.clone()).is_ok());
    }

    fn notify_children(&mut self, parent: &str) {
        let children = self.children_of(parent);
        self.child_watchers
            .retain(|watcher| watcher.path != parent || watcher.tx.send(children.clone()).is_ok());
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &path[..index],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_rejects_occupied_path() {
        let service = MemoryCoordinator::new();
        let session = service.connect().await;
        session.ensure_path("/game/players").await.unwrap();

        session
            .create("/game/players/player1", Vec::new(), CreateMode::Ephemeral)
            .await
            .unwrap();
        let err = session
            .create("/game/players/player1", Vec::new(), CreateMode::Ephemeral)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn create_requires_parent() {
        let service = MemoryCoordinator::new();
        let session = service.connect().await;
        let err = session
            .create("/missing/child", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::NoNode { path } if path == "/missing"));
    }

    #[tokio::test]
    async fn expired_session_loses_ephemeral_entries_and_access() {
        let service = MemoryCoordinator::new();
        let owner = service.connect().await;
        let other = service.connect().await;
        owner.ensure_path("/game/players").await.unwrap();
        owner
            .create("/game/players/player1", b"x".to_vec(), CreateMode::Ephemeral)
            .await
            .unwrap();
        owner
            .create("/game/board", b"[]".to_vec(), CreateMode::Persistent)
            .await
            .unwrap();

        owner.expire().await;

        assert!(other.children("/game/players").await.unwrap().is_empty());
        assert_eq!(other.read("/game/board").await.unwrap().data, b"[]".to_vec());
        assert!(owner.read("/game/board").await.unwrap_err().is_session_lost());
    }

    #[tokio::test]
    async fn compare_and_write_detects_concurrent_update() {
        let service = MemoryCoordinator::new();
        let first = service.connect().await;
        let second = service.connect().await;
        first.ensure_path("/game/winner").await.unwrap();

        let seen = first.read("/game/winner").await.unwrap();
        second
            .compare_and_write("/game/winner", b"player2".to_vec(), seen.version)
            .await
            .unwrap();
        let err = first
            .compare_and_write("/game/winner", b"player1".to_vec(), seen.version)
            .await
            .unwrap_err();

        assert!(matches!(err, CoordError::VersionConflict { .. }));
        assert_eq!(
            first.read("/game/winner").await.unwrap().data,
            b"player2".to_vec()
        );
    }

    #[tokio::test]
    async fn data_watch_delivers_current_value_then_changes_in_order() {
        let service = MemoryCoordinator::new();
        let session = service.connect().await;
        session.ensure_path("/game/turn").await.unwrap();

        let mut watch = session.watch_data("/game/turn").await.unwrap();
        session.write("/game/turn", b"player1".to_vec()).await.unwrap();
        session.write("/game/turn", b"player2".to_vec()).await.unwrap();
        session.delete("/game/turn").await.unwrap();

        let initial = watch.recv().await.unwrap().unwrap();
        assert!(initial.is_empty());
        assert_eq!(watch.recv().await.unwrap().unwrap().data, b"player1".to_vec());
        assert_eq!(watch.recv().await.unwrap().unwrap().data, b"player2".to_vec());
        assert_eq!(watch.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn children_watch_follows_membership() {
        let service = MemoryCoordinator::new();
        let observer = service.connect().await;
        let player = service.connect().await;
        observer.ensure_path("/game/players").await.unwrap();

        let mut watch = observer.watch_children("/game/players").await.unwrap();
        player
            .create("/game/players/player1", Vec::new(), CreateMode::Ephemeral)
            .await
            .unwrap();
        player.expire().await;

        assert!(watch.recv().await.unwrap().is_empty());
        assert_eq!(watch.recv().await.unwrap(), vec!["player1".to_owned()]);
        assert!(watch.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closing_a_session_ends_its_watch_streams() {
        let service = MemoryCoordinator::new();
        let session = service.connect().await;
        session.ensure_path("/game/turn").await.unwrap();
        let mut watch = session.watch_data("/game/turn").await.unwrap();
        watch.recv().await.unwrap();

        session.close().await.unwrap();

        assert!(watch.recv().await.is_none());
    }

    #[tokio::test]
    async fn children_lists_only_direct_descendants() {
        let service = MemoryCoordinator::new();
        let session = service.connect().await;
        session.ensure_path("/game/players/player1/deep").await.unwrap();
        session.ensure_path("/game/players/player2").await.unwrap();
        session.ensure_path("/game/playersish").await.unwrap();

        assert_eq!(
            session.children("/game/players").await.unwrap(),
            vec!["player1".to_owned(), "player2".to_owned()]
        );
    }

    #[tokio::test]
    async fn delete_is_recursive() {
        let service = MemoryCoordinator::new();
        let session = service.connect().await;
        session.ensure_path("/game/election/a").await.unwrap();
        session.delete("/game/election").await.unwrap();

        assert!(matches!(
            session.read("/game/election/a").await.unwrap_err(),
            CoordError::NoNode { .. }
        ));
    }
}
