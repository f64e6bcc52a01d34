use std::{
    collections::BTreeSet,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use async_stream::try_stream;
use futures::{Stream, StreamExt, future::BoxFuture};
use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

use super::{
    config::EtcdConfig,
    error::{EtcdError, EtcdResult},
    models::{
        Compare, DeleteRangeRequest, KV_RANGE, KV_TXN, LEASE_GRANT, LEASE_KEEPALIVE,
        LEASE_REVOKE, LeaseGrantRequest, LeaseGrantResponse, LeaseIdRequest,
        LeaseKeepAliveEnvelope, PutRequest, RangeRequest, RangeResponse, RequestOp, TxnRequest,
        TxnResponse, WATCH, WatchEnvelope, WatchRequest, WatchResponse, encode, prefix_end,
    },
};
use crate::coord::{
    ChildrenEvent, Coordinator, CoordError, CoordResult, CreateMode, DataEvent, Entry,
    WatchStream, lineage,
};

/// Session against etcd; its lease carries every ephemeral entry it creates.
#[derive(Clone)]
pub struct EtcdSession {
    inner: Arc<EtcdInner>,
}

struct EtcdInner {
    client: Client,
    base_url: Arc<str>,
    lease: i64,
    alive: watch::Sender<bool>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl EtcdSession {
    /// Grant a lease and start heartbeating it.
    pub async fn connect(config: EtcdConfig) -> EtcdResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| EtcdError::ClientBuilder { source })?;
        let base_url = Arc::<str>::from(config.endpoint.trim_end_matches('/'));

        let grant: LeaseGrantResponse = post(
            &client,
            &base_url,
            LEASE_GRANT,
            &LeaseGrantRequest {
                ttl: config.ttl_secs(),
            },
        )
        .await?;

        let (alive, _) = watch::channel(true);
        let inner = Arc::new(EtcdInner {
            client,
            base_url,
            lease: grant.id,
            alive,
            keepalive: Mutex::new(None),
        });

        let handle = tokio::spawn(run_keepalive(
            inner.clone(),
            config.keepalive_interval(),
            config.session_timeout,
        ));
        *inner.keepalive.lock().await = Some(handle);

        info!(lease = grant.id, endpoint = %inner.base_url, "etcd session established");
        Ok(Self { inner })
    }

    fn run<T, F, Fut>(&self, op: F) -> BoxFuture<'static, CoordResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(Arc<EtcdInner>) -> Fut + Send + 'static,
        Fut: Future<Output = CoordResult<T>> + Send + 'static,
    {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.check()?;
            op(inner).await
        })
    }
}

impl EtcdInner {
    fn check(&self) -> CoordResult<()> {
        if *self.alive.borrow() {
            Ok(())
        } else {
            Err(CoordError::SessionLost)
        }
    }

    async fn post<Req, Resp>(&self, endpoint: &'static str, body: &Req) -> EtcdResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        post(&self.client, &self.base_url, endpoint, body).await
    }

    async fn range(&self, request: &RangeRequest) -> EtcdResult<RangeResponse> {
        self.post(KV_RANGE, request).await
    }

    async fn txn(&self, request: &TxnRequest) -> EtcdResult<TxnResponse> {
        self.post(KV_TXN, request).await
    }

    async fn get(&self, path: &str) -> EtcdResult<(Option<Entry>, i64)> {
        let response = self.range(&RangeRequest::key(path)).await?;
        let revision = response.header.revision.unwrap_or_default();
        let entry = match response.kvs.into_iter().next() {
            Some(kv) => Some(kv.into_entry()?),
            None => None,
        };
        Ok((entry, revision))
    }

    async fn list_children(&self, path: &str) -> EtcdResult<(Vec<String>, i64)> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let response = self.range(&RangeRequest::prefix(&prefix)).await?;
        let revision = response.header.revision.unwrap_or_default();
        let mut names = BTreeSet::new();
        for kv in &response.kvs {
            let key = kv.path()?;
            let rest = &key[prefix.len()..];
            if !rest.is_empty() && !rest.contains('/') {
                names.insert(rest.to_owned());
            }
        }
        Ok((names.into_iter().collect(), revision))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> EtcdResult<bool> {
        let lease = (mode == CreateMode::Ephemeral).then_some(self.lease);
        let txn = TxnRequest::guarded(
            Compare::absent(path),
            vec![RequestOp::RequestPut(PutRequest::with_lease(
                path, data, lease,
            ))],
        );
        Ok(self.txn(&txn).await?.succeeded)
    }

    async fn keep_alive_once(&self) -> EtcdResult<bool> {
        let envelope: LeaseKeepAliveEnvelope = self
            .post(LEASE_KEEPALIVE, &LeaseIdRequest { id: self.lease })
            .await?;
        Ok(envelope
            .result
            .and_then(|result| result.ttl)
            .is_some_and(|ttl| ttl > 0))
    }
}

async fn post<Req, Resp>(
    client: &Client,
    base_url: &str,
    endpoint: &'static str,
    body: &Req,
) -> EtcdResult<Resp>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let response = client
        .post(format!("{base_url}{endpoint}"))
        .json(body)
        .send()
        .await
        .map_err(|source| EtcdError::RequestSend { endpoint, source })?;

    let status = response.status();
    if !status.is_success() {
        return Err(EtcdError::RequestStatus { endpoint, status });
    }

    response
        .json::<Resp>()
        .await
        .map_err(|source| EtcdError::DecodeResponse { endpoint, source })
}

/// Heartbeat the lease until it is confirmed gone or unreachable for a whole timeout.
async fn run_keepalive(inner: Arc<EtcdInner>, interval: Duration, timeout: Duration) {
    let mut last_ok = Instant::now();
    loop {
        sleep(interval).await;
        match inner.keep_alive_once().await {
            Ok(true) => last_ok = Instant::now(),
            Ok(false) => {
                warn!(lease = inner.lease, "etcd lease expired; session lost");
                break;
            }
            Err(err) if last_ok.elapsed() >= timeout => {
                warn!(lease = inner.lease, error = %err, "etcd unreachable past session timeout; session lost");
                break;
            }
            Err(err) => {
                warn!(lease = inner.lease, error = %err, "etcd keepalive failed; retrying");
            }
        }
    }
    inner.alive.send_replace(false);
}

/// Stream the responses of one watch request, frame by frame.
fn watch_responses(
    inner: Arc<EtcdInner>,
    request: WatchRequest,
) -> impl Stream<Item = EtcdResult<WatchResponse>> {
    try_stream! {
        let response = inner
            .client
            .post(format!("{}{}", inner.base_url, WATCH))
            .json(&request)
            .send()
            .await
            .map_err(|source| EtcdError::RequestSend { endpoint: WATCH, source })?;
        let status = response.status();
        if !status.is_success() {
            Err::<(), _>(EtcdError::RequestStatus { endpoint: WATCH, status })?;
        }

        let mut body = Box::pin(response.bytes_stream());
        let mut buffer = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| EtcdError::DecodeResponse { endpoint: WATCH, source })?;
            buffer.extend_from_slice(&chunk);
            while let Some(end) = buffer.iter().position(|byte| *byte == b'\n') {
                let frame = buffer.drain(..=end).collect::<Vec<_>>();
                if frame.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let envelope: WatchEnvelope = serde_json::from_slice(&frame)
                    .map_err(|source| EtcdError::DecodeFrame { source })?;
                if let Some(result) = envelope.result {
                    yield result;
                }
            }
        }
    }
}

/// Pause before re-creating a watch whose stream broke.
const WATCH_RETRY: Duration = Duration::from_millis(500);

/// Feed watch responses to `on_response` until it returns `false` or the session dies.
///
/// A broken or cancelled stream is re-created from the revision after the last
/// delivered event, so no change is skipped while the lease is alive.
fn spawn_watch<F, Fut>(inner: Arc<EtcdInner>, mut request: WatchRequest, mut on_response: F)
where
    F: FnMut(WatchResponse) -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
{
    tokio::spawn(async move {
        let mut alive = inner.alive.subscribe();
        'session: while inner.check().is_ok() {
            let responses = watch_responses(inner.clone(), request.clone());
            futures::pin_mut!(responses);
            loop {
                let next = tokio::select! {
                    _ = session_ended(&mut alive) => break 'session,
                    next = responses.next() => next,
                };
                match next {
                    Some(Ok(response)) => {
                        if let Some(revision) = response.last_revision() {
                            request.resume_after(revision);
                        }
                        let canceled = response.canceled;
                        let compacted = response.compact_revision.filter(|rev| *rev > 0);
                        if !on_response(response).await {
                            break 'session;
                        }
                        if canceled {
                            if let Some(revision) = compacted {
                                request.restart_at(revision);
                            }
                            warn!(?compacted, "etcd cancelled the watch; re-subscribing");
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "etcd watch stream failed; re-subscribing");
                        break;
                    }
                    None => {
                        debug!("etcd watch stream closed; re-subscribing");
                        break;
                    }
                }
            }
            tokio::select! {
                _ = session_ended(&mut alive) => break,
                _ = sleep(WATCH_RETRY) => {}
            }
        }
        debug!("etcd watch finished");
    });
}

/// Resolves once the lease is gone.
async fn session_ended(alive: &mut watch::Receiver<bool>) {
    let _ = alive.wait_for(|alive| !*alive).await;
}

impl Coordinator for EtcdSession {
    fn session_id(&self) -> String {
        format!("etcd-{:x}", self.inner.lease)
    }

    fn ensure_path(&self, path: &str) -> BoxFuture<'static, CoordResult<()>> {
        let path = path.to_owned();
        self.run(move |inner| async move {
            for ancestor in lineage(&path) {
                inner
                    .create(&ancestor, &[], CreateMode::Persistent)
                    .await?;
            }
            Ok(())
        })
    }

    fn read(&self, path: &str) -> BoxFuture<'static, CoordResult<Entry>> {
        let path = path.to_owned();
        self.run(move |inner| async move {
            let (entry, _) = inner.get(&path).await?;
            entry.ok_or(CoordError::NoNode { path })
        })
    }

    fn write(&self, path: &str, data: Vec<u8>) -> BoxFuture<'static, CoordResult<u64>> {
        let path = path.to_owned();
        self.run(move |inner| async move {
            let txn = TxnRequest::guarded(
                Compare::present(&path),
                vec![RequestOp::RequestPut(PutRequest::keep_lease(&path, &data))],
            );
            let response = inner.txn(&txn).await?;
            if !response.succeeded {
                return Err(CoordError::NoNode { path });
            }
            Ok(response.header.revision.unwrap_or_default() as u64)
        })
    }

    fn compare_and_write(
        &self,
        path: &str,
        data: Vec<u8>,
        expected: u64,
    ) -> BoxFuture<'static, CoordResult<u64>> {
        let path = path.to_owned();
        self.run(move |inner| async move {
            let txn = TxnRequest::guarded(
                Compare::modified_at(&path, expected),
                vec![RequestOp::RequestPut(PutRequest::keep_lease(&path, &data))],
            );
            let response = inner.txn(&txn).await?;
            if !response.succeeded {
                return Err(CoordError::VersionConflict { path });
            }
            Ok(response.header.revision.unwrap_or_default() as u64)
        })
    }

    fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> BoxFuture<'static, CoordResult<()>> {
        let path = path.to_owned();
        self.run(move |inner| async move {
            if inner.create(&path, &data, mode).await? {
                Ok(())
            } else {
                Err(CoordError::AlreadyExists { path })
            }
        })
    }

    fn delete(&self, path: &str) -> BoxFuture<'static, CoordResult<()>> {
        let path = path.to_owned();
        self.run(move |inner| async move {
            let below = format!("{path}/");
            let txn = TxnRequest::guarded(
                Compare::present(&path),
                vec![
                    RequestOp::RequestDeleteRange(DeleteRangeRequest {
                        key: encode(path.as_bytes()),
                        range_end: None,
                    }),
                    RequestOp::RequestDeleteRange(DeleteRangeRequest {
                        key: encode(below.as_bytes()),
                        range_end: Some(encode(&prefix_end(&below))),
                    }),
                ],
            );
            if inner.txn(&txn).await?.succeeded {
                Ok(())
            } else {
                Err(CoordError::NoNode { path })
            }
        })
    }

    fn children(&self, path: &str) -> BoxFuture<'static, CoordResult<Vec<String>>> {
        let path = path.to_owned();
        self.run(move |inner| async move { Ok(inner.list_children(&path).await?.0) })
    }

    fn watch_data(&self, path: &str) -> BoxFuture<'static, CoordResult<WatchStream<DataEvent>>> {
        let path = path.to_owned();
        self.run(move |inner| async move {
            let (initial, revision) = inner.get(&path).await?;
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(initial);

            let request = WatchRequest::from_range(RangeRequest::key(&path), revision + 1);
            spawn_watch(inner, request, move |response| {
                let tx = tx.clone();
                async move {
                    for event in response.events {
                        let value = if event.is_delete() {
                            None
                        } else {
                            match event.kv.into_entry() {
                                Ok(entry) => Some(entry),
                                Err(err) => {
                                    warn!(error = %err, "dropping undecodable watch event");
                                    continue;
                                }
                            }
                        };
                        if tx.send(value).is_err() {
                            return false;
                        }
                    }
                    true
                }
            });
            Ok(rx)
        })
    }

    fn watch_children(
        &self,
        path: &str,
    ) -> BoxFuture<'static, CoordResult<WatchStream<ChildrenEvent>>> {
        let path = path.to_owned();
        self.run(move |inner| async move {
            let (initial, revision) = inner.list_children(&path).await?;
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(initial.clone());

            let prefix = format!("{}/", path.trim_end_matches('/'));
            let request = WatchRequest::from_range(RangeRequest::prefix(&prefix), revision + 1);
            let last = Arc::new(Mutex::new(initial));
            let lister = inner.clone();
            spawn_watch(inner, request, move |_| {
                let tx = tx.clone();
                let last = last.clone();
                let lister = lister.clone();
                let path = path.clone();
                async move {
                    let children = match lister.list_children(&path).await {
                        Ok((children, _)) => children,
                        Err(err) => {
                            warn!(path = %path, error = %err, "failed to relist children");
                            return !tx.is_closed();
                        }
                    };
                    let mut last = last.lock().await;
                    if *last == children {
                        return true;
                    }
                    *last = children.clone();
                    tx.send(children).is_ok()
                }
            });
            Ok(rx)
        })
    }

    fn close(&self) -> BoxFuture<'static, CoordResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if let Some(handle) = inner.keepalive.lock().await.take() {
                handle.abort();
            }
            if !inner.alive.send_replace(false) {
                return Ok(());
            }
            inner
                .post::<_, serde_json::Value>(LEASE_REVOKE, &LeaseIdRequest { id: inner.lease })
                .await?;
            info!(lease = inner.lease, "etcd session closed");
            Ok(())
        })
    }
}
