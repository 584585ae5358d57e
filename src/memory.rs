// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! An in-process store behind the [`remote`](crate::remote) seams.
//!
//! [`MemoryStore`] keeps a single revisioned key space and executes requests the way an
//! etcd-style server does: every request that writes bumps the store revision once, and a
//! transaction evaluates its comparisons and runs one branch atomically. Only the latest revision
//! is kept, so reads at older revisions are rejected as compacted.
//!
//! [`MemoryChannel`] and [`MemoryConnector`] connect a [`KvClient`](crate::client::KvClient) to
//! a store. Channels can be closed to simulate a broken connection, and the connector can be
//! told to refuse reconnects.
//!
//! ```
//! use kvtxn::{client::KvClient, memory::{MemoryConnector, MemoryStore}};
//!
//! let store = MemoryStore::new();
//! let connector = MemoryConnector::new(store.clone());
//! let channel = connector.connect();
//! let kv = KvClient::new(connector.clone(), channel.clone());
//!
//! channel.close();
//! // the client reconnects through the connector and the put goes through
//! kv.put("k", "v")?;
//! assert_eq!(connector.reconnects(), 1);
//! assert_eq!(store.get(b"k").map(|kv| kv.value), Some(b"v".to_vec()));
//! # Ok::<(), kvtxn::Error>(())
//! ```

use crate::{
    compare::{self, Compare},
    context::Context,
    proto::{
        DeleteRangeRequest, DeleteRangeResponse, KeyValue, PutRequest, PutResponse, RangeRequest,
        RangeResponse, RequestOp, ResponseHeader, ResponseOp, TxnRequest, TxnResponse,
    },
    remote::{
        Channel, ConnectionError, ConnectionManager, KvRpc, RpcError, Status, TransportError,
        TransportErrorKind,
    },
};
use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tracing::debug;

/// The state of the store at one revision.
#[derive(Debug, Clone, Default)]
struct KeySpace {
    revision: i64,
    kvs: BTreeMap<Vec<u8>, KeyValue>,
}

impl KeySpace {
    fn header(&self) -> ResponseHeader {
        ResponseHeader {
            revision: self.revision,
        }
    }

    /// Keys in `[key, range_end)`, with the conventions of [`RangeRequest::range_end`].
    fn keys_in(&self, key: &[u8], range_end: &[u8]) -> Vec<&KeyValue> {
        match range_end {
            [] => self.kvs.get(key).into_iter().collect(),
            [0] => self
                .kvs
                .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
                .map(|(_, kv)| kv)
                .collect(),
            end if end <= key => Vec::new(),
            end => self
                .kvs
                .range::<[u8], _>((Bound::Included(key), Bound::Excluded(end)))
                .map(|(_, kv)| kv)
                .collect(),
        }
    }

    fn compare(&self, cmp: &Compare) -> Result<bool, Status> {
        let invalid = |err: compare::TargetMismatch| Status::invalid_argument(err.to_string());
        let keys = self.keys_in(&cmp.key, &cmp.range_end);
        if keys.is_empty() {
            return compare::evaluate(cmp, None).map_err(invalid);
        }
        let mut holds = true;
        for kv in keys {
            holds &= compare::evaluate(cmp, Some(kv)).map_err(invalid)?;
        }
        Ok(holds)
    }

    fn range(&self, request: &RangeRequest) -> Result<RangeResponse, Status> {
        if request.revision > self.revision {
            return Err(Status::new(
                crate::remote::Code::OutOfRange,
                "required revision is a future revision",
            ));
        }
        if request.revision > 0 && request.revision < self.revision {
            return Err(Status::new(
                crate::remote::Code::FailedPrecondition,
                "required revision has been compacted",
            ));
        }

        let matched = self.keys_in(&request.key, &request.range_end);
        let count = matched.len() as i64;
        let mut response = RangeResponse {
            header: self.header(),
            count,
            ..Default::default()
        };
        if request.count_only {
            return Ok(response);
        }

        let limit = usize::try_from(request.limit)
            .ok()
            .filter(|&limit| limit > 0)
            .unwrap_or(usize::MAX);
        response.more = matched.len() > limit;
        response.kvs = matched
            .into_iter()
            .take(limit)
            .map(|kv| {
                let mut kv = kv.clone();
                if request.keys_only {
                    kv.value.clear();
                }
                kv
            })
            .collect();
        Ok(response)
    }

    fn put(&mut self, request: &PutRequest, revision: i64) -> Result<PutResponse, Status> {
        let prev = self.kvs.get(&request.key).cloned();
        if (request.ignore_value || request.ignore_lease) && prev.is_none() {
            return Err(Status::invalid_argument("key not found"));
        }

        let value = match (&prev, request.ignore_value) {
            (Some(prev), true) => prev.value.clone(),
            _ => request.value.clone(),
        };
        let lease = match (&prev, request.ignore_lease) {
            (Some(prev), true) => prev.lease,
            _ => request.lease,
        };
        let kv = KeyValue {
            key: request.key.clone(),
            create_revision: prev.as_ref().map_or(revision, |prev| prev.create_revision),
            mod_revision: revision,
            version: prev.as_ref().map_or(0, |prev| prev.version) + 1,
            value,
            lease,
        };
        self.kvs.insert(request.key.clone(), kv);
        self.revision = revision;

        Ok(PutResponse {
            header: self.header(),
            prev_kv: prev.filter(|_| request.prev_kv),
        })
    }

    fn delete_range(&mut self, request: &DeleteRangeRequest, revision: i64) -> DeleteRangeResponse {
        let doomed: Vec<Vec<u8>> = self
            .keys_in(&request.key, &request.range_end)
            .into_iter()
            .map(|kv| kv.key.clone())
            .collect();
        let mut prev_kvs = Vec::with_capacity(doomed.len());
        for key in &doomed {
            if let Some(kv) = self.kvs.remove(key) {
                prev_kvs.push(kv);
            }
        }
        if !doomed.is_empty() {
            self.revision = revision;
        }

        DeleteRangeResponse {
            header: self.header(),
            deleted: doomed.len() as i64,
            prev_kvs: if request.prev_kv { prev_kvs } else { Vec::new() },
        }
    }

    fn txn(&mut self, request: &TxnRequest, revision: i64) -> Result<TxnResponse, Status> {
        let mut succeeded = true;
        for cmp in &request.compare {
            // every comparison is validated, even after one has failed
            succeeded &= self.compare(cmp)?;
        }

        let branch = if succeeded {
            &request.success
        } else {
            &request.failure
        };
        let responses = branch
            .iter()
            .map(|op| self.apply(op, revision))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TxnResponse {
            header: self.header(),
            succeeded,
            responses,
        })
    }

    fn apply(&mut self, op: &RequestOp, revision: i64) -> Result<ResponseOp, Status> {
        Ok(match op {
            RequestOp::Range(r) => ResponseOp::Range(self.range(r)?),
            RequestOp::Put(r) => ResponseOp::Put(self.put(r, revision)?),
            RequestOp::DeleteRange(r) => ResponseOp::DeleteRange(self.delete_range(r, revision)),
            RequestOp::Txn(r) => ResponseOp::Txn(self.txn(r, revision)?),
        })
    }
}

/// A revisioned key-value store living in this process.
///
/// Clones share the same key space.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<KeySpace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The revision of the last write, zero for a store that was never written to.
    pub fn revision(&self) -> i64 {
        self.lock().revision
    }

    /// Looks at a key directly, bypassing any channel.
    pub fn get(&self, key: &[u8]) -> Option<KeyValue> {
        self.lock().kvs.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().kvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().kvs.is_empty()
    }

    pub fn range(&self, request: &RangeRequest) -> Result<RangeResponse, Status> {
        self.lock().range(request)
    }

    pub fn put(&self, request: &PutRequest) -> Result<PutResponse, Status> {
        self.write(|space, revision| space.put(request, revision))
    }

    pub fn delete_range(&self, request: &DeleteRangeRequest) -> Result<DeleteRangeResponse, Status> {
        self.write(|space, revision| Ok(space.delete_range(request, revision)))
    }

    /// Runs a transaction atomically: if any operation of the chosen branch fails, nothing is
    /// applied.
    pub fn txn(&self, request: &TxnRequest) -> Result<TxnResponse, Status> {
        self.write(|space, revision| space.txn(request, revision))
    }

    /// Applies `f` to a copy of the key space and swaps it in only if `f` succeeds.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut KeySpace, i64) -> Result<T, Status>,
    ) -> Result<T, Status> {
        let mut space = self.lock();
        let mut working = space.clone();
        let revision = space.revision + 1;
        let out = f(&mut working, revision)?;
        *space = working;
        Ok(out)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KeySpace> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connection to a [`MemoryStore`].
///
/// Clones share the open/closed state, so closing any clone breaks every stub derived from the
/// channel.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    store: MemoryStore,
    open: Arc<AtomicBool>,
}

impl MemoryChannel {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Breaks the connection: every later call fails with
    /// [`TransportErrorKind::Unavailable`].
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn call<T>(
        &self,
        ctx: &Context,
        f: impl FnOnce(&MemoryStore) -> Result<T, Status>,
    ) -> Result<T, RpcError> {
        if let Some(err) = ctx.err() {
            return Err(TransportError::from(err).into());
        }
        if !self.is_open() {
            return Err(
                TransportError::new(TransportErrorKind::Unavailable, "channel is closed").into(),
            );
        }
        Ok(f(&self.store)?)
    }
}

impl KvRpc for MemoryChannel {
    fn range(&self, ctx: &Context, request: &RangeRequest) -> Result<RangeResponse, RpcError> {
        self.call(ctx, |store| store.range(request))
    }

    fn put(&self, ctx: &Context, request: &PutRequest) -> Result<PutResponse, RpcError> {
        self.call(ctx, |store| store.put(request))
    }

    fn delete_range(
        &self,
        ctx: &Context,
        request: &DeleteRangeRequest,
    ) -> Result<DeleteRangeResponse, RpcError> {
        self.call(ctx, |store| store.delete_range(request))
    }

    fn txn(&self, ctx: &Context, request: &TxnRequest) -> Result<TxnResponse, RpcError> {
        self.call(ctx, |store| store.txn(request))
    }
}

impl Channel for MemoryChannel {
    type Stub = MemoryChannel;

    fn kv_stub(&self) -> Self::Stub {
        self.clone()
    }
}

/// Opens [`MemoryChannel`]s to one store, and reopens them when they break.
///
/// Clones share the reconnect counter and the refusal switch.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
    reconnects: Arc<AtomicUsize>,
    refusing: Arc<AtomicBool>,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            reconnects: Arc::new(AtomicUsize::new(0)),
            refusing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens a fresh channel to the store.
    pub fn connect(&self) -> MemoryChannel {
        MemoryChannel::new(self.store.clone())
    }

    /// How many times a replacement connection was requested.
    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::Acquire)
    }

    /// While set, every reconnect attempt fails with a [`ConnectionError`].
    pub fn refuse_reconnects(&self, refuse: bool) {
        self.refusing.store(refuse, Ordering::Release);
    }
}

impl ConnectionManager for MemoryConnector {
    type Channel = MemoryChannel;

    fn retry_connection(
        &self,
        _current: &MemoryChannel,
        cause: &RpcError,
    ) -> Result<MemoryChannel, ConnectionError> {
        let attempt = self.reconnects.fetch_add(1, Ordering::AcqRel) + 1;
        if self.refusing.load(Ordering::Acquire) {
            debug!(attempt, %cause, "refusing to reconnect");
            return Err(ConnectionError::new("store is not accepting connections").caused_by(cause));
        }
        debug!(attempt, %cause, "reconnecting to in-memory store");
        Ok(self.connect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compare::CompareOp, op::Op};

    fn put(store: &MemoryStore, key: &str, value: &str) -> PutResponse {
        let Op::Put(request) = Op::put(key, value) else {
            unreachable!()
        };
        store.put(&request).unwrap()
    }

    fn txn(compare: Vec<Compare>, success: Vec<Op>, failure: Vec<Op>) -> TxnRequest {
        TxnRequest {
            compare,
            success: success.into_iter().map(Op::into_request_op).collect(),
            failure: failure.into_iter().map(Op::into_request_op).collect(),
        }
    }

    #[test]
    fn put_tracks_versions_and_revisions() {
        let store = MemoryStore::new();
        assert_eq!(put(&store, "a", "1").header.revision, 1);
        assert_eq!(put(&store, "b", "1").header.revision, 2);
        assert_eq!(put(&store, "a", "2").header.revision, 3);

        let a = store.get(b"a").unwrap();
        assert_eq!(a.version, 2);
        assert_eq!(a.create_revision, 1);
        assert_eq!(a.mod_revision, 3);
        assert_eq!(a.value, b"2".to_vec());
    }

    #[test]
    fn ignore_value_requires_existing_key() {
        let store = MemoryStore::new();
        let Op::Put(request) = Op::put("k", "").with_ignore_value().with_lease(5) else {
            unreachable!()
        };
        assert_eq!(
            store.put(&request).unwrap_err().code,
            crate::remote::Code::InvalidArgument
        );

        put(&store, "k", "kept");
        store.put(&request).unwrap();
        let kv = store.get(b"k").unwrap();
        assert_eq!(kv.value, b"kept".to_vec());
        assert_eq!(kv.lease, 5);
    }

    #[test]
    fn range_by_prefix_with_limit() {
        let store = MemoryStore::new();
        for key in ["a/1", "a/2", "a/3", "b/1"] {
            put(&store, key, "x");
        }
        let Op::Get(request) = Op::get("a/").with_prefix().with_limit(2).with_keys_only() else {
            unreachable!()
        };
        let response = store.range(&request).unwrap();
        assert_eq!(response.count, 3);
        assert!(response.more);
        assert_eq!(
            response.kvs.iter().map(|kv| kv.key.clone()).collect::<Vec<_>>(),
            vec![b"a/1".to_vec(), b"a/2".to_vec()]
        );
        assert!(response.kvs.iter().all(|kv| kv.value.is_empty()));
    }

    #[test]
    fn range_from_key_reaches_the_end() {
        let store = MemoryStore::new();
        for key in ["a", "b", "c"] {
            put(&store, key, "x");
        }
        let Op::Get(request) = Op::get("b").with_from_key().with_count_only() else {
            unreachable!()
        };
        let response = store.range(&request).unwrap();
        assert_eq!(response.count, 2);
        assert!(response.kvs.is_empty());
    }

    #[test]
    fn old_revisions_are_compacted() {
        let store = MemoryStore::new();
        put(&store, "a", "1");
        put(&store, "a", "2");
        let Op::Get(old) = Op::get("a").with_revision(1) else {
            unreachable!()
        };
        assert_eq!(
            store.range(&old).unwrap_err().code,
            crate::remote::Code::FailedPrecondition
        );
        let Op::Get(future) = Op::get("a").with_revision(10) else {
            unreachable!()
        };
        assert_eq!(
            store.range(&future).unwrap_err().code,
            crate::remote::Code::OutOfRange
        );
    }

    #[test]
    fn delete_bumps_revision_only_when_something_goes() {
        let store = MemoryStore::new();
        put(&store, "a", "1");
        let Op::Delete(missing) = Op::delete("zzz") else {
            unreachable!()
        };
        assert_eq!(store.delete_range(&missing).unwrap().deleted, 0);
        assert_eq!(store.revision(), 1);

        let Op::Delete(request) = Op::delete("a").with_prev_kv() else {
            unreachable!()
        };
        let response = store.delete_range(&request).unwrap();
        assert_eq!(response.deleted, 1);
        assert_eq!(response.prev_kvs[0].value, b"1".to_vec());
        assert_eq!(store.revision(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn txn_runs_success_branch() {
        let store = MemoryStore::new();
        put(&store, "k1", "v1");
        let response = store
            .txn(&txn(
                vec![Compare::value("k1", CompareOp::Equal, "v1")],
                vec![Op::put("k2", "v2")],
                vec![Op::put("k4", "v4")],
            ))
            .unwrap();
        assert!(response.succeeded);
        assert_eq!(response.responses.len(), 1);
        assert_eq!(response.responses[0].type_name(), "Put");
        assert!(store.get(b"k2").is_some());
        assert!(store.get(b"k4").is_none());
    }

    #[test]
    fn txn_writes_share_one_revision() {
        let store = MemoryStore::new();
        let response = store
            .txn(&txn(
                vec![],
                vec![Op::put("a", "1"), Op::put("b", "1"), Op::get("a")],
                vec![],
            ))
            .unwrap();
        assert_eq!(response.header.revision, 1);
        assert_eq!(store.get(b"a").unwrap().mod_revision, 1);
        assert_eq!(store.get(b"b").unwrap().mod_revision, 1);
        // reads inside the branch see earlier writes of the same branch
        let ResponseOp::Range(range) = &response.responses[2] else {
            panic!("expected a range response");
        };
        assert_eq!(range.count, 1);
    }

    #[test]
    fn failed_txn_leaves_store_untouched() {
        let store = MemoryStore::new();
        let result = store.txn(&txn(
            vec![],
            vec![
                Op::put("a", "1"),
                Op::put("missing", "").with_ignore_value(),
            ],
            vec![],
        ));
        assert!(result.is_err());
        assert!(store.is_empty());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn prefix_comparison_needs_every_key() {
        let store = MemoryStore::new();
        put(&store, "p/1", "x");
        put(&store, "p/2", "y");
        let all_x = Compare::value("p/", CompareOp::Equal, "x").with_prefix();
        let response = store.txn(&txn(vec![all_x], vec![], vec![])).unwrap();
        assert!(!response.succeeded);

        let all_versioned = Compare::version("p/", CompareOp::Greater, 0).with_prefix();
        let response = store.txn(&txn(vec![all_versioned], vec![], vec![])).unwrap();
        assert!(response.succeeded);
    }

    #[test]
    fn nested_txn_runs_inside_outer_branch() {
        let store = MemoryStore::new();
        let inner = txn(
            vec![Compare::create_revision("n", CompareOp::Equal, 0)],
            vec![Op::put("n", "inner")],
            vec![],
        );
        let response = store
            .txn(&txn(vec![], vec![Op::txn(inner)], vec![]))
            .unwrap();
        let ResponseOp::Txn(nested) = &response.responses[0] else {
            panic!("expected a nested txn response");
        };
        assert!(nested.succeeded);
        assert_eq!(store.get(b"n").unwrap().value, b"inner".to_vec());
    }

    #[test]
    fn closed_channel_fails_in_transport() {
        let channel = MemoryChannel::new(MemoryStore::new());
        channel.close();
        let err = channel
            .txn(&Context::background(), &TxnRequest::default())
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn refusing_connector_reports_cause() {
        let connector = MemoryConnector::new(MemoryStore::new());
        connector.refuse_reconnects(true);
        let cause = RpcError::from(TransportError::new(TransportErrorKind::Io, "boom"));
        let err = connector
            .retry_connection(&connector.connect(), &cause)
            .unwrap_err();
        assert_eq!(err.cause.map(|c| c.kind), Some(TransportErrorKind::Io));
        assert_eq!(connector.reconnects(), 1);
    }
}
