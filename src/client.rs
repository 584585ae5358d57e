// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The key-value client handle.
//!
//! A [`KvClient`] owns the connection to the store and hands out transaction builders. The
//! channel and the stub derived from it are kept together as one link behind an `Arc`, so
//! that every request sees a complete pair even while another request is replacing it.

use crate::{
    context::Context,
    error::Result,
    op::Op,
    proto::{
        DeleteRangeRequest, DeleteRangeResponse, PutRequest, PutResponse, RangeRequest,
        RangeResponse, ResponseOp,
    },
    remote::{Channel, ConnectionManager, KvRpc},
    transaction::Txn,
};
use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};
use tracing::{debug, info};

/// Settings applied by a [`KvClient`] to requests that don't bring their own [`Context`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    /// Deadline for a whole request, reconnects included. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// The context used by requests that are not given one explicitly.
    pub fn default_context(&self) -> Context {
        match self.request_timeout {
            Some(timeout) => Context::background().with_timeout(timeout),
            None => Context::background(),
        }
    }
}

/// A channel together with the stub derived from it.
pub(crate) struct Link<C: Channel> {
    pub(crate) channel: C,
    pub(crate) stub: C::Stub,
}

impl<C: Channel> Link<C> {
    fn new(channel: C) -> Self {
        let stub = channel.kv_stub();
        Self { channel, stub }
    }
}

/// A handle to a remote key-value store.
///
/// The handle is `Sync`: transactions and single operations may be issued from many threads at
/// once. When a request hits a transport error, the connection is replaced for everyone using
/// the handle.
///
/// # Example
///
/// ```
/// use kvtxn::{
///     client::KvClient,
///     compare::{Compare, CompareOp},
///     memory::{MemoryConnector, MemoryStore},
///     op::Op,
/// };
///
/// let store = MemoryStore::new();
/// let connector = MemoryConnector::new(store.clone());
/// let kv = KvClient::new(connector.clone(), connector.connect());
///
/// kv.put("k1", "v1").unwrap();
///
/// let tx = kv.txn();
/// tx.when([Compare::value("k1", CompareOp::Equal, "v1")])
///     .and_then([Op::put("k2", "v2")])
///     .or_else([Op::put("k4", "v4")]);
/// let response = tx.commit().unwrap();
/// assert!(response.succeeded);
/// ```
pub struct KvClient<M: ConnectionManager> {
    manager: M,
    link: RwLock<Arc<Link<M::Channel>>>,
    config: ClientConfig,
}

impl<M: ConnectionManager> KvClient<M> {
    /// Creates a client that sends requests over `channel` and asks `manager` to replace it when
    /// it breaks.
    pub fn new(manager: M, channel: M::Channel) -> Self {
        Self::with_config(manager, channel, ClientConfig::default())
    }

    pub fn with_config(manager: M, channel: M::Channel, config: ClientConfig) -> Self {
        Self {
            manager,
            link: RwLock::new(Arc::new(Link::new(channel))),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Starts building a conditional transaction against this store.
    pub fn txn(&self) -> Txn<'_, M> {
        Txn::new(self)
    }

    /// Reads `key` under the default context.
    pub fn get(&self, key: impl Into<Vec<u8>>) -> Result<RangeResponse> {
        let request = RangeRequest {
            key: key.into(),
            ..Default::default()
        };
        let ctx = self.config.default_context();
        self.invoke(&ctx, |stub, ctx| stub.range(ctx, &request))
    }

    /// Writes `value` under `key` under the default context.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<PutResponse> {
        let request = PutRequest {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        };
        let ctx = self.config.default_context();
        self.invoke(&ctx, |stub, ctx| stub.put(ctx, &request))
    }

    /// Deletes `key` under the default context.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<DeleteRangeResponse> {
        let request = DeleteRangeRequest {
            key: key.into(),
            ..Default::default()
        };
        let ctx = self.config.default_context();
        self.invoke(&ctx, |stub, ctx| stub.delete_range(ctx, &request))
    }

    /// Runs a single operation under the default context.
    pub fn do_op(&self, op: &Op) -> Result<ResponseOp> {
        self.do_op_with(&self.config.default_context(), op)
    }

    /// Runs a single operation, reconnecting on transport errors like a transaction commit does.
    pub fn do_op_with(&self, ctx: &Context, op: &Op) -> Result<ResponseOp> {
        match op {
            Op::Get(r) => self
                .invoke(ctx, |stub, ctx| stub.range(ctx, r))
                .map(ResponseOp::Range),
            Op::Put(r) => self
                .invoke(ctx, |stub, ctx| stub.put(ctx, r))
                .map(ResponseOp::Put),
            Op::Delete(r) => self
                .invoke(ctx, |stub, ctx| stub.delete_range(ctx, r))
                .map(ResponseOp::DeleteRange),
            Op::Txn(r) => self
                .invoke(ctx, |stub, ctx| stub.txn(ctx, r))
                .map(ResponseOp::Txn),
        }
    }

    /// The link requests should currently use.
    pub(crate) fn current_link(&self) -> Arc<Link<M::Channel>> {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs a link over `channel` unless `failed` was already replaced by someone else.
    ///
    /// Returns whether the new link was installed.
    pub(crate) fn replace_link(&self, failed: &Arc<Link<M::Channel>>, channel: M::Channel) -> bool {
        let replacement = Arc::new(Link::new(channel));
        let mut current = self.link.write().unwrap_or_else(PoisonError::into_inner);
        if Arc::ptr_eq(&current, failed) {
            *current = replacement;
            info!("installed replacement connection");
            true
        } else {
            debug!("connection was already replaced by a concurrent request");
            false
        }
    }
}

impl<M> std::fmt::Debug for KvClient<M>
where
    M: ConnectionManager + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvClient")
            .field("manager", &self.manager)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
