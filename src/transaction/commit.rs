// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The reconnect-and-retry loop behind [`Txn::commit`](super::Txn::commit) and the single-op
//! calls of [`KvClient`].

use crate::{
    client::KvClient,
    context::Context,
    error::{Error, Result},
    remote::{Channel, ConnectionManager, RpcError},
};
use tracing::{debug, error, warn};

type Stub<M> = <<M as ConnectionManager>::Channel as Channel>::Stub;

impl<M: ConnectionManager> KvClient<M> {
    /// Runs `call` against the current stub until it completes without a transport error.
    ///
    /// After a transport error the connection manager is asked for a replacement channel, which
    /// is installed for every user of this client before the next attempt. The loop ends with:
    ///
    /// - the call's response, once a round trip completes;
    /// - [`Error::Remote`] as soon as the store reports an error;
    /// - [`Error::Connection`] when the manager cannot replace the channel;
    /// - [`Error::Context`] when `ctx` is done, checked before every attempt and before every
    ///   reconnect. An expired context never reaches the connection manager.
    pub(crate) fn invoke<T, F>(&self, ctx: &Context, mut call: F) -> Result<T>
    where
        F: FnMut(&Stub<M>, &Context) -> Result<T, RpcError>,
    {
        let mut attempt: u64 = 0;
        loop {
            if let Some(err) = ctx.err() {
                debug!(attempt, %err, "context done before sending");
                return Err(err.into());
            }
            attempt += 1;

            let link = self.current_link();
            debug!(attempt, "sending request");
            let cause = match call(&link.stub, ctx) {
                Ok(response) => return Ok(response),
                Err(RpcError::Status(status)) => return Err(Error::Remote(status)),
                Err(cause) => cause,
            };
            warn!(attempt, error = %cause, "request failed in transport");

            if let Some(err) = ctx.err() {
                debug!(attempt, %err, "context done, not reconnecting");
                return Err(err.into());
            }

            match self.manager().retry_connection(&link.channel, &cause) {
                Ok(channel) => {
                    self.replace_link(&link, channel);
                }
                Err(err) => {
                    error!(attempt, error = %err, "connection manager gave up");
                    return Err(Error::Connection(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        client::KvClient,
        compare::{Compare, CompareOp},
        context::{Context, ContextError},
        error::Error,
        memory::{MemoryChannel, MemoryStore},
        op::Op,
        proto::{
            DeleteRangeRequest, DeleteRangeResponse, PutRequest, PutResponse, RangeRequest,
            RangeResponse, TxnRequest, TxnResponse,
        },
        remote::{
            Channel, ConnectionError, ConnectionManager, KvRpc, RpcError, Status,
            TransportError, TransportErrorKind,
        },
    };
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::{Duration, Instant},
    };

    /// Fails the first `failures` calls across all of its stubs, then forwards to the store.
    #[derive(Clone)]
    struct FlakyChannel {
        inner: MemoryChannel,
        failures_left: Arc<AtomicUsize>,
        sent: Arc<AtomicUsize>,
    }

    impl FlakyChannel {
        fn fail_or<T>(&self, forward: impl FnOnce() -> Result<T, RpcError>) -> Result<T, RpcError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(TransportError::new(TransportErrorKind::Unavailable, "injected").into());
            }
            forward()
        }
    }

    impl KvRpc for FlakyChannel {
        fn range(&self, ctx: &Context, r: &RangeRequest) -> Result<RangeResponse, RpcError> {
            self.fail_or(|| self.inner.range(ctx, r))
        }

        fn put(&self, ctx: &Context, r: &PutRequest) -> Result<PutResponse, RpcError> {
            self.fail_or(|| self.inner.put(ctx, r))
        }

        fn delete_range(
            &self,
            ctx: &Context,
            r: &DeleteRangeRequest,
        ) -> Result<DeleteRangeResponse, RpcError> {
            self.fail_or(|| self.inner.delete_range(ctx, r))
        }

        fn txn(&self, ctx: &Context, r: &TxnRequest) -> Result<TxnResponse, RpcError> {
            self.fail_or(|| self.inner.txn(ctx, r))
        }
    }

    impl Channel for FlakyChannel {
        type Stub = FlakyChannel;

        fn kv_stub(&self) -> Self::Stub {
            self.clone()
        }
    }

    /// Hands back the same flaky channel, or gives up if `give_up` is set.
    struct CountingManager {
        reconnects: AtomicUsize,
        give_up: bool,
    }

    impl ConnectionManager for CountingManager {
        type Channel = FlakyChannel;

        fn retry_connection(
            &self,
            current: &FlakyChannel,
            cause: &RpcError,
        ) -> Result<FlakyChannel, ConnectionError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            if self.give_up {
                return Err(ConnectionError::new("no endpoints left").caused_by(cause));
            }
            Ok(current.clone())
        }
    }

    fn setup(failures: usize, give_up: bool) -> (KvClient<CountingManager>, FlakyChannel) {
        let channel = FlakyChannel {
            inner: MemoryChannel::new(MemoryStore::new()),
            failures_left: Arc::new(AtomicUsize::new(failures)),
            sent: Arc::new(AtomicUsize::new(0)),
        };
        let manager = CountingManager {
            reconnects: AtomicUsize::new(0),
            give_up,
        };
        (KvClient::new(manager, channel.clone()), channel)
    }

    fn put_txn(kv: &KvClient<CountingManager>) -> crate::transaction::Txn<'_, CountingManager> {
        let tx = kv.txn();
        tx.when([Compare::version("k", CompareOp::Equal, 0)])
            .and_then([Op::put("k", "v")]);
        tx
    }

    #[test]
    fn succeeds_on_first_attempt_without_reconnecting() {
        let (kv, channel) = setup(0, false);
        let response = put_txn(&kv).commit().unwrap();
        assert!(response.succeeded);
        assert_eq!(kv.manager().reconnects.load(Ordering::SeqCst), 0);
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn n_failures_mean_n_reconnects() {
        for n in [1, 2, 5] {
            let (kv, channel) = setup(n, false);
            let response = put_txn(&kv).commit().unwrap();
            assert!(response.succeeded);
            assert_eq!(kv.manager().reconnects.load(Ordering::SeqCst), n);
            assert_eq!(channel.sent.load(Ordering::SeqCst), n + 1);
        }
    }

    #[test]
    fn manager_giving_up_ends_the_loop() {
        let (kv, channel) = setup(usize::MAX, true);
        let err = put_txn(&kv).commit().unwrap_err();
        let Error::Connection(err) = err else {
            panic!("expected a connection error, got {err:?}");
        };
        assert_eq!(err.reason, "no endpoints left");
        assert_eq!(
            err.cause.map(|cause| cause.kind),
            Some(TransportErrorKind::Unavailable)
        );
        assert_eq!(kv.manager().reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remote_errors_are_not_retried() {
        let (kv, channel) = setup(0, false);
        let tx = kv.txn();
        // a version comparison against bytes is rejected by the store
        tx.when([Compare::new(
            "k",
            crate::compare::Target::Version,
            CompareOp::Equal,
            "v",
        )]);
        let err = tx.commit().unwrap_err();
        assert!(
            matches!(&err, Error::Remote(Status { code: crate::remote::Code::InvalidArgument, .. })),
            "{err:?}"
        );
        assert_eq!(kv.manager().reconnects.load(Ordering::SeqCst), 0);
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_context_fails_fast() {
        let (kv, channel) = setup(0, false);
        let ctx = Context::background().with_deadline(Instant::now() - Duration::from_millis(1));
        let err = put_txn(&kv).commit_with(&ctx).unwrap_err();
        assert_eq!(err, Error::Context(ContextError::DeadlineExceeded));
        assert_eq!(channel.sent.load(Ordering::SeqCst), 0);
        assert_eq!(kv.manager().reconnects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelled_context_is_never_sent() {
        let (kv, channel) = setup(1, false);
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let err = put_txn(&kv).commit_with(&ctx).unwrap_err();
        assert_eq!(err, Error::Context(ContextError::Cancelled));
        assert_eq!(channel.sent.load(Ordering::SeqCst), 0);
        assert_eq!(kv.manager().reconnects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn single_ops_share_the_retry_loop() {
        let (kv, _channel) = setup(2, false);
        kv.put("k", "v").unwrap();
        assert_eq!(kv.manager().reconnects.load(Ordering::SeqCst), 2);
        assert_eq!(kv.get("k").unwrap().count, 1);
    }
}
