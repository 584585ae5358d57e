// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::Phase;
use crate::{
    client::KvClient,
    compare::Compare,
    context::Context,
    error::Result,
    op::Op,
    proto::{RequestOp, TxnRequest, TxnResponse},
    remote::{ConnectionManager, KvRpc},
};
use smallvec::SmallVec;
use std::sync::{Mutex, PoisonError};
use tracing::debug_span;

// Most transactions compare and touch only a handful of keys.
type Compares = SmallVec<[Compare; 4]>;
type RequestOps = SmallVec<[RequestOp; 4]>;

#[derive(Debug, Default)]
struct TxnState {
    phase: Phase,
    compare: Compares,
    success: RequestOps,
    failure: RequestOps,
}

/// A conditional transaction under construction.
///
/// Built with [`KvClient::txn`], configured with at most one call each to [`when`](Self::when),
/// [`and_then`](Self::and_then) and [`or_else`](Self::or_else), in that order, and consumed by
/// [`commit`](Self::commit).
///
/// The configuration methods take `&self` and may be called from several threads sharing the
/// builder. They are serialized internally, so the ordering checks are race-free: of two
/// concurrent calls to the same method, exactly one succeeds.
///
/// # Panics
///
/// Calling a configuration method twice, or after a method that comes later in the order, panics
/// with a [`Misuse`](super::Misuse) message. Such a transaction would not mean what its author
/// intended, so it is never sent.
///
/// # Example
///
/// ```
/// # use kvtxn::{client::KvClient, memory::{MemoryConnector, MemoryStore}};
/// use kvtxn::{compare::{Compare, CompareOp}, op::Op};
/// # let connector = MemoryConnector::new(MemoryStore::new());
/// # let kv = KvClient::new(connector.clone(), connector.connect());
///
/// let tx = kv.txn();
/// tx.when([
///     Compare::value("k1", CompareOp::Greater, "v1"),
///     Compare::version("k1", CompareOp::Equal, 2),
/// ])
/// .and_then([Op::put("k2", "v2"), Op::put("k3", "v3")])
/// .or_else([Op::put("k4", "v4"), Op::put("k5", "v5")]);
///
/// let response = tx.commit()?;
/// // "k1" does not exist, so the failure branch ran
/// assert!(!response.succeeded);
/// assert_eq!(response.responses.len(), 2);
/// # Ok::<(), kvtxn::Error>(())
/// ```
pub struct Txn<'a, M: ConnectionManager> {
    kv: &'a KvClient<M>,
    state: Mutex<TxnState>,
}

impl<'a, M: ConnectionManager> Txn<'a, M> {
    pub(crate) fn new(kv: &'a KvClient<M>) -> Self {
        Self {
            kv,
            state: Mutex::new(TxnState::default()),
        }
    }

    /// Adds the comparisons that decide which branch runs. All of them must hold for the success
    /// branch to run.
    ///
    /// # Panics
    ///
    /// If called twice, or after [`and_then`](Self::and_then) or [`or_else`](Self::or_else).
    #[track_caller]
    pub fn when<I>(&self, comparisons: I) -> &Self
    where
        I: IntoIterator<Item = Compare>,
    {
        let comparisons: Compares = comparisons.into_iter().collect();
        self.declare(Phase::Conditions, |state| state.compare.extend(comparisons));
        self
    }

    /// Adds the operations to run if every comparison holds.
    ///
    /// # Panics
    ///
    /// If called twice, or after [`or_else`](Self::or_else).
    #[track_caller]
    pub fn and_then<I>(&self, ops: I) -> &Self
    where
        I: IntoIterator<Item = Op>,
    {
        let ops: RequestOps = ops.into_iter().map(Op::into_request_op).collect();
        self.declare(Phase::Success, |state| state.success.extend(ops));
        self
    }

    /// Adds the operations to run if any comparison fails.
    ///
    /// # Panics
    ///
    /// If called twice.
    #[track_caller]
    pub fn or_else<I>(&self, ops: I) -> &Self
    where
        I: IntoIterator<Item = Op>,
    {
        let ops: RequestOps = ops.into_iter().map(Op::into_request_op).collect();
        self.declare(Phase::Failure, |state| state.failure.extend(ops));
        self
    }

    /// Enters `next` and appends to the lists in one critical section.
    #[track_caller]
    fn declare(&self, next: Phase, append: impl FnOnce(&mut TxnState)) {
        let outcome = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.phase.advance(next).map(|()| append(&mut state))
        };
        // raised outside the critical section so the lock stays usable
        if let Err(misuse) = outcome {
            panic!("{misuse}");
        }
    }

    /// How far the builder has been configured.
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Produces the request that [`commit`](Self::commit) would send.
    pub fn freeze(&self) -> TxnRequest {
        let state = self.lock();
        TxnRequest {
            compare: state.compare.to_vec(),
            success: state.success.to_vec(),
            failure: state.failure.to_vec(),
        }
    }

    /// Sends the transaction under the client's default context.
    ///
    /// See [`commit_with`](Self::commit_with).
    pub fn commit(self) -> Result<TxnResponse> {
        let ctx = self.kv.config().default_context();
        self.commit_with(&ctx)
    }

    /// Sends the transaction under `ctx`, reconnecting as long as the connection manager can
    /// provide a new connection.
    ///
    /// Returns the store's response on the first round trip that completes, whichever branch it
    /// reports. Errors reported by the store are returned as they are and never retried.
    ///
    /// A retry resubmits the same request. If a previous attempt was applied but its
    /// acknowledgement was lost, the transaction runs again; whether that is harmless depends on
    /// the comparisons failing once the first attempt took effect.
    pub fn commit_with(self, ctx: &Context) -> Result<TxnResponse> {
        let request = self.freeze();
        let _span = debug_span!(
            "txn_commit",
            compare = request.compare.len(),
            success = request.success.len(),
            failure = request.failure.len()
        )
        .entered();
        self.kv.invoke(ctx, |stub, ctx| stub.txn(ctx, &request))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TxnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M: ConnectionManager> std::fmt::Debug for Txn<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn").field("state", &*self.lock()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compare::CompareOp,
        memory::{MemoryConnector, MemoryStore},
    };
    use std::{
        panic::{AssertUnwindSafe, catch_unwind},
        thread,
    };

    fn client() -> KvClient<MemoryConnector> {
        let connector = MemoryConnector::new(MemoryStore::new());
        KvClient::new(connector.clone(), connector.connect())
    }

    #[test]
    fn fresh_builder_freezes_empty() {
        let kv = client();
        let tx = kv.txn();
        assert_eq!(tx.phase(), Phase::Empty);
        assert_eq!(tx.freeze(), TxnRequest::default());
    }

    #[test]
    fn freeze_preserves_order() {
        let kv = client();
        let tx = kv.txn();
        tx.when([
            Compare::value("k1", CompareOp::Greater, "v1"),
            Compare::version("k1", CompareOp::Equal, 2),
        ])
        .and_then([Op::put("k2", "v2"), Op::put("k3", "v3")])
        .or_else([Op::get("k4"), Op::delete("k5")]);

        let request = tx.freeze();
        assert_eq!(
            request.compare,
            vec![
                Compare::value("k1", CompareOp::Greater, "v1"),
                Compare::version("k1", CompareOp::Equal, 2),
            ]
        );
        assert_eq!(
            request.success,
            vec![
                Op::put("k2", "v2").into_request_op(),
                Op::put("k3", "v3").into_request_op(),
            ]
        );
        assert_eq!(
            request.failure,
            vec![
                Op::get("k4").into_request_op(),
                Op::delete("k5").into_request_op(),
            ]
        );
        assert_eq!(tx.phase(), Phase::Failure);
    }

    #[test]
    fn freeze_is_repeatable() {
        let kv = client();
        let tx = kv.txn();
        tx.when([Compare::version("k", CompareOp::Equal, 0)]);
        assert_eq!(tx.freeze(), tx.freeze());
    }

    #[test]
    #[should_panic(expected = "cannot call when twice")]
    fn when_twice_panics_even_if_empty() {
        let kv = client();
        let tx = kv.txn();
        tx.when([]).when([]);
    }

    #[test]
    #[should_panic(expected = "cannot call when after and_then")]
    fn when_after_and_then_panics() {
        let kv = client();
        let tx = kv.txn();
        tx.and_then([Op::put("k", "v")])
            .when([Compare::version("k", CompareOp::Equal, 0)]);
    }

    #[test]
    #[should_panic(expected = "cannot call when after or_else")]
    fn when_after_or_else_panics() {
        let kv = client();
        let tx = kv.txn();
        tx.or_else([]).when([]);
    }

    #[test]
    #[should_panic(expected = "cannot call and_then twice")]
    fn and_then_twice_panics() {
        let kv = client();
        let tx = kv.txn();
        tx.and_then([Op::put("k", "v")]).and_then([]);
    }

    #[test]
    #[should_panic(expected = "cannot call and_then after or_else")]
    fn and_then_after_or_else_panics_even_if_empty() {
        let kv = client();
        let tx = kv.txn();
        tx.or_else([Op::put("k", "v")]).and_then([]);
    }

    #[test]
    #[should_panic(expected = "cannot call or_else twice")]
    fn or_else_twice_panics() {
        let kv = client();
        let tx = kv.txn();
        tx.or_else([]).or_else([]);
    }

    #[test]
    fn misuse_leaves_builder_usable() {
        let kv = client();
        let tx = kv.txn();
        tx.when([Compare::version("k", CompareOp::Equal, 0)]);
        let caught = catch_unwind(AssertUnwindSafe(|| {
            tx.when([Compare::version("other", CompareOp::Equal, 0)]);
        }));
        assert!(caught.is_err());

        // the rejected comparison was not appended, and the lock is not poisoned
        tx.and_then([Op::put("k", "v")]);
        let request = tx.freeze();
        assert_eq!(request.compare.len(), 1);
        assert_eq!(request.success.len(), 1);
    }

    #[test]
    fn concurrent_declares_admit_exactly_one() {
        let kv = client();
        for _ in 0..32 {
            let tx = kv.txn();
            let successes = thread::scope(|s| {
                let handles: Vec<_> = (0..4)
                    .map(|i| {
                        let tx = &tx;
                        s.spawn(move || {
                            tx.when([Compare::version(
                                format!("k{i}"),
                                CompareOp::Equal,
                                0,
                            )]);
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join())
                    .filter(Result::is_ok)
                    .count()
            });
            assert_eq!(successes, 1);
            assert_eq!(tx.freeze().compare.len(), 1);
        }
    }

    #[quickcheck]
    fn frozen_lists_concatenate_appended_items(
        compare: Vec<Compare>,
        success: Vec<Op>,
        failure: Vec<Op>,
    ) {
        let kv = client();
        let tx = kv.txn();
        tx.when(compare.clone())
            .and_then(success.clone())
            .or_else(failure.clone());

        let request = tx.freeze();
        assert_eq!(request.compare, compare);
        assert_eq!(
            request.success,
            success
                .into_iter()
                .map(Op::into_request_op)
                .collect::<Vec<_>>()
        );
        assert_eq!(
            request.failure,
            failure
                .into_iter()
                .map(Op::into_request_op)
                .collect::<Vec<_>>()
        );
    }
}
