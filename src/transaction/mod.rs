// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Conditional transactions.
//!
//! A transaction evaluates a set of comparisons against the store and, atomically, runs one of
//! two batches of operations depending on whether all of them held:
//!
//! ```
//! use kvtxn::{
//!     client::KvClient,
//!     compare::{Compare, CompareOp},
//!     memory::{MemoryConnector, MemoryStore},
//!     op::Op,
//!     proto::ResponseOp,
//! };
//!
//! let connector = MemoryConnector::new(MemoryStore::new());
//! let kv = KvClient::new(connector.clone(), connector.connect());
//! kv.put("k1", "v1")?;
//!
//! let tx = kv.txn();
//! tx.when([Compare::value("k1", CompareOp::Equal, "v1")])
//!     .and_then([Op::put("k2", "v2")])
//!     .or_else([Op::put("k4", "v4")]);
//!
//! let response = tx.commit()?;
//! assert!(response.succeeded);
//! assert!(matches!(response.responses.as_slice(), [ResponseOp::Put(_)]));
//! # Ok::<(), kvtxn::Error>(())
//! ```
//!
//! # Building
//!
//! A [`Txn`] moves through the [`Phase`]s `Empty -> Conditions -> Success -> Failure`. Each
//! configuration method enters one phase and may only be called while the builder is in an
//! earlier one:
//!
//! | Method       | Enters       | Panics if called after  |
//! |--------------|--------------|-------------------------|
//! | `when`       | `Conditions` | `when`, `and_then`, `or_else` |
//! | `and_then`   | `Success`    | `and_then`, `or_else`   |
//! | `or_else`    | `Failure`    | `or_else`               |
//!
//! Breaking the order is a bug in the calling code, so it panics with a [`Misuse`] message rather
//! than returning an error. The check and the append happen under one lock, so concurrent calls
//! on a shared builder cannot both enter the same phase.
//!
//! # Committing
//!
//! [`Txn::commit`] consumes the builder, freezes it into a [`TxnRequest`](crate::proto::TxnRequest)
//! and sends it. When the connection fails in transport, the client asks its
//! [`ConnectionManager`](crate::remote::ConnectionManager) for a new connection and sends the
//! same request again, for as long as the manager keeps producing connections. Errors reported by
//! the store, and contexts that are cancelled or past their deadline, end the loop immediately.
//!
//! A builder cannot be committed twice. To try again after an error, build a new transaction:
//! the previous attempt may have taken effect.

mod commit;
mod phase;
mod txn;

pub use phase::{Misuse, Phase};
pub use txn::Txn;
