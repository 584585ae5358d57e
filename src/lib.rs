// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # kvtxn: Conditional Multi-Key Transactions for Replicated Key-Value Stores
//!
//! This crate builds and commits **conditional transactions** against an etcd-style key-value
//! store. A transaction reads like an `if`/`then`/`else`:
//!
//! - **when** a list of [comparisons](compare::Compare) over the stored keys all hold,
//! - **and then** run one list of [operations](op::Op),
//! - **or else** run another.
//!
//! The store evaluates the comparisons and runs exactly one branch atomically. The client does
//! not evaluate anything itself: it assembles the request, ships it, and keeps shipping it until
//! a response comes back.
//!
//! ## Building a Transaction
//!
//! A [`Txn`] is obtained from a [`KvClient`] and configured with at most one call each to
//! [`when`](Txn::when), [`and_then`](Txn::and_then) and [`or_else`](Txn::or_else), in that
//! order. Calls may be skipped, but never repeated or reordered: doing so panics, because the
//! transaction would not say what its author meant.
//!
//! ```
//! use kvtxn::{
//!     KvClient,
//!     compare::{Compare, CompareOp},
//!     memory::{MemoryConnector, MemoryStore},
//!     op::Op,
//! };
//!
//! let connector = MemoryConnector::new(MemoryStore::new());
//! let kv = KvClient::new(connector.clone(), connector.connect());
//! kv.put("k1", "v2")?;
//!
//! let tx = kv.txn();
//! tx.when([Compare::value("k1", CompareOp::Greater, "v1")])
//!     .and_then([Op::put("k2", "v2"), Op::put("k3", "v3")])
//!     .or_else([Op::put("k4", "v4")]);
//!
//! let response = tx.commit()?;
//! assert!(response.succeeded);
//! # Ok::<(), kvtxn::Error>(())
//! ```
//!
//! ## Committing
//!
//! [`Txn::commit`] freezes the builder into a [`TxnRequest`](proto::TxnRequest) and sends it.
//! Transport failures are not reported to the caller. Instead the client's
//! [`ConnectionManager`](remote::ConnectionManager) is asked for a new connection, which replaces
//! the broken one for every request sharing the client, and the request is sent again. The loop
//! ends when:
//!
//! - the store answers, whichever branch ran;
//! - the store answers with an error ([`Error::Remote`]), which is never retried;
//! - the connection manager gives up ([`Error::Connection`]);
//! - the request's [`Context`](context::Context) expires or is cancelled ([`Error::Context`]).
//!
//! Retries resend the same request. A transaction whose first attempt was applied but whose
//! response was lost runs again, so transactions that must apply at most once should compare
//! against something their own success branch changes.
//!
//! ## Bringing Your Own Store
//!
//! The crate opens no sockets. A store is reached through the traits in [`remote`]:
//! a [`Channel`](remote::Channel) yields [`KvRpc`](remote::KvRpc) stubs, and a
//! [`ConnectionManager`](remote::ConnectionManager) repairs channels. The [`memory`] module
//! implements all three on top of an in-process store, which is what the examples and tests
//! run against.
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events: a `txn_commit` span around every commit, warnings for
//! transport failures, and errors when the connection manager gives up.
//!
//! ## License
//!
//! This project is licensed under either of Apache License, Version 2.0 or MIT license, at your
//! option.
//!
//! ## Features
//!
//! - `json`: Encodes and decodes transaction requests and responses as JSON, in the shape of an
//!   etcd JSON gateway. This feature is enabled by default.
//! - `serde`: Provides `serde` support for the wire model and the client configuration.
//! - `arbitrary`: Implements `quickcheck::Arbitrary` for comparisons and operations, useful for
//!   property-based testing.
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

pub mod client;
pub use client::{ClientConfig, KvClient};
pub mod compare;
pub mod context;
pub mod error;
pub use error::{Error, Result};
#[cfg(feature = "json")]
pub mod json;
pub mod memory;
pub mod op;
pub mod proto;
pub mod remote;
pub mod transaction;
pub use transaction::{Misuse, Phase, Txn};
