// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Errors returned by [`KvClient`](crate::client::KvClient) and
//! [`Txn::commit`](crate::transaction::Txn::commit).
//!
//! Transport failures never show up here unless the connection manager gave up on them: the
//! commit loop absorbs them. Mistakes in building a transaction never show up here either; they
//! panic where they are made (see [`Misuse`](crate::transaction::Misuse)).

use crate::{
    context::ContextError,
    remote::{ConnectionError, Status},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The connection manager could not replace a broken connection.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// The store answered with an error. Never retried.
    #[error("remote error: {0}")]
    Remote(#[from] Status),
    /// The context was cancelled or expired before the request could be answered.
    #[error(transparent)]
    Context(#[from] ContextError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
