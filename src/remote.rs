// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Seams to the remote store and to the component that keeps a connection to it.
//!
//! The crate does not open sockets. It talks to the store through a [`KvRpc`] stub derived from
//! a [`Channel`], and when a channel breaks it asks a [`ConnectionManager`] for a replacement.
//! [`memory`](crate::memory) provides in-process implementations of all three.
//!
//! Errors coming back from a stub fall in two groups, and the split decides what the commit loop
//! does with them:
//!
//! - [`RpcError::Transport`]: the request may not have reached the store. The loop reconnects and
//!   tries again.
//! - [`RpcError::Status`]: the store answered with an error. The answer is final and is returned
//!   to the caller as-is.

use crate::{
    context::{Context, ContextError},
    proto::{
        DeleteRangeRequest, DeleteRangeResponse, PutRequest, PutResponse, RangeRequest,
        RangeResponse, TxnRequest, TxnResponse,
    },
};
use std::{fmt, sync::Arc};

/// What went wrong on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The connection could not be used at all.
    Unavailable,
    ConnectionReset,
    DeadlineExceeded,
    Cancelled,
    Io,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unavailable => "unavailable",
            Self::ConnectionReset => "connection reset",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::Cancelled => "cancelled",
            Self::Io => "i/o error",
        })
    }
}

/// A failure to send a request or to receive its response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport error ({kind}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ContextError> for TransportError {
    fn from(err: ContextError) -> Self {
        let kind = match err {
            ContextError::Cancelled => TransportErrorKind::Cancelled,
            ContextError::DeadlineExceeded => TransportErrorKind::DeadlineExceeded,
        };
        Self::new(kind, err.to_string())
    }
}

/// Status codes the store may answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum Code {
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    OutOfRange,
    PermissionDenied,
    ResourceExhausted,
    Internal,
}

/// An error reported by the store itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }
}

/// The error type returned by [`KvRpc`] calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("remote error: {0}")]
    Status(#[from] Status),
}

impl RpcError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// The connection manager could not produce a usable channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot reconnect: {reason}")]
pub struct ConnectionError {
    pub reason: String,
    /// The transport error that triggered the reconnect.
    #[source]
    pub cause: Option<TransportError>,
}

impl ConnectionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            cause: None,
        }
    }

    pub fn caused_by(mut self, cause: &RpcError) -> Self {
        if let RpcError::Transport(err) = cause {
            self.cause = Some(err.clone());
        }
        self
    }
}

/// The KV service of the store.
///
/// Implementations must honour `ctx`: once [`Context::err`] reports something, a call should
/// return a [`TransportError`] of kind [`Cancelled`](TransportErrorKind::Cancelled) or
/// [`DeadlineExceeded`](TransportErrorKind::DeadlineExceeded).
pub trait KvRpc: Send + Sync {
    fn range(&self, ctx: &Context, request: &RangeRequest) -> Result<RangeResponse, RpcError>;

    fn put(&self, ctx: &Context, request: &PutRequest) -> Result<PutResponse, RpcError>;

    fn delete_range(
        &self,
        ctx: &Context,
        request: &DeleteRangeRequest,
    ) -> Result<DeleteRangeResponse, RpcError>;

    /// Evaluates the comparisons and runs exactly one branch, atomically.
    fn txn(&self, ctx: &Context, request: &TxnRequest) -> Result<TxnResponse, RpcError>;
}

impl<T: KvRpc + ?Sized> KvRpc for Arc<T> {
    fn range(&self, ctx: &Context, request: &RangeRequest) -> Result<RangeResponse, RpcError> {
        (**self).range(ctx, request)
    }

    fn put(&self, ctx: &Context, request: &PutRequest) -> Result<PutResponse, RpcError> {
        (**self).put(ctx, request)
    }

    fn delete_range(
        &self,
        ctx: &Context,
        request: &DeleteRangeRequest,
    ) -> Result<DeleteRangeResponse, RpcError> {
        (**self).delete_range(ctx, request)
    }

    fn txn(&self, ctx: &Context, request: &TxnRequest) -> Result<TxnResponse, RpcError> {
        (**self).txn(ctx, request)
    }
}

/// An established connection to the store.
pub trait Channel: Send + Sync {
    type Stub: KvRpc;

    /// Derives a fresh KV stub that sends its calls over this channel.
    fn kv_stub(&self) -> Self::Stub;
}

/// Produces a healthy channel given a broken one.
///
/// This is where reconnect policy lives: the commit loop calls
/// [`retry_connection`](Self::retry_connection) once per transport failure and adds no delay or
/// attempt cap of its own. Implementations may block, back off, and retry internally, and give
/// up by returning a [`ConnectionError`].
pub trait ConnectionManager: Send + Sync {
    type Channel: Channel;

    fn retry_connection(
        &self,
        current: &Self::Channel,
        cause: &RpcError,
    ) -> Result<Self::Channel, ConnectionError>;
}
