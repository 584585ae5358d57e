// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Deadlines and cancellation for remote calls.
//!
//! Every RPC attempt runs under a [`Context`]. Stubs are expected to give up with a
//! transport error once [`Context::err`] reports something, and the commit loop checks the
//! context before each attempt so that an expired context never reaches the connection manager.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// Why a [`Context`] is no longer usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellable, optionally deadline-bearing execution context.
///
/// Cloning a context shares its cancellation flag, so cancelling through one [`CancelHandle`]
/// affects every clone.
///
/// # Example
///
/// ```
/// use kvtxn::context::{Context, ContextError};
/// use std::time::Duration;
///
/// let (ctx, cancel) = Context::background()
///     .with_timeout(Duration::from_secs(5))
///     .with_cancel();
/// assert_eq!(ctx.err(), None);
///
/// cancel.cancel();
/// assert_eq!(ctx.err(), Some(ContextError::Cancelled));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancelled: Option<Arc<AtomicBool>>,
}

/// Cancels the [`Context`] it was created with, and all of its clones.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl Context {
    /// A context that never expires and cannot be cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Sets the deadline to `timeout` from now, keeping an earlier deadline if one is set.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets the deadline, keeping an earlier deadline if one is set.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Makes the context cancellable, returning the handle that cancels it.
    ///
    /// Calling this on an already-cancellable context reuses the existing flag.
    pub fn with_cancel(mut self) -> (Self, CancelHandle) {
        let flag = self
            .cancelled
            .get_or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone();
        (self, CancelHandle(flag))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, or `None` if there is no deadline.
    ///
    /// Returns [`Duration::ZERO`] once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Reports why the context can no longer be used, if it can't.
    ///
    /// Cancellation takes precedence over an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self
            .cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
        {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }
}
