// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Operations: the units of work inside a transaction branch.
//!
//! An [`Op`] is built by the caller and handed to the transaction builder, which only ever calls
//! [`Op::into_request_op`] on it.
//!
//! ```
//! use kvtxn::op::Op;
//!
//! let put = Op::put("k2", "v2").with_prev_kv();
//! let scan = Op::get("users/").with_prefix().with_limit(10);
//! let wipe = Op::delete("tmp/").with_prefix();
//! ```

use crate::proto::{DeleteRangeRequest, PutRequest, RangeRequest, RequestOp, TxnRequest};

/// The smallest key greater than every key starting with `prefix`.
///
/// A prefix of only `0xff` bytes (or an empty prefix) has no such key; the store reads the
/// returned `[0]` as "through the end of the key space".
pub fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

/// A single operation of a transaction branch, or a standalone request via
/// [`KvClient::do_op`](crate::client::KvClient::do_op).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    Get(RangeRequest),
    Put(PutRequest),
    Delete(DeleteRangeRequest),
    Txn(TxnRequest),
}

impl Op {
    /// Reads `key`; use the range options to read more than one key.
    pub fn get(key: impl Into<Vec<u8>>) -> Self {
        Self::Get(RangeRequest {
            key: key.into(),
            ..Default::default()
        })
    }

    /// Writes `value` under `key`.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put(PutRequest {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        })
    }

    /// Deletes `key`; use the range options to delete more than one key.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self::Delete(DeleteRangeRequest {
            key: key.into(),
            ..Default::default()
        })
    }

    /// Runs a nested transaction inside the enclosing branch.
    pub fn txn(request: TxnRequest) -> Self {
        Self::Txn(request)
    }

    /// Produces the wire-level representation of this operation.
    pub fn into_request_op(self) -> RequestOp {
        match self {
            Self::Get(r) => RequestOp::Range(r),
            Self::Put(r) => RequestOp::Put(r),
            Self::Delete(r) => RequestOp::DeleteRange(r),
            Self::Txn(r) => RequestOp::Txn(r),
        }
    }

    pub fn is_get(&self) -> bool {
        matches!(self, Self::Get(_))
    }

    pub fn is_put(&self) -> bool {
        matches!(self, Self::Put(_))
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete(_))
    }

    pub fn is_txn(&self) -> bool {
        matches!(self, Self::Txn(_))
    }

    /// The key this operation starts at, if it has one.
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            Self::Get(r) => Some(&r.key),
            Self::Put(r) => Some(&r.key),
            Self::Delete(r) => Some(&r.key),
            Self::Txn(_) => None,
        }
    }

    /// Covers `[key, range_end)`. Only meaningful for gets and deletes.
    pub fn with_range_end(mut self, range_end: impl Into<Vec<u8>>) -> Self {
        match &mut self {
            Self::Get(r) => r.range_end = range_end.into(),
            Self::Delete(r) => r.range_end = range_end.into(),
            Self::Put(_) | Self::Txn(_) => {}
        }
        self
    }

    /// Covers every key starting with the operation's key.
    pub fn with_prefix(self) -> Self {
        match self.key().map(prefix_range_end) {
            Some(end) => self.with_range_end(end),
            None => self,
        }
    }

    /// Covers every key greater than or equal to the operation's key.
    pub fn with_from_key(self) -> Self {
        self.with_range_end(vec![0])
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        if let Self::Get(r) = &mut self {
            r.limit = limit;
        }
        self
    }

    /// Reads at a past revision instead of the latest one.
    pub fn with_revision(mut self, revision: i64) -> Self {
        if let Self::Get(r) = &mut self {
            r.revision = revision;
        }
        self
    }

    pub fn with_keys_only(mut self) -> Self {
        if let Self::Get(r) = &mut self {
            r.keys_only = true;
        }
        self
    }

    pub fn with_count_only(mut self) -> Self {
        if let Self::Get(r) = &mut self {
            r.count_only = true;
        }
        self
    }

    /// Attaches the put key to a lease.
    pub fn with_lease(mut self, lease: i64) -> Self {
        if let Self::Put(r) = &mut self {
            r.lease = lease;
        }
        self
    }

    /// Returns the key-value pairs as they were before a put or delete.
    pub fn with_prev_kv(mut self) -> Self {
        match &mut self {
            Self::Put(r) => r.prev_kv = true,
            Self::Delete(r) => r.prev_kv = true,
            Self::Get(_) | Self::Txn(_) => {}
        }
        self
    }

    pub fn with_ignore_value(mut self) -> Self {
        if let Self::Put(r) = &mut self {
            r.ignore_value = true;
        }
        self
    }

    pub fn with_ignore_lease(mut self) -> Self {
        if let Self::Put(r) = &mut self {
            r.ignore_lease = true;
        }
        self
    }
}

#[cfg(any(test, feature = "arbitrary"))]
mod arbitrary {
    use super::*;
    use quickcheck::{Arbitrary, Gen};

    impl Arbitrary for Op {
        fn arbitrary(g: &mut Gen) -> Self {
            let key = Vec::<u8>::arbitrary(g);
            match u8::arbitrary(g) % 3 {
                0 => Self::get(key).with_limit(i64::from(u8::arbitrary(g))),
                1 => Self::put(key, Vec::<u8>::arbitrary(g)),
                _ => Self::delete(key),
            }
        }
    }
}
