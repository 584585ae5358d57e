// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The wire model exchanged with the remote store.
//!
//! These types mirror the request and response messages of an etcd-style KV service. They are
//! plain data: the [transaction builder](crate::transaction::Txn) produces a [`TxnRequest`], a
//! [`KvRpc`](crate::remote::KvRpc) stub carries it to the store, and the store answers with a
//! [`TxnResponse`].
//!
//! With the `serde` feature enabled, every type here (de)serializes in the shape used by the
//! etcd JSON gateway: byte strings are base64 encoded and zero-valued fields are omitted.

use crate::compare::Compare;

/// A stored key, as observed by the store at some revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct KeyValue {
    #[cfg_attr(
        feature = "serde",
        serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty")
    )]
    pub key: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub create_revision: i64,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub mod_revision: i64,
    /// Number of modifications since creation; zero for a key that does not exist.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub version: i64,
    #[cfg_attr(
        feature = "serde",
        serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty")
    )]
    pub value: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub lease: i64,
}

/// Metadata attached to every response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResponseHeader {
    /// The store revision once the request was applied.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub revision: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RangeRequest {
    #[cfg_attr(
        feature = "serde",
        serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty")
    )]
    pub key: Vec<u8>,
    /// Exclusive upper bound. Empty means "just `key`", `[0]` means "every key >= `key`".
    #[cfg_attr(
        feature = "serde",
        serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty")
    )]
    pub range_end: Vec<u8>,
    /// Maximum number of keys returned; zero means no limit.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub limit: i64,
    /// Point-in-time revision to read at; zero means the latest.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub revision: i64,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub keys_only: bool,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub count_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RangeResponse {
    pub header: ResponseHeader,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Vec::is_empty"))]
    pub kvs: Vec<KeyValue>,
    /// Whether more keys matched than `limit` allowed to return.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub more: bool,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PutRequest {
    #[cfg_attr(
        feature = "serde",
        serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty")
    )]
    pub key: Vec<u8>,
    #[cfg_attr(
        feature = "serde",
        serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty")
    )]
    pub value: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub lease: i64,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub prev_kv: bool,
    /// Keep the current value and only update the lease. The key must exist.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub ignore_value: bool,
    /// Keep the current lease and only update the value. The key must exist.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub ignore_lease: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PutResponse {
    pub header: ResponseHeader,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub prev_kv: Option<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeleteRangeRequest {
    #[cfg_attr(
        feature = "serde",
        serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty")
    )]
    pub key: Vec<u8>,
    #[cfg_attr(
        feature = "serde",
        serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty")
    )]
    pub range_end: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub prev_kv: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeleteRangeResponse {
    pub header: ResponseHeader,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub deleted: i64,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Vec::is_empty"))]
    pub prev_kvs: Vec<KeyValue>,
}

/// One operation of a transaction branch, in the form the store executes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum RequestOp {
    #[cfg_attr(feature = "serde", serde(rename = "request_range"))]
    Range(RangeRequest),
    #[cfg_attr(feature = "serde", serde(rename = "request_put"))]
    Put(PutRequest),
    #[cfg_attr(feature = "serde", serde(rename = "request_delete_range"))]
    DeleteRange(DeleteRangeRequest),
    #[cfg_attr(feature = "serde", serde(rename = "request_txn"))]
    Txn(TxnRequest),
}

/// The result of one [`RequestOp`], at the same position in the executed branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum ResponseOp {
    #[cfg_attr(feature = "serde", serde(rename = "response_range"))]
    Range(RangeResponse),
    #[cfg_attr(feature = "serde", serde(rename = "response_put"))]
    Put(PutResponse),
    #[cfg_attr(feature = "serde", serde(rename = "response_delete_range"))]
    DeleteRange(DeleteRangeResponse),
    #[cfg_attr(feature = "serde", serde(rename = "response_txn"))]
    Txn(TxnResponse),
}

impl ResponseOp {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Range(_) => "Range",
            Self::Put(_) => "Put",
            Self::DeleteRange(_) => "DeleteRange",
            Self::Txn(_) => "Txn",
        }
    }
}

/// A frozen conditional transaction.
///
/// If every comparison in `compare` holds, the store executes `success`, otherwise `failure`.
/// Built by [`Txn::freeze`](crate::transaction::Txn::freeze) and sent verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[must_use = "a frozen transaction does nothing until it is sent to a store"]
pub struct TxnRequest {
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Vec::is_empty"))]
    pub compare: Vec<Compare>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Vec::is_empty"))]
    pub success: Vec<RequestOp>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Vec::is_empty"))]
    pub failure: Vec<RequestOp>,
}

/// The outcome of a [`TxnRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TxnResponse {
    pub header: ResponseHeader,
    /// `true` if every comparison held and the success branch ran.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_default"))]
    pub succeeded: bool,
    /// One response per operation of the executed branch, in the order they were appended.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Vec::is_empty"))]
    pub responses: Vec<ResponseOp>,
}

#[cfg(feature = "serde")]
fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Serializes byte strings as standard base64, the way the JSON gateway expects them.
#[cfg(feature = "serde")]
pub(crate) mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}
