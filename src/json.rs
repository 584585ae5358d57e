// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! JSON representation
//!
//! Transactions are encoded the way an etcd JSON gateway expects them: keys and values are
//! standard base64 strings, enum values are spelled in upper case, and fields holding their
//! zero value are omitted. Decoding accepts omitted fields and fills in their zero value.
//!
//! # Examples
//!
//! ## A transaction request
//!
//! "If the value of `k1` is greater than `v1`, put `v2` at `k2`":
//!
//! ```json
//! {
//!   "compare": [
//!     { "result": "GREATER", "target": "VALUE", "key": "azE=", "value": "djE=" }
//!   ],
//!   "success": [
//!     { "request_put": { "key": "azI=", "value": "djI=" } }
//!   ]
//! }
//! ```
//!
//! ## Its response
//!
//! ```json
//! {
//!   "header": { "revision": 2 },
//!   "succeeded": true,
//!   "responses": [
//!     { "response_put": { "header": { "revision": 2 } } }
//!   ]
//! }
//! ```
use crate::proto::{TxnRequest, TxnResponse};

impl TxnRequest {
    /// Encodes the request as compact JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes a request from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl TxnResponse {
    /// Encodes the response as compact JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes a response from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
