// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Comparisons: the `when` part of a conditional transaction.
//!
//! A [`Compare`] tests one observed property of a stored key against a caller-supplied value:
//!
//! ```
//! use kvtxn::compare::{Compare, CompareOp};
//!
//! // the value of "k1" is greater than "v1"
//! let cmp = Compare::value("k1", CompareOp::Greater, "v1");
//! // "k1" has been modified exactly twice since it was created
//! let cmp = Compare::version("k1", CompareOp::Equal, 2);
//! // "k1" does not exist
//! let cmp = Compare::create_revision("k1", CompareOp::Equal, 0);
//! ```
//!
//! All comparisons of a transaction must hold for its success branch to run.

use crate::proto::KeyValue;
use std::{cmp::Ordering, fmt};

/// The property of a key that a [`Compare`] observes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum Target {
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "VALUE"))]
    Value,
    #[cfg_attr(feature = "serde", serde(rename = "VERSION"))]
    Version,
    #[cfg_attr(feature = "serde", serde(rename = "CREATE"))]
    CreateRevision,
    #[cfg_attr(feature = "serde", serde(rename = "MOD"))]
    ModRevision,
}

/// How the observed property relates to the expected value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum CompareOp {
    #[default]
    Equal,
    Greater,
    Less,
    NotEqual,
}

impl CompareOp {
    /// Whether `observed.cmp(expected) == ordering` satisfies this operator.
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => ordering == Ordering::Equal,
            Self::Greater => ordering == Ordering::Greater,
            Self::Less => ordering == Ordering::Less,
            Self::NotEqual => ordering != Ordering::Equal,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equal => "==",
            Self::Greater => ">",
            Self::Less => "<",
            Self::NotEqual => "!=",
        })
    }
}

/// The value a [`Compare`] expects.
///
/// [`Target::Value`] compares against bytes, every other target against an integer. A
/// comparison whose target and expected value disagree is rejected by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TargetValue {
    Value(#[cfg_attr(feature = "serde", serde(with = "crate::proto::base64_bytes"))] Vec<u8>),
    Version(i64),
    CreateRevision(i64),
    ModRevision(i64),
}

impl TargetValue {
    /// The [`Target`] this value is meant for.
    pub fn target(&self) -> Target {
        match self {
            Self::Value(_) => Target::Value,
            Self::Version(_) => Target::Version,
            Self::CreateRevision(_) => Target::CreateRevision,
            Self::ModRevision(_) => Target::ModRevision,
        }
    }

    /// The expected value that a zero-valued field stands for, when a decoder omits it.
    #[cfg(feature = "serde")]
    fn zero(target: Target) -> Self {
        match target {
            Target::Value => Self::Value(Vec::new()),
            Target::Version => Self::Version(0),
            Target::CreateRevision => Self::CreateRevision(0),
            Target::ModRevision => Self::ModRevision(0),
        }
    }
}

impl From<Vec<u8>> for TargetValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Value(value)
    }
}

impl From<&[u8]> for TargetValue {
    fn from(value: &[u8]) -> Self {
        Self::Value(value.to_vec())
    }
}

impl From<&str> for TargetValue {
    fn from(value: &str) -> Self {
        Self::Value(value.as_bytes().to_vec())
    }
}

impl From<String> for TargetValue {
    fn from(value: String) -> Self {
        Self::Value(value.into_bytes())
    }
}

/// A predicate over one stored key (or a range of keys).
///
/// Immutable once built. See the [module documentation](self) for examples.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(from = "wire::WireCompare"))]
pub struct Compare {
    pub result: CompareOp,
    pub target: Target,
    #[cfg_attr(feature = "serde", serde(with = "crate::proto::base64_bytes"))]
    pub key: Vec<u8>,
    /// If non-empty, every key in `[key, range_end)` must satisfy the comparison.
    #[cfg_attr(
        feature = "serde",
        serde(
            default,
            with = "crate::proto::base64_bytes",
            skip_serializing_if = "Vec::is_empty"
        )
    )]
    pub range_end: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub target_value: TargetValue,
}

impl Compare {
    /// Compares the observed `target` of `key` against `expected` using `op`.
    ///
    /// Integer values given for [`Target::Value`] (and vice versa) are kept as they are; the store
    /// reports the mismatch when the transaction is committed.
    pub fn new(
        key: impl Into<Vec<u8>>,
        target: Target,
        op: CompareOp,
        expected: impl Into<TargetValue>,
    ) -> Self {
        Self {
            result: op,
            target,
            key: key.into(),
            range_end: Vec::new(),
            target_value: expected.into(),
        }
    }

    /// `value(key) <op> expected`
    pub fn value(key: impl Into<Vec<u8>>, op: CompareOp, expected: impl Into<Vec<u8>>) -> Self {
        Self::new(key, Target::Value, op, TargetValue::Value(expected.into()))
    }

    /// `version(key) <op> expected`
    pub fn version(key: impl Into<Vec<u8>>, op: CompareOp, expected: i64) -> Self {
        Self::new(key, Target::Version, op, TargetValue::Version(expected))
    }

    /// `create_revision(key) <op> expected`
    pub fn create_revision(key: impl Into<Vec<u8>>, op: CompareOp, expected: i64) -> Self {
        Self::new(key, Target::CreateRevision, op, TargetValue::CreateRevision(expected))
    }

    /// `mod_revision(key) <op> expected`
    pub fn mod_revision(key: impl Into<Vec<u8>>, op: CompareOp, expected: i64) -> Self {
        Self::new(key, Target::ModRevision, op, TargetValue::ModRevision(expected))
    }

    /// Applies the comparison to every key in `[key, range_end)` instead of `key` alone.
    pub fn with_range(mut self, range_end: impl Into<Vec<u8>>) -> Self {
        self.range_end = range_end.into();
        self
    }

    /// Applies the comparison to every key that starts with `key`.
    pub fn with_prefix(mut self) -> Self {
        self.range_end = crate::op::prefix_range_end(&self.key);
        self
    }
}

/// Why a comparison could not be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("comparison target {target:?} does not match the expected value's kind {value:?}")]
pub struct TargetMismatch {
    pub target: Target,
    pub value: Target,
}

/// Evaluates `cmp` against one observed key, `None` meaning the key does not exist.
///
/// A missing key observes zero for its version and revisions, and never satisfies a
/// [`Target::Value`] comparison.
pub fn evaluate(cmp: &Compare, observed: Option<&KeyValue>) -> Result<bool, TargetMismatch> {
    let ordering = match (cmp.target, &cmp.target_value) {
        (Target::Value, TargetValue::Value(expected)) => match observed {
            Some(kv) => kv.value.as_slice().cmp(expected.as_slice()),
            None => return Ok(false),
        },
        (Target::Version, TargetValue::Version(expected)) => {
            observed.map_or(0, |kv| kv.version).cmp(expected)
        }
        (Target::CreateRevision, TargetValue::CreateRevision(expected)) => {
            observed.map_or(0, |kv| kv.create_revision).cmp(expected)
        }
        (Target::ModRevision, TargetValue::ModRevision(expected)) => {
            observed.map_or(0, |kv| kv.mod_revision).cmp(expected)
        }
        (target, value) => {
            return Err(TargetMismatch {
                target,
                value: value.target(),
            });
        }
    };
    Ok(cmp.result.holds(ordering))
}

/// Decoding of [`Compare`], which fills in the fields a JSON gateway leaves out when they hold
/// their zero value.
#[cfg(feature = "serde")]
mod wire {
    use super::{Compare, CompareOp, Target, TargetValue};
    use crate::proto::base64_bytes;
    use serde::{Deserialize, Deserializer};

    #[derive(Default, Deserialize)]
    #[serde(default)]
    pub(super) struct WireCompare {
        result: CompareOp,
        target: Target,
        #[serde(with = "base64_bytes")]
        key: Vec<u8>,
        #[serde(with = "base64_bytes")]
        range_end: Vec<u8>,
        #[serde(deserialize_with = "some_bytes")]
        value: Option<Vec<u8>>,
        version: Option<i64>,
        create_revision: Option<i64>,
        mod_revision: Option<i64>,
    }

    fn some_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        base64_bytes::deserialize(deserializer).map(Some)
    }

    impl From<WireCompare> for Compare {
        fn from(wire: WireCompare) -> Self {
            let mut given: Vec<TargetValue> = [
                wire.value.map(TargetValue::Value),
                wire.version.map(TargetValue::Version),
                wire.create_revision.map(TargetValue::CreateRevision),
                wire.mod_revision.map(TargetValue::ModRevision),
            ]
            .into_iter()
            .flatten()
            .collect();

            // prefer the value meant for the target; an explicit mismatch is kept for the store
            let target_value = match given.iter().position(|v| v.target() == wire.target) {
                Some(i) => given.swap_remove(i),
                None if !given.is_empty() => given.swap_remove(0),
                None => TargetValue::zero(wire.target),
            };
            Self {
                result: wire.result,
                target: wire.target,
                key: wire.key,
                range_end: wire.range_end,
                target_value,
            }
        }
    }
}

#[cfg(any(test, feature = "arbitrary"))]
mod arbitrary {
    use super::*;
    use quickcheck::{Arbitrary, Gen};

    impl Arbitrary for CompareOp {
        fn arbitrary(g: &mut Gen) -> Self {
            *g.choose(&[Self::Equal, Self::Greater, Self::Less, Self::NotEqual])
                .expect("non-empty")
        }
    }

    impl Arbitrary for TargetValue {
        fn arbitrary(g: &mut Gen) -> Self {
            match u8::arbitrary(g) % 4 {
                0 => Self::Value(Vec::arbitrary(g)),
                1 => Self::Version(i64::arbitrary(g)),
                2 => Self::CreateRevision(i64::arbitrary(g)),
                _ => Self::ModRevision(i64::arbitrary(g)),
            }
        }
    }

    impl Arbitrary for Compare {
        fn arbitrary(g: &mut Gen) -> Self {
            // keep target and value in agreement; mismatches are exercised explicitly
            let target_value = TargetValue::arbitrary(g);
            let target = target_value.target();
            Self::new(
                Vec::<u8>::arbitrary(g),
                target,
                CompareOp::arbitrary(g),
                target_value,
            )
        }
    }
}
