// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use std::fmt;

/// How far a [`Txn`](super::Txn) has been configured.
///
/// Phases only move forward, and each can be entered at most once:
/// `Empty -> Conditions -> Success -> Failure`. Any of the later phases may be skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    #[default]
    Empty,
    /// `when` has been called.
    Conditions,
    /// `and_then` has been called.
    Success,
    /// `or_else` has been called.
    Failure,
}

impl Phase {
    /// The builder method that enters this phase.
    fn method(self) -> &'static str {
        match self {
            Self::Empty => "new",
            Self::Conditions => "when",
            Self::Success => "and_then",
            Self::Failure => "or_else",
        }
    }

    /// Moves to `next` if it comes strictly after the current phase.
    ///
    /// On failure the phase is left untouched.
    pub(crate) fn advance(&mut self, next: Phase) -> Result<(), Misuse> {
        if *self < next {
            *self = next;
            return Ok(());
        }
        Err(if *self == next {
            Misuse::Twice {
                call: next.method(),
            }
        } else {
            Misuse::OutOfOrder {
                call: next.method(),
                after: self.method(),
            }
        })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// A transaction builder was used out of protocol.
///
/// This is a programming error, not a runtime condition: it is raised as a panic carrying this
/// error's message, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Misuse {
    #[error("cannot call {call} twice")]
    Twice { call: &'static str },
    #[error("cannot call {call} after {after}")]
    OutOfOrder {
        call: &'static str,
        after: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_progression() {
        let mut phase = Phase::Empty;
        phase.advance(Phase::Conditions).unwrap();
        phase.advance(Phase::Success).unwrap();
        phase.advance(Phase::Failure).unwrap();
        assert_eq!(phase, Phase::Failure);
    }

    #[test]
    fn phases_can_be_skipped() {
        let mut phase = Phase::Empty;
        phase.advance(Phase::Failure).unwrap();
        assert_eq!(phase, Phase::Failure);
    }

    #[test]
    fn no_phase_twice() {
        for p in [Phase::Conditions, Phase::Success, Phase::Failure] {
            let mut phase = p;
            let err = phase.advance(p).unwrap_err();
            assert_eq!(err.to_string(), format!("cannot call {p} twice"));
            assert_eq!(phase, p);
        }
    }

    #[test]
    fn no_going_back() {
        let mut phase = Phase::Failure;
        assert_eq!(
            phase.advance(Phase::Success).unwrap_err().to_string(),
            "cannot call and_then after or_else"
        );
        let mut phase = Phase::Success;
        assert_eq!(
            phase.advance(Phase::Conditions).unwrap_err().to_string(),
            "cannot call when after and_then"
        );
        assert_eq!(phase, Phase::Success);
    }
}
