//! Error taxonomy for generation, replay and checking.
//!
//! Three families, propagated differently:
//! - [`GenerationError`]: producing a value failed. Aborts the current
//!   iteration and is never minimized.
//! - Property falsification: carried by [`CheckError::Falsified`] once a value
//!   was produced and the property returned `false` or panicked. Only these
//!   are minimized.
//! - [`GenerationError::WrongDataStructure`]: a generator used a
//!   [`DataSource`](crate::data::DataSource) outside of its open scope.

use std::fmt::Debug;

use crate::distributions::Descriptor;
use crate::engine::PropertyFailure;
use crate::trace::SpanKind;

/// Why a recorded trace could not be replayed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("replay data exhausted")]
    Exhausted,

    #[error("expected {expected} but the trace recorded {found}")]
    Mismatch { expected: String, found: String },

    #[error("recorded value {value} is not valid for {descriptor}")]
    InvalidValue { value: i64, descriptor: Descriptor },
}

impl ReplayError {
    pub(crate) fn expected_span(kind: SpanKind, found: impl Into<String>) -> Self {
        ReplayError::Mismatch {
            expected: format!("{} span", kind),
            found: found.into(),
        }
    }

    pub(crate) fn expected_choice(descriptor: &Descriptor, found: impl Into<String>) -> Self {
        ReplayError::Mismatch {
            expected: format!("choice from {}", descriptor),
            found: found.into(),
        }
    }
}

/// Failure while producing a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("cannot satisfy condition after {attempts} attempts")]
    CannotSatisfyCondition { attempts: usize },

    #[error("data source used outside of its generation scope")]
    WrongDataStructure,

    #[error("cannot restore value: {0}")]
    Replay(#[from] ReplayError),

    #[error("{0}")]
    Custom(String),

    #[error("generator panicked: {0}")]
    Panicked(String),
}

impl GenerationError {
    pub fn custom(message: impl Into<String>) -> Self {
        GenerationError::Custom(message.into())
    }

    /// Replay failures only mean a shrink candidate does not fit the
    /// generator; everything else is a broken generator.
    pub fn is_replay(&self) -> bool {
        matches!(self, GenerationError::Replay(_))
    }
}

/// Errors from decoding a serialized counterexample.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("not a hex string: {0}")]
    Hex(String),

    #[error("unsupported format version {0}")]
    Version(u8),

    #[error("checksum mismatch")]
    Checksum,

    #[error("truncated data")]
    Truncated,

    #[error("unknown {what} tag {tag}")]
    UnknownTag { what: &'static str, tag: u8 },

    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    #[error("serialized trace must start with a span")]
    NotASpan,

    #[error("spans nested deeper than {0} levels")]
    TooDeep(usize),
}

impl From<std::io::Error> for DecodeError {
    fn from(_: std::io::Error) -> Self {
        DecodeError::Truncated
    }
}

/// Why [`CounterExample::replay`](crate::engine::CounterExample::replay) did
/// not reproduce a counterexample.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayFailure {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("replayed value no longer falsifies the property")]
    NotFalsified,
}

/// Context of a generation failure inside a check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("generator failed on iteration {iteration} (seed {iteration_seed:#x}, size hint {size_hint}, global seed {global_seed:#x}): {source}")]
pub struct GeneratorFailure {
    pub iteration: usize,
    pub iteration_seed: u64,
    pub size_hint: usize,
    pub global_seed: u64,
    #[source]
    pub source: GenerationError,
}

/// Outcome of a property check that did not pass.
#[derive(Debug, thiserror::Error)]
pub enum CheckError<T: Debug> {
    #[error("{0}")]
    Falsified(Box<PropertyFailure<T>>),

    #[error(transparent)]
    Generator(#[from] GeneratorFailure),

    #[error("cannot recheck serialized example: {0}")]
    InvalidRecheck(#[from] DecodeError),

    #[error("check cancelled before iteration {iteration}")]
    Cancelled { iteration: usize },
}

impl<T: Debug> CheckError<T> {
    pub fn failure(&self) -> Option<&PropertyFailure<T>> {
        match self {
            CheckError::Falsified(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn into_failure(self) -> Option<PropertyFailure<T>> {
        match self {
            CheckError::Falsified(failure) => Some(*failure),
            _ => None,
        }
    }

    pub fn generation_error(&self) -> Option<&GenerationError> {
        match self {
            CheckError::Generator(failure) => Some(&failure.source),
            _ => None,
        }
    }
}
