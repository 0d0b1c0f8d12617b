//! # conjecture-check
//!
//! Property-based testing with deterministic replay and structural shrinking.
//!
//! Generators draw every random decision through a [`DataSource`], which
//! records the decisions as a nested trace. A failing trace can be replayed
//! without any randomness, serialized into a printable string and minimized
//! by deleting and simplifying parts of it.
//!
//! ```rust
//! use conjecture_check::generator::non_empty_lists_of;
//! use conjecture_check::ints::integers;
//! use conjecture_check::PropertyChecker;
//!
//! let failure = PropertyChecker::silently()
//!     .with_seed(7)
//!     .for_all(&non_empty_lists_of(&integers(0, 100)), |list| !list.contains(&42))
//!     .unwrap_err()
//!     .into_failure()
//!     .unwrap();
//! assert_eq!(failure.minimal_counter_example.example_value, vec![42]);
//! ```

pub mod data;
pub mod distributions;
pub mod engine;
pub mod error;
pub mod generator;
pub mod ints;
pub mod persistence;
pub mod scenario;
pub mod shrinking;
pub mod strings;
pub mod trace;
mod unwind;

// Re-export core types for easy access
pub use data::{DataSource, Session};
pub use distributions::{Descriptor, IntDistribution, Repeat};
pub use engine::{CounterExample, FailureKind, Parameters, PropertyChecker, PropertyFailure, Recheck};
pub use error::{CheckError, DecodeError, GenerationError, GeneratorFailure, ReplayError, ReplayFailure};
pub use generator::{
    any_of, booleans, constant, frequency, lists_of, lists_of_size, non_empty_lists_of, recursive, sampled_from,
    Frequency, Generator,
};
pub use persistence::SerializedExample;
pub use scenario::{scenarios, Environment, ImperativeCommand, Scenario};
pub use shrinking::{CandidateOutcome, ShrinkResult, Shrinker, Verdict};
pub use trace::{Choice, Span, SpanKind, TraceElement};
pub use unwind::PanicCause;
