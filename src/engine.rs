//! PropertyChecker - the property checking driver
//!
//! Runs a generator and a property over a sequence of seeded iterations. The
//! first falsifying value is minimized with the [`Shrinker`] and reported as a
//! [`PropertyFailure`] carrying both the first and the minimal
//! [`CounterExample`].
//!
//! ```rust
//! use conjecture_check::engine::PropertyChecker;
//! use conjecture_check::ints::any_integer;
//!
//! let failure = PropertyChecker::silently()
//!     .with_seed(1)
//!     .for_all(&any_integer(), |i| i % 12 != 0)
//!     .unwrap_err()
//!     .into_failure()
//!     .unwrap();
//! assert_eq!(failure.minimal_counter_example.example_value, 0);
//! ```

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::data::Session;
use crate::error::{CheckError, GenerationError, GeneratorFailure, ReplayFailure};
use crate::generator::Generator;
use crate::persistence::SerializedExample;
use crate::scenario::{scenarios, ImperativeCommand, Scenario};
use crate::shrinking::{Shrinker, Verdict, DEFAULT_MAX_SHRINK_ATTEMPTS};
use crate::trace::Span;
use crate::unwind::{self, PanicCause};

pub const DEFAULT_ITERATION_COUNT: usize = 100;
pub const DEFAULT_MAX_SIZE_HINT: usize = 100;

/// Default size hint growth: linear from 1 up to [`DEFAULT_MAX_SIZE_HINT`]
/// over the run.
pub fn linear_size_hint(iteration: usize, iteration_count: usize) -> usize {
    iteration.saturating_mul(DEFAULT_MAX_SIZE_HINT) / iteration_count.max(1)
}

/// A single evaluation to run instead of the search loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recheck {
    /// Regenerate from an iteration seed at a given size hint.
    Seed { seed: u64, size_hint: usize },
    /// Replay a [`CounterExample::serialized_data`] string.
    Serialized(String),
}

/// Configuration for one check
#[derive(Debug, Clone)]
pub struct Parameters {
    /// Seed all iteration seeds derive from
    pub global_seed: u64,

    /// Number of iterations of the search loop
    pub iteration_count: usize,

    /// Size hint of iteration `i` of `n`, before clamping to
    /// `1..=max_size_hint`
    pub size_hint_fn: fn(usize, usize) -> usize,

    pub max_size_hint: usize,

    /// Replays a shrink may spend
    pub max_shrink_attempts: usize,

    /// Suppress log output; never changes the outcome
    pub silent: bool,

    pub recheck: Option<Recheck>,

    /// Observed between iterations only
    pub cancellation: Option<Arc<AtomicBool>>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            global_seed: rand::random(),
            iteration_count: DEFAULT_ITERATION_COUNT,
            size_hint_fn: linear_size_hint,
            max_size_hint: DEFAULT_MAX_SIZE_HINT,
            max_shrink_attempts: DEFAULT_MAX_SHRINK_ATTEMPTS,
            silent: false,
            recheck: None,
            cancellation: None,
        }
    }
}

impl Parameters {
    fn size_hint(&self, iteration: usize) -> usize {
        (self.size_hint_fn)(iteration, self.iteration_count).clamp(1, self.max_size_hint.max(1))
    }
}

/// How a falsifying run failed; shrinking only keeps candidates that fail
/// the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureKind {
    PredicateFalse,
    /// The property panicked at `location`.
    Panic { location: Option<String> },
}

impl FailureKind {
    pub fn of(cause: Option<&PanicCause>) -> Self {
        match cause {
            None => FailureKind::PredicateFalse,
            Some(cause) => FailureKind::Panic {
                location: cause.location.clone(),
            },
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::PredicateFalse => f.write_str("property returned false"),
            FailureKind::Panic { location: Some(location) } => write!(f, "panic at {}", location),
            FailureKind::Panic { location: None } => f.write_str("panic at unknown location"),
        }
    }
}

/// Result of running a generator and a property once.
enum Outcome<T> {
    Passed(T),
    Falsified { value: T, cause: Option<PanicCause> },
    Invalid(GenerationError),
}

fn evaluate<T: 'static>(
    generator: &Generator<T>,
    property: &dyn Fn(&T) -> bool,
    session: Session,
) -> (Outcome<T>, Span) {
    let (generated, trace) = session.run(|data| {
        unwind::catch_silent(|| generator.generate_value(data))
            .unwrap_or_else(|cause| Err(GenerationError::Panicked(cause.to_string())))
    });
    let value = match generated {
        Ok(value) => value,
        Err(err) => return (Outcome::Invalid(err), trace),
    };
    let outcome = match unwind::catch_silent(|| property(&value)) {
        Ok(true) => Outcome::Passed(value),
        Ok(false) => Outcome::Falsified { value, cause: None },
        Err(cause) => Outcome::Falsified {
            value,
            cause: Some(cause),
        },
    };
    (outcome, trace)
}

/// A falsifying value together with everything needed to reproduce it.
pub struct CounterExample<T> {
    pub example_value: T,
    /// Printable form of the trace; feed it to
    /// [`PropertyChecker::rechecking`] to reproduce the failure.
    pub serialized_data: String,
    /// The panic, if the property panicked rather than returning `false`.
    pub cause: Option<PanicCause>,
    trace: Span,
    size_hint: usize,
    generator: Generator<T>,
    property: Rc<dyn Fn(&T) -> bool>,
}

impl<T: fmt::Debug> fmt::Debug for CounterExample<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterExample")
            .field("example_value", &self.example_value)
            .field("serialized_data", &self.serialized_data)
            .field("cause", &self.cause)
            .finish()
    }
}

impl<T: 'static> CounterExample<T> {
    fn new(
        example_value: T,
        cause: Option<PanicCause>,
        trace: Span,
        size_hint: usize,
        generator: &Generator<T>,
        property: &Rc<dyn Fn(&T) -> bool>,
    ) -> Self {
        let serialized_data = SerializedExample::new(size_hint, trace.clone()).to_string();
        CounterExample {
            example_value,
            serialized_data,
            cause,
            trace,
            size_hint,
            generator: generator.clone(),
            property: Rc::clone(property),
        }
    }

    pub fn trace(&self) -> &Span {
        &self.trace
    }

    pub fn size_hint(&self) -> usize {
        self.size_hint
    }

    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::of(self.cause.as_ref())
    }

    /// Rebuilds this counterexample from [`serialized_data`](Self::serialized_data)
    /// alone, without any randomness.
    pub fn replay(&self) -> Result<CounterExample<T>, ReplayFailure> {
        let example: SerializedExample = self.serialized_data.parse()?;
        let (outcome, trace) = evaluate(
            &self.generator,
            self.property.as_ref(),
            Session::replay(example.trace, example.size_hint),
        );
        match outcome {
            Outcome::Falsified { value, cause } => Ok(CounterExample::new(
                value,
                cause,
                trace,
                example.size_hint,
                &self.generator,
                &self.property,
            )),
            Outcome::Passed(_) => Err(ReplayFailure::NotFalsified),
            Outcome::Invalid(err) => Err(ReplayFailure::Generation(err)),
        }
    }
}

/// Report of a falsified property.
#[derive(Debug)]
pub struct PropertyFailure<T> {
    pub first_counter_example: CounterExample<T>,
    pub minimal_counter_example: CounterExample<T>,
    /// 1-based; always 1 for rechecks.
    pub iteration_number: usize,
    pub iteration_seed: u64,
    pub size_hint: usize,
    pub global_seed: u64,
    /// Set only when the minimal counterexample does not fail the way the
    /// first counterexample did.
    pub stopping_reason: Option<String>,
    /// Set when minimization ran out of shrink attempts or the generator
    /// failed while shrinking. The minimal counterexample still fails the
    /// original way, it is just not a local minimum.
    pub minimization_interrupted: Option<String>,
    pub total_minimization_example_count: usize,
}

impl<T: fmt::Debug> fmt::Display for PropertyFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minimal = &self.minimal_counter_example;
        writeln!(
            f,
            "property falsified on iteration {} (iteration seed {:#x}, size hint {}, global seed {:#x})",
            self.iteration_number, self.iteration_seed, self.size_hint, self.global_seed
        )?;
        writeln!(f, "minimal counterexample: {:?}", minimal.example_value)?;
        if let Some(cause) = &minimal.cause {
            writeln!(f, "  caused by: {}", cause)?;
        }
        writeln!(
            f,
            "first counterexample: {:?}",
            self.first_counter_example.example_value
        )?;
        writeln!(
            f,
            "minimization replayed {} examples",
            self.total_minimization_example_count
        )?;
        if let Some(reason) = &self.stopping_reason {
            writeln!(f, "minimization stopped: {}", reason)?;
        }
        if let Some(reason) = &self.minimization_interrupted {
            writeln!(f, "minimization interrupted: {}", reason)?;
        }
        write!(f, "recheck with: {}", minimal.serialized_data)
    }
}

/// Builder and entry point for property checks.
#[derive(Debug, Clone, Default)]
pub struct PropertyChecker {
    parameters: Parameters,
}

impl PropertyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A checker that logs nothing.
    pub fn silently() -> Self {
        Self::new().silent()
    }

    pub fn with_parameters(parameters: Parameters) -> Self {
        PropertyChecker { parameters }
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.parameters.global_seed = seed;
        self
    }

    pub fn with_iteration_count(mut self, iteration_count: usize) -> Self {
        self.parameters.iteration_count = iteration_count;
        self
    }

    pub fn with_max_size_hint(mut self, max_size_hint: usize) -> Self {
        self.parameters.max_size_hint = max_size_hint;
        self
    }

    pub fn with_size_hint_fn(mut self, size_hint_fn: fn(usize, usize) -> usize) -> Self {
        self.parameters.size_hint_fn = size_hint_fn;
        self
    }

    pub fn with_max_shrink_attempts(mut self, max_shrink_attempts: usize) -> Self {
        self.parameters.max_shrink_attempts = max_shrink_attempts;
        self
    }

    pub fn with_cancellation(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.parameters.cancellation = Some(cancelled);
        self
    }

    pub fn silent(mut self) -> Self {
        self.parameters.silent = true;
        self
    }

    /// Evaluates exactly one serialized counterexample instead of searching.
    pub fn rechecking(mut self, serialized_data: impl Into<String>) -> Self {
        self.parameters.recheck = Some(Recheck::Serialized(serialized_data.into()));
        self
    }

    /// Evaluates exactly one iteration, regenerated from its seed.
    pub fn rechecking_seed(mut self, seed: u64, size_hint: usize) -> Self {
        self.parameters.recheck = Some(Recheck::Seed { seed, size_hint });
        self
    }

    /// Checks that `property` holds for values of `generator`.
    pub fn for_all<T, P>(&self, generator: &Generator<T>, property: P) -> Result<(), CheckError<T>>
    where
        T: fmt::Debug + 'static,
        P: Fn(&T) -> bool + 'static,
    {
        let run = Run {
            parameters: &self.parameters,
            generator,
            property: Rc::new(property),
        };
        let result = run.execute();
        if !self.parameters.silent {
            match &result {
                Ok(()) => log::info!(
                    "property held for {} iterations (global seed {:#x})",
                    self.parameters.iteration_count,
                    self.parameters.global_seed
                ),
                Err(err) => log::warn!("{}", err),
            }
        }
        result
    }

    /// Like [`for_all`](Self::for_all), panicking with the report on
    /// failure.
    pub fn assert_for_all<T, P>(&self, generator: &Generator<T>, property: P)
    where
        T: fmt::Debug + 'static,
        P: Fn(&T) -> bool + 'static,
    {
        if let Err(err) = self.for_all(generator, property) {
            panic!("{}", err);
        }
    }

    /// Checks that no command of the scenarios built by `factory` fails.
    pub fn check_scenarios<F, C>(&self, factory: F) -> Result<(), CheckError<Scenario>>
    where
        F: Fn() -> C + 'static,
        C: ImperativeCommand + 'static,
    {
        self.for_all(&scenarios(factory), Scenario::ensure_successful)
    }
}

struct Run<'a, T> {
    parameters: &'a Parameters,
    generator: &'a Generator<T>,
    property: Rc<dyn Fn(&T) -> bool>,
}

impl<T: fmt::Debug + 'static> Run<'_, T> {
    fn execute(&self) -> Result<(), CheckError<T>> {
        match &self.parameters.recheck {
            Some(Recheck::Seed { seed, size_hint }) => {
                self.iteration(1, *seed, *size_hint, Session::random(*seed, *size_hint))
            }
            Some(Recheck::Serialized(data)) => {
                let example: SerializedExample = data.parse()?;
                let size_hint = example.size_hint;
                self.iteration(1, 0, size_hint, Session::replay(example.trace, size_hint))
            }
            None => self.search(),
        }
    }

    fn search(&self) -> Result<(), CheckError<T>> {
        let mut seeds = ChaCha8Rng::seed_from_u64(self.parameters.global_seed);
        for iteration in 1..=self.parameters.iteration_count {
            if let Some(cancelled) = &self.parameters.cancellation {
                if cancelled.load(Ordering::SeqCst) {
                    return Err(CheckError::Cancelled { iteration });
                }
            }
            let iteration_seed = seeds.next_u64();
            let size_hint = self.parameters.size_hint(iteration);
            self.iteration(
                iteration,
                iteration_seed,
                size_hint,
                Session::random(iteration_seed, size_hint),
            )?;
        }
        Ok(())
    }

    fn iteration(
        &self,
        iteration: usize,
        iteration_seed: u64,
        size_hint: usize,
        session: Session,
    ) -> Result<(), CheckError<T>> {
        let silent = self.parameters.silent;
        let (outcome, trace) = evaluate(self.generator, self.property.as_ref(), session);
        match outcome {
            Outcome::Passed(_) => {
                if !silent {
                    log::debug!("iteration {} passed (size hint {})", iteration, size_hint);
                }
                Ok(())
            }
            Outcome::Invalid(source) => Err(self.generator_failure(iteration, iteration_seed, size_hint, source)),
            Outcome::Falsified { value, cause } => {
                if !silent {
                    log::info!(
                        "iteration {} falsified the property with {:?}, minimizing",
                        iteration,
                        value
                    );
                }
                let first = CounterExample::new(value, cause, trace, size_hint, self.generator, &self.property);
                let failure = self.minimize(first, iteration, iteration_seed)?;
                Err(CheckError::Falsified(Box::new(failure)))
            }
        }
    }

    fn verdict(&self, candidate: &Span, size_hint: usize) -> Verdict<(T, Option<PanicCause>)> {
        let session = Session::replay(candidate.clone(), size_hint);
        match evaluate(self.generator, self.property.as_ref(), session) {
            (Outcome::Falsified { value, cause }, trace) => Verdict::Falsified {
                kind: FailureKind::of(cause.as_ref()),
                trace,
                payload: (value, cause),
            },
            (Outcome::Passed(_), _) => Verdict::Passed,
            (Outcome::Invalid(err), _) => Verdict::Invalid(err),
        }
    }

    fn minimize(
        &self,
        first: CounterExample<T>,
        iteration: usize,
        iteration_seed: u64,
    ) -> Result<PropertyFailure<T>, CheckError<T>> {
        let size_hint = first.size_hint;
        let kind = first.failure_kind();
        let mut replays = 1;
        let initial = match evaluate(
            self.generator,
            self.property.as_ref(),
            Session::replay(first.trace.clone(), size_hint),
        ) {
            (Outcome::Falsified { value, cause }, _) => (value, cause),
            (Outcome::Passed(value), trace) => {
                let minimal = CounterExample::new(value, None, trace, size_hint, self.generator, &self.property);
                let reason = "first counterexample passed when replayed; the property is not deterministic";
                if !self.parameters.silent {
                    log::warn!("minimization skipped: {}", reason);
                }
                return Ok(PropertyFailure {
                    first_counter_example: first,
                    minimal_counter_example: minimal,
                    iteration_number: iteration,
                    iteration_seed,
                    size_hint,
                    global_seed: self.parameters.global_seed,
                    stopping_reason: Some(reason.to_string()),
                    minimization_interrupted: None,
                    total_minimization_example_count: replays,
                });
            }
            (Outcome::Invalid(source), _) => {
                return Err(self.generator_failure(iteration, iteration_seed, size_hint, source))
            }
        };

        let result = Shrinker::new(first.trace.clone(), initial, kind.clone(), |candidate: &Span| {
            self.verdict(candidate, size_hint)
        })
        .with_max_calls(self.parameters.max_shrink_attempts)
        .silent(self.parameters.silent)
        .shrink();
        replays += result.calls + 1;

        let (value, cause) = result.payload;
        let minimal = CounterExample::new(value, cause, result.trace, size_hint, self.generator, &self.property);
        let stopping_reason = self.confirm(&minimal, &kind);
        if !self.parameters.silent {
            if let Some(reason) = &stopping_reason {
                log::warn!("minimization stopped: {}", reason);
            }
            if let Some(reason) = &result.interrupted {
                log::info!("minimization interrupted: {}", reason);
            }
        }

        Ok(PropertyFailure {
            first_counter_example: first,
            minimal_counter_example: minimal,
            iteration_number: iteration,
            iteration_seed,
            size_hint,
            global_seed: self.parameters.global_seed,
            stopping_reason,
            minimization_interrupted: result.interrupted,
            total_minimization_example_count: replays,
        })
    }

    /// Replays the minimal trace once more and describes any difference from
    /// the way the first counterexample failed.
    fn confirm(&self, minimal: &CounterExample<T>, expected: &FailureKind) -> Option<String> {
        match self.verdict(&minimal.trace, minimal.size_hint) {
            Verdict::Falsified { kind, .. } if kind == *expected => None,
            Verdict::Falsified { kind, .. } => Some(format!(
                "minimal example fails with {} but the first counterexample failed with {}",
                kind, expected
            )),
            Verdict::Passed => Some("minimal example passed when replayed".to_string()),
            Verdict::Invalid(err) => Some(format!("minimal example cannot be replayed: {}", err)),
        }
    }

    fn generator_failure(
        &self,
        iteration: usize,
        iteration_seed: u64,
        size_hint: usize,
        source: GenerationError,
    ) -> CheckError<T> {
        GeneratorFailure {
            iteration,
            iteration_seed,
            size_hint,
            global_seed: self.parameters.global_seed,
            source,
        }
        .into()
    }
}
