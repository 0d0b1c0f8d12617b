//! Trace minimization.
//!
//! The shrinker searches for a smaller trace that still fails the same way as
//! the original. Passes apply a fixed sequence of rules, in this order:
//!
//! 1. delete whole spans, parents before children;
//! 2. replace a recursion span by one of the recursion spans below it;
//! 3. move each recorded choice towards its simplest value, innermost spans
//!    first: the simplest value is tried directly, then a binary search
//!    between it and the current value.
//!
//! A candidate is kept only if replaying it fails with the same
//! [`FailureKind`] and the trace it replays to has a strictly smaller
//! [`ShrinkKey`](crate::trace::ShrinkKey). Since the key cannot decrease
//! forever, passes run until one makes no change. Every replay counts against
//! the attempt budget, and structurally identical candidates are only ever
//! replayed once, so the number of replays is a stable function of the
//! original trace.

use std::collections::HashSet;

use crate::engine::FailureKind;
use crate::error::GenerationError;
use crate::persistence::trace_digest;
use crate::trace::{Path, Span, SpanKind, TraceElement};

pub const DEFAULT_MAX_SHRINK_ATTEMPTS: usize = 10_000;

/// What replaying one candidate trace produced.
#[derive(Debug)]
pub enum Verdict<V> {
    /// The property failed; `trace` is the trace the replay recorded.
    Falsified {
        kind: FailureKind,
        trace: Span,
        payload: V,
    },
    Passed,
    /// The candidate could not be turned into a value.
    Invalid(GenerationError),
}

/// How the shrinker treated one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Accepted,
    Rejected,
    /// Structurally identical to a candidate tried before.
    Duplicate,
    /// The attempt budget is used up.
    Exhausted,
    /// The generator failed for a reason other than the candidate not fitting
    /// it.
    Aborted(GenerationError),
}

enum Stop {
    Exhausted,
    Aborted(GenerationError),
}

/// Final state of a minimization.
#[derive(Debug)]
pub struct ShrinkResult<V> {
    pub trace: Span,
    pub payload: V,
    /// Candidates replayed.
    pub calls: usize,
    /// Candidates accepted.
    pub changes: usize,
    /// Why minimization stopped before reaching a local minimum: the call
    /// budget ran out or the generator failed.
    pub interrupted: Option<String>,
}

pub struct Shrinker<V, F>
where
    F: FnMut(&Span) -> Verdict<V>,
{
    current: Span,
    payload: V,
    kind: FailureKind,
    test: F,
    seen: HashSet<[u8; 32]>,
    max_calls: usize,
    calls: usize,
    changes: usize,
    silent: bool,
}

impl<V, F> Shrinker<V, F>
where
    F: FnMut(&Span) -> Verdict<V>,
{
    /// `initial` must be a trace that fails with `kind`; `payload` is what the
    /// test produced for it.
    pub fn new(initial: Span, payload: V, kind: FailureKind, test: F) -> Self {
        let mut seen = HashSet::new();
        if let Ok(digest) = trace_digest(&initial) {
            seen.insert(digest);
        }
        Shrinker {
            current: initial,
            payload,
            kind,
            test,
            seen,
            max_calls: DEFAULT_MAX_SHRINK_ATTEMPTS,
            calls: 0,
            changes: 0,
            silent: false,
        }
    }

    pub fn with_max_calls(mut self, max_calls: usize) -> Self {
        self.max_calls = max_calls;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn current(&self) -> &Span {
        &self.current
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn shrink(mut self) -> ShrinkResult<V> {
        let interrupted = loop {
            match self.run_shrink_pass() {
                Ok(true) => continue,
                Ok(false) => break None,
                Err(Stop::Exhausted) => {
                    break Some(format!("gave up after {} shrink attempts", self.calls))
                }
                Err(Stop::Aborted(err)) => break Some(format!("generator failed while shrinking: {}", err)),
            }
        };
        if !self.silent {
            log::debug!(
                "shrinking finished after {} calls, {} changes, {} choices left",
                self.calls,
                self.changes,
                self.current.choice_count()
            );
        }
        ShrinkResult {
            trace: self.current,
            payload: self.payload,
            calls: self.calls,
            changes: self.changes,
            interrupted,
        }
    }

    /// Replays `candidate` and keeps it if it is a strict improvement.
    pub fn consider(&mut self, candidate: Span) -> CandidateOutcome {
        let digest = match trace_digest(&candidate) {
            Ok(digest) => digest,
            Err(_) => return CandidateOutcome::Rejected,
        };
        if self.seen.contains(&digest) {
            return CandidateOutcome::Duplicate;
        }
        if self.calls >= self.max_calls {
            return CandidateOutcome::Exhausted;
        }
        self.seen.insert(digest);
        self.calls += 1;

        match (self.test)(&candidate) {
            Verdict::Falsified { kind, trace, payload }
                if kind == self.kind && trace.shrink_key() < self.current.shrink_key() =>
            {
                if let Ok(digest) = trace_digest(&trace) {
                    self.seen.insert(digest);
                }
                if !self.silent {
                    log::debug!(
                        "shrink accepted: {:?} -> {:?}",
                        self.current.shrink_key(),
                        trace.shrink_key()
                    );
                }
                self.current = trace;
                self.payload = payload;
                self.changes += 1;
                CandidateOutcome::Accepted
            }
            Verdict::Falsified { .. } | Verdict::Passed => CandidateOutcome::Rejected,
            Verdict::Invalid(err) if err.is_replay() => CandidateOutcome::Rejected,
            Verdict::Invalid(err) => CandidateOutcome::Aborted(err),
        }
    }

    fn accept(&mut self, candidate: Option<Span>) -> Result<bool, Stop> {
        let candidate = match candidate {
            Some(candidate) => candidate,
            None => return Ok(false),
        };
        match self.consider(candidate) {
            CandidateOutcome::Accepted => Ok(true),
            CandidateOutcome::Rejected | CandidateOutcome::Duplicate => Ok(false),
            CandidateOutcome::Exhausted => Err(Stop::Exhausted),
            CandidateOutcome::Aborted(err) => Err(Stop::Aborted(err)),
        }
    }

    fn run_shrink_pass(&mut self) -> Result<bool, Stop> {
        let mut improved = self.delete_spans()?;
        improved |= self.hoist_recursions()?;
        improved |= self.minimize_individual_choices()?;
        Ok(improved)
    }

    fn delete_spans(&mut self) -> Result<bool, Stop> {
        let mut improved = false;
        let mut index = 0;
        while let Some(path) = self.current.span_paths().get(index).cloned() {
            let candidate = self.current.without(&path);
            if self.accept(candidate)? {
                // The next span in pre-order now sits at `index`.
                improved = true;
            } else {
                index += 1;
            }
        }
        Ok(improved)
    }

    fn hoist_recursions(&mut self) -> Result<bool, Stop> {
        let mut improved = false;
        let mut index = 0;
        loop {
            let paths = self.current.span_paths();
            let outer = match paths.get(index) {
                Some(path) => path,
                None => return Ok(improved),
            };
            if self.is_recursion(outer) && self.hoist_into(outer, &paths)? {
                improved = true;
            } else {
                index += 1;
            }
        }
    }

    /// Tries each recursion span below `outer` in its place.
    fn hoist_into(&mut self, outer: &[usize], paths: &[Path]) -> Result<bool, Stop> {
        let inner_paths = paths
            .iter()
            .filter(|path| path.len() > outer.len() && path.starts_with(outer));
        for inner in inner_paths {
            let replacement = match self.current.span_at(inner) {
                Some(span) if span.kind == SpanKind::Recursion => span.clone(),
                _ => continue,
            };
            let candidate = self.current.replaced(outer, TraceElement::Span(replacement));
            if self.accept(candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_recursion(&self, path: &[usize]) -> bool {
        self.current
            .span_at(path)
            .map_or(false, |span| span.kind == SpanKind::Recursion)
    }

    fn minimize_individual_choices(&mut self) -> Result<bool, Stop> {
        let mut improved = false;
        let mut index = 0;
        while let Some(path) = self.current.choice_paths_bottom_up().get(index).cloned() {
            improved |= self.minimize_choice_at(&path)?;
            index += 1;
        }
        Ok(improved)
    }

    fn minimize_choice_at(&mut self, path: &[usize]) -> Result<bool, Stop> {
        let choice = match self.current.choice_at(path) {
            Some(choice) => choice,
            None => return Ok(false),
        };
        let simplest = choice.descriptor.simplest();
        if choice.value == simplest {
            return Ok(false);
        }
        if self.accept(self.current.with_value(path, simplest))? {
            return Ok(true);
        }

        // `low` is known not to work, `high` is the current value.
        let mut low = i128::from(simplest);
        let mut high = i128::from(choice.value);
        let mut improved = false;
        while (high - low).abs() > 1 {
            let mid = low + (high - low) / 2;
            let still_here = self
                .current
                .choice_at(path)
                .map_or(false, |c| c.descriptor == choice.descriptor && i128::from(c.value) == high);
            if !still_here {
                break;
            }
            if self.accept(self.current.with_value(path, mid as i64))? {
                high = mid;
                improved = true;
            } else {
                low = mid;
            }
        }
        Ok(improved)
    }
}
