//! # Decision sessions
//!
//! A [`Session`] owns the source of every decision made while producing one
//! value and records them into a trace.
//!
//! - **Random** sessions sample fresh decisions from a `ChaCha8Rng` seeded with
//!   the iteration seed.
//! - **Replay** sessions walk a previously recorded trace and never touch a
//!   PRNG. A decision that does not fit what the generator asks for, or a
//!   trace that runs out, fails the replay deterministically with a
//!   [`ReplayError`].
//!
//! Generators never see the session itself, only [`DataSource`] handles. Each
//! handle is bound to one scope (one open span) through a generation id; the
//! ids come from a counter that only grows, so a handle stays dead once its
//! scope is closed. Using a handle whose scope is not the innermost open one
//! is rejected with [`GenerationError::WrongDataStructure`].
//!
//! ```rust
//! use conjecture_check::data::Session;
//! use conjecture_check::ints::integers;
//!
//! let generator = integers(0, 10);
//! let (value, trace) = Session::random(42, 10).generate(&generator);
//! let (replayed, _) = Session::replay(trace, 10).generate(&generator);
//! assert_eq!(value.unwrap(), replayed.unwrap());
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::distributions::IntDistribution;
use crate::error::{GenerationError, ReplayError};
use crate::generator::Generator;
use crate::trace::{Choice, Path, Span, SpanKind, TraceElement};

enum Mode {
    Random(ChaCha8Rng),
    Replay(Span),
}

struct Frame {
    id: u64,
    span: Span,
    /// Position of the span being replayed, in replay mode.
    source: Option<Path>,
    cursor: usize,
}

struct SessionState {
    mode: Mode,
    stack: Vec<Frame>,
    next_id: u64,
    size_hint: usize,
    recursion_depth: usize,
    /// Weighted-choice branches currently being generated, outermost first.
    active_branches: Vec<usize>,
    /// Branches seen to open a recursion span in this session.
    recursive_branches: HashSet<usize>,
}

impl SessionState {
    fn check_live(&self, scope: u64) -> Result<(), GenerationError> {
        match self.stack.last() {
            Some(frame) if frame.id == scope => Ok(()),
            _ => Err(GenerationError::WrongDataStructure),
        }
    }

    /// Takes the next recorded element of the innermost span, returning its
    /// path in the replayed trace.
    fn next_recorded(&mut self) -> Result<(Path, TraceElement), ReplayError> {
        let SessionState { mode, stack, .. } = self;
        let root = match mode {
            Mode::Replay(root) => root,
            Mode::Random(_) => return Err(ReplayError::Exhausted),
        };
        let frame = stack.last_mut().ok_or(ReplayError::Exhausted)?;
        let source = frame.source.as_ref().ok_or(ReplayError::Exhausted)?;
        let span = root.span_at(source).ok_or(ReplayError::Exhausted)?;
        let element = span
            .children
            .get(frame.cursor)
            .cloned()
            .ok_or(ReplayError::Exhausted)?;
        let mut path = source.clone();
        path.push(frame.cursor);
        frame.cursor += 1;
        Ok((path, element))
    }

    fn draw(&mut self, distribution: &IntDistribution) -> Result<i64, GenerationError> {
        let descriptor = distribution.descriptor();
        let sampled = match &mut self.mode {
            Mode::Random(rng) => Some(match distribution.forced() {
                Some(value) => value,
                None => distribution.sample(rng.next_u64()),
            }),
            Mode::Replay(_) => None,
        };
        let value = match sampled {
            Some(value) => value,
            None => self.replayed_value(distribution)?,
        };
        if let Some(frame) = self.stack.last_mut() {
            frame
                .span
                .children
                .push(TraceElement::Choice(Choice { value, descriptor }));
        }
        Ok(value)
    }

    fn replayed_value(&mut self, distribution: &IntDistribution) -> Result<i64, ReplayError> {
        let descriptor = distribution.descriptor();
        match self.next_recorded()? {
            (_, TraceElement::Choice(choice)) if choice.descriptor != descriptor => Err(
                ReplayError::expected_choice(&descriptor, format!("choice from {}", choice.descriptor)),
            ),
            (_, TraceElement::Choice(choice)) if !distribution.is_valid(choice.value) => {
                Err(ReplayError::InvalidValue {
                    value: choice.value,
                    descriptor,
                })
            }
            (_, TraceElement::Choice(choice)) => Ok(choice.value),
            (_, other) => Err(ReplayError::expected_choice(&descriptor, other.describe())),
        }
    }

    fn open(&mut self, kind: SpanKind) -> Result<u64, GenerationError> {
        let source = match self.mode {
            Mode::Random(_) => None,
            Mode::Replay(_) => match self.next_recorded()? {
                (path, TraceElement::Span(span)) if span.kind == kind => Some(path),
                (_, other) => return Err(ReplayError::expected_span(kind, other.describe()).into()),
            },
        };
        Ok(self.push_frame(kind, source))
    }

    fn push_frame(&mut self, kind: SpanKind, source: Option<Path>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if kind == SpanKind::Recursion {
            self.recursion_depth += 1;
            self.recursive_branches.extend(self.active_branches.iter().copied());
        }
        self.stack.push(Frame {
            id,
            span: Span::new(kind),
            source,
            cursor: 0,
        });
        id
    }

    /// Closes the span `id` and every span still open inside it, attaching
    /// each to its parent. Returns the closed span when it was the root.
    fn close(&mut self, id: u64) -> Option<Span> {
        if !self.stack.iter().any(|frame| frame.id == id) {
            return None;
        }
        loop {
            let frame = self.stack.pop()?;
            if frame.span.kind == SpanKind::Recursion {
                self.recursion_depth = self.recursion_depth.saturating_sub(1);
            }
            let done = frame.id == id;
            match self.stack.last_mut() {
                Some(parent) => parent.span.children.push(TraceElement::Span(frame.span)),
                None => return Some(frame.span),
            }
            if done {
                return None;
            }
        }
    }
}

/// Closes a span on drop, so a panicking generator still leaves a
/// well-formed trace behind.
struct SpanGuard<'a> {
    state: &'a Rc<RefCell<SessionState>>,
    id: u64,
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.close(self.id);
        }
    }
}

/// Leaves a weighted-choice branch on drop.
struct BranchGuard<'a> {
    state: &'a Rc<RefCell<SessionState>>,
}

impl Drop for BranchGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.active_branches.pop();
        }
    }
}

/// Handle through which generators make decisions, bound to one open scope.
#[derive(Clone)]
pub struct DataSource {
    state: Rc<RefCell<SessionState>>,
    scope: u64,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource").field("scope", &self.scope).finish()
    }
}

impl DataSource {
    /// Draws one decision from `distribution`.
    pub fn draw(&self, distribution: &IntDistribution) -> Result<i64, GenerationError> {
        let mut state = self.state.borrow_mut();
        state.check_live(self.scope)?;
        state.draw(distribution)
    }

    /// Uniform integer in `min..=max`.
    pub fn draw_int(&self, min: i64, max: i64) -> Result<i64, GenerationError> {
        self.draw(&IntDistribution::uniform(min, max)?)
    }

    /// `true` with probability `p`.
    pub fn draw_flag(&self, p: f64) -> Result<bool, GenerationError> {
        Ok(self.draw(&IntDistribution::flag(p))? == 1)
    }

    /// Index into `weights`, proportional to the weights.
    pub fn draw_weighted(&self, weights: Vec<f64>) -> Result<usize, GenerationError> {
        Ok(self.draw(&IntDistribution::weighted(weights)?)? as usize)
    }

    /// Runs `generator` in a nested scope.
    pub fn generate<T: 'static>(&self, generator: &Generator<T>) -> Result<T, GenerationError> {
        self.span(SpanKind::Generic, |child| generator.generate_value(child))
    }

    /// Runs `f` in a nested span of `kind`, handing it the child scope.
    pub(crate) fn span<R>(
        &self,
        kind: SpanKind,
        f: impl FnOnce(&DataSource) -> Result<R, GenerationError>,
    ) -> Result<R, GenerationError> {
        let id = {
            let mut state = self.state.borrow_mut();
            state.check_live(self.scope)?;
            state.open(kind)?
        };
        let _guard = SpanGuard {
            state: &self.state,
            id,
        };
        let child = DataSource {
            state: Rc::clone(&self.state),
            scope: id,
        };
        f(&child)
    }

    /// Runs `f` as weighted-choice branch `branch`. A recursion span opened
    /// anywhere inside marks the branch as recursive for the rest of the
    /// session.
    pub(crate) fn in_branch<R>(&self, branch: usize, f: impl FnOnce() -> R) -> R {
        self.state.borrow_mut().active_branches.push(branch);
        let _guard = BranchGuard { state: &self.state };
        f()
    }

    pub(crate) fn is_recursive_branch(&self, branch: usize) -> bool {
        self.state.borrow().recursive_branches.contains(&branch)
    }

    pub fn size_hint(&self) -> usize {
        self.state.borrow().size_hint
    }

    pub fn recursion_depth(&self) -> usize {
        self.state.borrow().recursion_depth
    }

    /// Size budget for collections at the current depth: the size hint,
    /// halved for every enclosing recursion.
    pub fn suggested_size(&self) -> usize {
        let state = self.state.borrow();
        state
            .size_hint
            .checked_shr(state.recursion_depth as u32)
            .unwrap_or(0)
    }

    pub fn is_replaying(&self) -> bool {
        matches!(self.state.borrow().mode, Mode::Replay(_))
    }
}

/// One value production, random or replayed.
pub struct Session {
    state: Rc<RefCell<SessionState>>,
}

impl Session {
    pub fn random(seed: u64, size_hint: usize) -> Self {
        Self::with_mode(Mode::Random(ChaCha8Rng::seed_from_u64(seed)), size_hint)
    }

    pub fn replay(trace: Span, size_hint: usize) -> Self {
        Self::with_mode(Mode::Replay(trace), size_hint)
    }

    fn with_mode(mode: Mode, size_hint: usize) -> Self {
        Session {
            state: Rc::new(RefCell::new(SessionState {
                mode,
                stack: Vec::new(),
                next_id: 0,
                size_hint,
                recursion_depth: 0,
                active_branches: Vec::new(),
                recursive_branches: HashSet::new(),
            })),
        }
    }

    /// Produces one value inside a root span and returns it with the
    /// recorded trace. The trace is returned even when generation failed.
    pub fn generate<T: 'static>(self, generator: &Generator<T>) -> (Result<T, GenerationError>, Span) {
        self.run(|data| generator.generate_value(data))
    }

    /// Like [`generate`](Self::generate) for an arbitrary body, the entry
    /// point the driver uses to keep property evaluation inside the session.
    pub fn run<R>(
        self,
        body: impl FnOnce(&DataSource) -> Result<R, GenerationError>,
    ) -> (Result<R, GenerationError>, Span) {
        let opened = {
            let mut state = self.state.borrow_mut();
            let root_kind = match &state.mode {
                Mode::Random(_) => None,
                Mode::Replay(root) => Some(root.kind),
            };
            match root_kind {
                None => Ok(state.push_frame(SpanKind::Generic, None)),
                Some(SpanKind::Generic) => Ok(state.push_frame(SpanKind::Generic, Some(Vec::new()))),
                Some(kind) => Err(ReplayError::expected_span(SpanKind::Generic, format!("{} span", kind))),
            }
        };
        let id = match opened {
            Ok(id) => id,
            Err(err) => return (Err(err.into()), Span::new(SpanKind::Generic)),
        };

        let root = DataSource {
            state: Rc::clone(&self.state),
            scope: id,
        };
        let result = body(&root);
        let trace = self
            .state
            .borrow_mut()
            .close(id)
            .unwrap_or_else(|| Span::new(SpanKind::Generic));
        (result, trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Descriptor;
    use crate::generator::{constant, Generator};

    fn pair() -> Generator<(i64, i64)> {
        Generator::from(|data| {
            let a = data.draw_int(0, 1000)?;
            let b = data.generate(&Generator::from(|inner| inner.draw_int(-5, 5)))?;
            Ok((a, b))
        })
    }

    #[test]
    fn test_same_seed_same_value_and_trace() {
        let (a, trace_a) = Session::random(7, 10).generate(&pair());
        let (b, trace_b) = Session::random(7, 10).generate(&pair());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(trace_a, trace_b);
    }

    #[test]
    fn test_trace_nesting_mirrors_generation() {
        let (_, trace) = Session::random(3, 10).generate(&pair());
        assert_eq!(trace.kind, SpanKind::Generic);
        assert_eq!(trace.children.len(), 2);
        assert!(matches!(trace.children[0], TraceElement::Choice(_)));
        match &trace.children[1] {
            TraceElement::Span(span) => {
                assert_eq!(span.kind, SpanKind::Generic);
                assert_eq!(span.choice_count(), 1);
            }
            other => panic!("expected span, got {:?}", other),
        }
    }

    #[test]
    fn test_replay_reproduces_value() {
        let (value, trace) = Session::random(11, 10).generate(&pair());
        let (replayed, replay_trace) = Session::replay(trace.clone(), 10).generate(&pair());
        assert_eq!(value.unwrap(), replayed.unwrap());
        assert_eq!(trace, replay_trace);
    }

    #[test]
    fn test_replay_rejects_different_bounds() {
        let (_, trace) = Session::random(11, 10).generate(&pair());
        let other = Generator::from(|data| data.draw_int(0, 999));
        let (result, _) = Session::replay(trace, 10).generate(&other);
        assert!(matches!(
            result,
            Err(GenerationError::Replay(ReplayError::Mismatch { .. }))
        ));
    }

    #[test]
    fn test_replay_rejects_out_of_range_value() {
        let trace = Span {
            kind: SpanKind::Generic,
            children: vec![TraceElement::Choice(Choice {
                value: 12,
                descriptor: Descriptor::Uniform { min: 0, max: 10 },
            })],
        };
        let generator = Generator::from(|data| data.draw_int(0, 10));
        let (result, _) = Session::replay(trace, 10).generate(&generator);
        assert!(matches!(
            result,
            Err(GenerationError::Replay(ReplayError::InvalidValue { value: 12, .. }))
        ));
    }

    #[test]
    fn test_replay_exhaustion_is_an_error() {
        let (result, _) = Session::replay(Span::new(SpanKind::Generic), 10).generate(&pair());
        assert_eq!(result, Err(GenerationError::Replay(ReplayError::Exhausted)));
    }

    #[test]
    fn test_unconsumed_replay_data_is_dropped() {
        let (_, trace) = Session::random(5, 10).generate(&pair());
        let first_only = Generator::from(|data| data.draw_int(0, 1000));
        let (result, replay_trace) = Session::replay(trace, 10).generate(&first_only);
        assert!(result.is_ok());
        assert_eq!(replay_trace.choice_count(), 1);
    }

    #[test]
    fn test_parent_used_inside_child_scope_is_rejected() {
        let generator = Generator::from(|outer| {
            let parent = outer.clone();
            outer.generate(&Generator::from(move |_inner| parent.draw_int(0, 1)))
        });
        let (result, _) = Session::random(1, 10).generate(&generator);
        assert_eq!(result, Err(GenerationError::WrongDataStructure));
    }

    #[test]
    fn test_retained_source_is_rejected_after_scope_closes() {
        let stash: Rc<RefCell<Option<DataSource>>> = Rc::new(RefCell::new(None));
        let keep = Rc::clone(&stash);
        let leaking = Generator::from(move |data| {
            *keep.borrow_mut() = Some(data.clone());
            Ok(0)
        });
        let reuse = Rc::clone(&stash);
        let generator = Generator::from(move |data| {
            data.generate(&leaking)?;
            let stale = reuse.borrow().clone();
            match stale {
                Some(stale) => stale.draw_int(0, 10),
                None => Ok(-1),
            }
        });
        let (result, _) = Session::random(1, 10).generate(&generator);
        assert_eq!(result, Err(GenerationError::WrongDataStructure));
    }

    #[test]
    fn test_constant_records_nothing() {
        let (value, trace) = Session::random(1, 10).generate(&constant(5));
        assert_eq!(value.unwrap(), 5);
        assert_eq!(trace.choice_count(), 0);
    }

    #[test]
    fn test_branch_is_marked_once_it_recurses() {
        let generator = Generator::from(|data| {
            let before = data.is_recursive_branch(7);
            data.in_branch(7, || data.span(SpanKind::Recursion, |_| Ok(())))?;
            let plain = data.in_branch(8, || data.draw_int(0, 1))?;
            Ok((before, data.is_recursive_branch(7), data.is_recursive_branch(8), plain >= 0))
        });
        let (value, _) = Session::random(1, 10).generate(&generator);
        assert_eq!(value.unwrap(), (false, true, false, true));

        let (fresh, _) = Session::random(1, 10).generate(&Generator::from(|data| Ok(data.is_recursive_branch(7))));
        assert!(!fresh.unwrap());
    }

    #[test]
    fn test_suggested_size_halves_per_recursion() {
        let generator = Generator::from(|data| {
            let top = data.suggested_size();
            let nested = data.span(SpanKind::Recursion, |inner| {
                Ok((inner.recursion_depth(), inner.suggested_size()))
            })?;
            Ok((top, nested, data.recursion_depth()))
        });
        let (value, _) = Session::random(1, 40).generate(&generator);
        assert_eq!(value.unwrap(), (40, (1, 20), 0));
    }
}
