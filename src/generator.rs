//! Generator combinators.
//!
//! A [`Generator<T>`] is a function from a [`DataSource`] to a `T`. All
//! randomness flows through the data source, so the same trace always
//! rebuilds the same value. Combinators wrap generators in nested spans
//! where the shrinker benefits from the structure: list elements, filter
//! attempts and recursive calls each get their own span.

use std::fmt;
use std::rc::Rc;

use once_cell::unsync::OnceCell;

use crate::data::DataSource;
use crate::distributions::Repeat;
use crate::error::GenerationError;
use crate::trace::SpanKind;

/// Draws a `such_that` filter makes before giving up.
pub const MAX_FILTER_ATTEMPTS: usize = 100;

/// Recursion depth from which recursive branches of a weighted choice are
/// no longer taken.
pub const MAX_RECURSION_DEPTH: usize = 24;

/// Upper bound on generated collection sizes.
pub const MAX_COLLECTION_SIZE: usize = 10_000;

type GeneratorFn<T> = dyn Fn(&DataSource) -> Result<T, GenerationError>;

pub struct Generator<T> {
    function: Rc<GeneratorFn<T>>,
}

impl<T> Clone for Generator<T> {
    fn clone(&self) -> Self {
        Generator {
            function: Rc::clone(&self.function),
        }
    }
}

impl<T: 'static> fmt::Debug for Generator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator").field("id", &self.id()).finish()
    }
}

impl<T: 'static> Generator<T> {
    /// Low-level escape hatch: a generator from a raw function over the data
    /// source. Custom composite generators and the scenario layer are built
    /// on this.
    pub fn from<F>(function: F) -> Self
    where
        F: Fn(&DataSource) -> Result<T, GenerationError> + 'static,
    {
        Generator {
            function: Rc::new(function),
        }
    }

    /// Runs the generator in the scope of `data`, without opening a span.
    /// Use [`DataSource::generate`] to run it in a nested scope.
    pub fn generate_value(&self, data: &DataSource) -> Result<T, GenerationError> {
        (self.function)(data)
    }

    /// Identity shared by all clones of this generator.
    fn id(&self) -> usize {
        Rc::as_ptr(&self.function) as *const () as usize
    }

    /// Post-processes generated values. Makes no decisions of its own, so it
    /// shrinks exactly like `self`.
    pub fn map<U: 'static, F>(&self, f: F) -> Generator<U>
    where
        F: Fn(T) -> U + 'static,
    {
        let base = self.clone();
        Generator::from(move |data: &DataSource| base.generate_value(data).map(&f))
    }

    /// Generates a value, then generates from the generator it selects.
    pub fn flat_map<U: 'static, F>(&self, f: F) -> Generator<U>
    where
        F: Fn(T) -> Generator<U> + 'static,
    {
        let base = self.clone();
        Generator::from(move |data: &DataSource| {
            let value = data.generate(&base)?;
            data.generate(&f(value))
        })
    }

    /// Keeps drawing until `condition` holds, each attempt in its own span.
    /// Fails with [`GenerationError::CannotSatisfyCondition`] after
    /// [`MAX_FILTER_ATTEMPTS`] attempts.
    pub fn such_that<P>(&self, condition: P) -> Generator<T>
    where
        P: Fn(&T) -> bool + 'static,
    {
        let base = self.clone();
        Generator::from(move |data: &DataSource| {
            for _ in 0..MAX_FILTER_ATTEMPTS {
                let value = data.generate(&base)?;
                if condition(&value) {
                    return Ok(value);
                }
            }
            Err(GenerationError::CannotSatisfyCondition {
                attempts: MAX_FILTER_ATTEMPTS,
            })
        })
    }

    pub fn zip<U: 'static>(&self, other: &Generator<U>) -> Generator<(T, U)> {
        let first = self.clone();
        let second = other.clone();
        Generator::from(move |data: &DataSource| {
            let a = data.generate(&first)?;
            let b = data.generate(&second)?;
            Ok((a, b))
        })
    }
}

/// Always produces `value`; makes no decisions.
pub fn constant<T: Clone + 'static>(value: T) -> Generator<T> {
    Generator::from(move |_| Ok(value.clone()))
}

pub fn booleans() -> Generator<bool> {
    Generator::from(|data| data.draw_flag(0.5))
}

/// Picks one of `values` uniformly; shrinks towards the first.
pub fn sampled_from<T: Clone + 'static>(values: Vec<T>) -> Generator<T> {
    Generator::from(move |data| {
        if values.is_empty() {
            return Err(GenerationError::custom("cannot sample from an empty list"));
        }
        let index = data.draw_int(0, values.len() as i64 - 1)?;
        Ok(values[index as usize].clone())
    })
}

/// A weighted table of alternatives.
///
/// [`with`](Frequency::with) extends the table into a new value; the
/// original table stays as it was.
pub struct Frequency<T> {
    alternatives: Vec<(u32, Generator<T>)>,
}

impl<T> Clone for Frequency<T> {
    fn clone(&self) -> Self {
        Frequency {
            alternatives: self.alternatives.clone(),
        }
    }
}

impl<T> fmt::Debug for Frequency<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let weights: Vec<u32> = self.alternatives.iter().map(|(w, _)| *w).collect();
        f.debug_struct("Frequency").field("weights", &weights).finish()
    }
}

pub fn frequency<T: 'static>(alternatives: Vec<(u32, Generator<T>)>) -> Frequency<T> {
    Frequency { alternatives }
}

/// Equally weighted choice between `generators`.
pub fn any_of<T: 'static>(generators: Vec<Generator<T>>) -> Generator<T> {
    frequency(generators.into_iter().map(|g| (1, g)).collect()).to_generator()
}

fn effective_weight(weight: u32, recursive: bool, depth: usize) -> f64 {
    if !recursive {
        f64::from(weight)
    } else if depth >= MAX_RECURSION_DEPTH {
        0.0
    } else {
        f64::from(weight) * 0.5f64.powi(depth as i32)
    }
}

impl<T: 'static> Frequency<T> {
    pub fn with(&self, weight: u32, generator: Generator<T>) -> Frequency<T> {
        let mut alternatives = self.alternatives.clone();
        alternatives.push((weight, generator));
        Frequency { alternatives }
    }

    pub fn len(&self) -> usize {
        self.alternatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }

    /// Branches that have opened a recursion span earlier in the same
    /// generation are weighted down by half per level of recursion and
    /// dropped from [`MAX_RECURSION_DEPTH`] on. A branch is marked as soon as
    /// its first recursion span opens, whatever combinator opened it.
    pub fn to_generator(&self) -> Generator<T> {
        let alternatives = Rc::new(self.alternatives.clone());
        Generator::from(move |data: &DataSource| {
            let depth = data.recursion_depth();
            let weights = alternatives
                .iter()
                .map(|(weight, g)| effective_weight(*weight, data.is_recursive_branch(g.id()), depth))
                .collect();
            let index = data.draw_weighted(weights)?;
            let branch = &alternatives[index].1;
            data.in_branch(branch.id(), || branch.generate_value(data))
        })
    }
}

impl<T: 'static> From<Frequency<T>> for Generator<T> {
    fn from(table: Frequency<T>) -> Self {
        table.to_generator()
    }
}

fn lists_between<T: 'static>(element: &Generator<T>, min: usize, max: usize) -> Generator<Vec<T>> {
    let element = element.clone();
    let min = min.min(MAX_COLLECTION_SIZE);
    let max = max.clamp(min, MAX_COLLECTION_SIZE);
    Generator {
        function: Rc::new(move |data: &DataSource| {
            data.span(SpanKind::Sequence, |sequence| {
                let expected = sequence.suggested_size() as f64 / 4.0;
                let mut repeat = Repeat::new(min as u64, max as u64, expected);
                let mut items = Vec::new();
                loop {
                    let next = sequence.span(SpanKind::Item, |item| {
                        if repeat.should_continue(item)? {
                            item.generate(&element).map(Some)
                        } else {
                            Ok(None)
                        }
                    })?;
                    match next {
                        Some(value) => items.push(value),
                        None => return Ok(items),
                    }
                }
            })
        }),
    }
}

/// Lists whose expected length grows with the size hint.
pub fn lists_of<T: 'static>(element: &Generator<T>) -> Generator<Vec<T>> {
    lists_between(element, 0, MAX_COLLECTION_SIZE)
}

/// Like [`lists_of`], but always takes a first element before offering to
/// stop.
pub fn non_empty_lists_of<T: 'static>(element: &Generator<T>) -> Generator<Vec<T>> {
    lists_between(element, 1, MAX_COLLECTION_SIZE)
}

pub fn lists_of_size<T: 'static>(element: &Generator<T>, min: usize, max: usize) -> Generator<Vec<T>> {
    lists_between(element, min, max.max(min))
}

/// Defines a self-referential generator.
///
/// `builder` gets a reference to the generator being defined; it is
/// resolved through a cell bound once the builder has returned. Every use of
/// the reference opens a recursion span, which halves the collection budget
/// and the weight of recursive branches in [`frequency`] tables.
///
/// ```rust
/// use conjecture_check::generator::{frequency, lists_of, recursive};
/// use conjecture_check::ints::integers;
///
/// #[derive(Debug, Clone)]
/// enum Tree {
///     Leaf(i32),
///     Node(Vec<Tree>),
/// }
///
/// let trees = recursive(|tree| {
///     frequency(vec![
///         (1, integers(0, 10).map(Tree::Leaf)),
///         (1, lists_of(tree).map(Tree::Node)),
///     ])
///     .to_generator()
/// });
/// ```
pub fn recursive<T, F>(builder: F) -> Generator<T>
where
    T: 'static,
    F: FnOnce(&Generator<T>) -> Generator<T>,
{
    let cell: Rc<OnceCell<Generator<T>>> = Rc::new(OnceCell::new());
    let weak = Rc::downgrade(&cell);
    let this = Generator {
        function: Rc::new(move |data: &DataSource| {
            let cell = weak.upgrade().ok_or_else(|| {
                GenerationError::custom("recursive generator used after its definition was dropped")
            })?;
            generate_recursive(&cell, data)
        }),
    };

    let definition = builder(&this);
    if cell.set(definition).is_err() {
        log::warn!("recursive generator definition was bound twice");
    }

    Generator::from(move |data: &DataSource| generate_recursive(&cell, data))
}

fn generate_recursive<T: 'static>(
    cell: &OnceCell<Generator<T>>,
    data: &DataSource,
) -> Result<T, GenerationError> {
    let definition = cell
        .get()
        .cloned()
        .ok_or_else(|| GenerationError::custom("recursive generator used before its definition was complete"))?;
    data.span(SpanKind::Recursion, |inner| definition.generate_value(inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Session;
    use crate::ints::integers;

    fn sample<T: 'static>(generator: &Generator<T>, seed: u64) -> T {
        Session::random(seed, 50).generate(generator).0.unwrap()
    }

    #[test]
    fn test_map_makes_no_decisions() {
        let base = integers(0, 100);
        let (_, base_trace) = Session::random(9, 10).generate(&base);
        let (value, mapped_trace) = Session::random(9, 10).generate(&base.map(|i| i * 2));
        assert_eq!(base_trace, mapped_trace);
        assert_eq!(value.unwrap() % 2, 0);
    }

    #[test]
    fn test_such_that_holds_for_every_sample() {
        let evens = integers(0, 1000).such_that(|i| i % 2 == 0);
        for seed in 0..200 {
            assert_eq!(sample(&evens, seed) % 2, 0);
        }
    }

    #[test]
    fn test_such_that_is_bounded() {
        let impossible = integers(-1, 1).such_that(|i| *i > 2);
        let (result, _) = Session::random(0, 10).generate(&impossible);
        assert_eq!(
            result,
            Err(GenerationError::CannotSatisfyCondition {
                attempts: MAX_FILTER_ATTEMPTS
            })
        );
    }

    #[test]
    fn test_frequency_with_does_not_mutate_original() {
        let small = frequency(vec![(1, constant(1))]);
        let extended = small.with(1000, constant(2));
        assert_eq!(small.len(), 1);
        assert_eq!(extended.len(), 2);
        let original = small.to_generator();
        for seed in 0..20 {
            assert_eq!(sample(&original, seed), 1);
        }
        let values: Vec<i32> = (0..50).map(|seed| sample(&extended.to_generator(), seed)).collect();
        assert!(values.contains(&2));
    }

    #[test]
    fn test_zero_weight_branch_never_taken() {
        let generator = frequency(vec![(0, constant('a')), (1, constant('b'))]).to_generator();
        for seed in 0..50 {
            assert_eq!(sample(&generator, seed), 'b');
        }
    }

    #[test]
    fn test_sampled_from_stays_in_table() {
        let generator = sampled_from(vec!["x", "y", "z"]);
        for seed in 0..50 {
            assert!(["x", "y", "z"].contains(&sample(&generator, seed)));
        }
        let (result, _) = Session::random(0, 10).generate(&sampled_from(Vec::<u8>::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_non_empty_lists_are_non_empty() {
        let generator = non_empty_lists_of(&integers(0, 9));
        for seed in 0..100 {
            assert!(!sample(&generator, seed).is_empty());
        }
    }

    #[test]
    fn test_lists_of_size_respects_bounds() {
        let generator = lists_of_size(&booleans(), 2, 4);
        for seed in 0..100 {
            let len = sample(&generator, seed).len();
            assert!((2..=4).contains(&len), "length {}", len);
        }
    }

    #[test]
    fn test_list_trace_has_one_item_span_per_element_plus_terminator() {
        let generator = lists_of(&integers(0, 9));
        let (value, trace) = Session::random(4, 100).generate(&generator);
        let value = value.unwrap();
        let sequence = trace.span_at(&[0]).unwrap();
        assert_eq!(sequence.kind, SpanKind::Sequence);
        assert_eq!(sequence.children.len(), value.len() + 1);
    }

    #[derive(Debug, Clone)]
    enum Tree {
        Leaf(i32),
        Node(Vec<Tree>),
    }

    fn depth(tree: &Tree) -> usize {
        match tree {
            Tree::Leaf(_) => 0,
            Tree::Node(children) => 1 + children.iter().map(depth).max().unwrap_or(0),
        }
    }

    #[test]
    fn test_recursive_generator_terminates() {
        let trees = recursive(|tree| {
            frequency(vec![
                (1, integers(0, 10).map(Tree::Leaf)),
                (3, lists_of(tree).map(Tree::Node)),
            ])
            .to_generator()
        });
        for seed in 0..1000 {
            let tree = Session::random(seed, 100).generate(&trees).0.unwrap();
            assert!(depth(&tree) <= MAX_RECURSION_DEPTH, "depth {}", depth(&tree));
        }
    }

    #[test]
    fn test_escape_hatch_branch_is_weighted_down() {
        let trees = recursive(|tree| {
            let tree = tree.clone();
            frequency(vec![
                (1, integers(0, 10).map(Tree::Leaf)),
                (
                    3,
                    Generator::from(move |data: &DataSource| {
                        let left = data.generate(&tree)?;
                        let right = data.generate(&tree)?;
                        Ok(Tree::Node(vec![left, right]))
                    }),
                ),
            ])
            .to_generator()
        });
        for seed in 0..1000 {
            let tree = Session::random(seed, 100).generate(&trees).0.unwrap();
            // One extra level for the first, still unmarked, use of the branch.
            assert!(depth(&tree) <= MAX_RECURSION_DEPTH + 1, "depth {}", depth(&tree));
        }
    }

    #[test]
    fn test_lists_of_size_clamps_oversized_minimum() {
        let generator = lists_of_size(&constant(0u8), MAX_COLLECTION_SIZE + 5, MAX_COLLECTION_SIZE + 10);
        assert_eq!(sample(&generator, 3).len(), MAX_COLLECTION_SIZE);
    }

    #[test]
    fn test_recursive_self_reference_outlived_definition() {
        let escaped: std::cell::RefCell<Option<Generator<i32>>> = std::cell::RefCell::new(None);
        {
            let _definition = recursive(|this| {
                *escaped.borrow_mut() = Some(this.clone());
                constant(1)
            });
        }
        let this = escaped.into_inner().unwrap();
        let (result, _) = Session::random(0, 10).generate(&this);
        assert!(matches!(result, Err(GenerationError::Custom(_))));
    }
}
