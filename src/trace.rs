//! The recorded decision trace.
//!
//! A trace is a tree: every [`Span`] corresponds to one nested generation
//! scope and holds, in order, the choices drawn directly in that scope and
//! the spans of its sub-generations. The nesting is what lets the shrinker
//! act on "the third list element" rather than on a flat stream of numbers.
//!
//! Positions inside a trace are addressed by [`Path`]s: the sequence of child
//! indices leading from the root span to an element.

use std::fmt;

use crate::distributions::Descriptor;

pub type Path = Vec<usize>;

/// The role a span plays; replay only matches spans of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    /// Any `generate` call.
    Generic,
    /// A homogeneous sequence; children are [`SpanKind::Item`] spans.
    Sequence,
    /// One step of a sequence: a continue flag and, if set, the element.
    Item,
    /// One use of a recursive generator's self reference.
    Recursion,
    /// One command of a scenario.
    Command,
}

impl SpanKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            SpanKind::Generic => 0,
            SpanKind::Sequence => 1,
            SpanKind::Item => 2,
            SpanKind::Recursion => 3,
            SpanKind::Command => 4,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => SpanKind::Generic,
            1 => SpanKind::Sequence,
            2 => SpanKind::Item,
            3 => SpanKind::Recursion,
            4 => SpanKind::Command,
            _ => return None,
        })
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpanKind::Generic => "generic",
            SpanKind::Sequence => "sequence",
            SpanKind::Item => "item",
            SpanKind::Recursion => "recursion",
            SpanKind::Command => "command",
        };
        f.write_str(name)
    }
}

/// One atomic recorded decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Choice {
    pub value: i64,
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TraceElement {
    Choice(Choice),
    Span(Span),
}

impl TraceElement {
    pub(crate) fn describe(&self) -> String {
        match self {
            TraceElement::Choice(choice) => format!("choice {} from {}", choice.value, choice.descriptor),
            TraceElement::Span(span) => format!("{} span", span.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Span {
    pub kind: SpanKind,
    pub children: Vec<TraceElement>,
}

/// Order used by the shrinker: fewer choices first, then values closer to
/// their simplest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShrinkKey {
    pub choices: usize,
    pub distance: u128,
}

impl Span {
    pub fn new(kind: SpanKind) -> Self {
        Span {
            kind,
            children: Vec::new(),
        }
    }

    pub fn choice_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                TraceElement::Choice(_) => 1,
                TraceElement::Span(span) => span.choice_count(),
            })
            .sum()
    }

    fn total_distance(&self) -> u128 {
        self.children
            .iter()
            .map(|child| match child {
                TraceElement::Choice(choice) => choice.descriptor.distance(choice.value),
                TraceElement::Span(span) => span.total_distance(),
            })
            .fold(0u128, u128::saturating_add)
    }

    pub fn shrink_key(&self) -> ShrinkKey {
        ShrinkKey {
            choices: self.choice_count(),
            distance: self.total_distance(),
        }
    }

    /// All choices in recording order.
    pub fn choices(&self) -> Vec<Choice> {
        let mut out = Vec::new();
        self.collect_choices(&mut out);
        out
    }

    fn collect_choices(&self, out: &mut Vec<Choice>) {
        for child in &self.children {
            match child {
                TraceElement::Choice(choice) => out.push(*choice),
                TraceElement::Span(span) => span.collect_choices(out),
            }
        }
    }

    pub fn get(&self, path: &[usize]) -> Option<&TraceElement> {
        let (last, prefix) = path.split_last()?;
        self.span_at(prefix)?.children.get(*last)
    }

    /// The span at `path`; the empty path is `self`.
    pub fn span_at(&self, path: &[usize]) -> Option<&Span> {
        let mut span = self;
        for index in path {
            match span.children.get(*index)? {
                TraceElement::Span(child) => span = child,
                TraceElement::Choice(_) => return None,
            }
        }
        Some(span)
    }

    fn span_at_mut(&mut self, path: &[usize]) -> Option<&mut Span> {
        let mut span = self;
        for index in path {
            match span.children.get_mut(*index)? {
                TraceElement::Span(child) => span = child,
                TraceElement::Choice(_) => return None,
            }
        }
        Some(span)
    }

    pub fn choice_at(&self, path: &[usize]) -> Option<Choice> {
        match self.get(path)? {
            TraceElement::Choice(choice) => Some(*choice),
            TraceElement::Span(_) => None,
        }
    }

    /// Paths of every span below the root, parents before children.
    pub fn span_paths(&self) -> Vec<Path> {
        let mut out = Vec::new();
        self.collect_span_paths(&mut Vec::new(), &mut out);
        out
    }

    fn collect_span_paths(&self, prefix: &mut Path, out: &mut Vec<Path>) {
        for (index, child) in self.children.iter().enumerate() {
            if let TraceElement::Span(span) = child {
                prefix.push(index);
                out.push(prefix.clone());
                span.collect_span_paths(prefix, out);
                prefix.pop();
            }
        }
    }

    /// Paths of every choice, innermost spans first: the choices of a span's
    /// children come before the span's own choices.
    pub fn choice_paths_bottom_up(&self) -> Vec<Path> {
        let mut out = Vec::new();
        self.collect_choice_paths(&mut Vec::new(), &mut out);
        out
    }

    fn collect_choice_paths(&self, prefix: &mut Path, out: &mut Vec<Path>) {
        for (index, child) in self.children.iter().enumerate() {
            if let TraceElement::Span(span) = child {
                prefix.push(index);
                span.collect_choice_paths(prefix, out);
                prefix.pop();
            }
        }
        for (index, child) in self.children.iter().enumerate() {
            if let TraceElement::Choice(_) = child {
                prefix.push(index);
                out.push(prefix.clone());
                prefix.pop();
            }
        }
    }

    /// A copy with the element at `path` removed.
    pub fn without(&self, path: &[usize]) -> Option<Span> {
        let (last, prefix) = path.split_last()?;
        let mut copy = self.clone();
        let parent = copy.span_at_mut(prefix)?;
        if *last >= parent.children.len() {
            return None;
        }
        parent.children.remove(*last);
        Some(copy)
    }

    /// A copy with the element at `path` replaced.
    pub fn replaced(&self, path: &[usize], element: TraceElement) -> Option<Span> {
        let (last, prefix) = path.split_last()?;
        let mut copy = self.clone();
        let slot = copy.span_at_mut(prefix)?.children.get_mut(*last)?;
        *slot = element;
        Some(copy)
    }

    /// A copy with the choice at `path` set to `value`.
    pub fn with_value(&self, path: &[usize], value: i64) -> Option<Span> {
        let choice = self.choice_at(path)?;
        self.replaced(
            path,
            TraceElement::Choice(Choice {
                value,
                descriptor: choice.descriptor,
            }),
        )
    }
}
