//! Stateful scenarios.
//!
//! A scenario interleaves generation with actions on a model supplied by the
//! caller. The factory passed to [`scenarios`] is called once per generated
//! value, so every iteration and every shrink candidate runs against a freshly
//! built model, and the shrinker can delete or simplify steps without state
//! leaking between attempts.
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use conjecture_check::engine::PropertyChecker;
//! use conjecture_check::error::GenerationError;
//! use conjecture_check::ints::integers;
//! use conjecture_check::scenario::Environment;
//!
//! let result = PropertyChecker::silently().with_seed(3).check_scenarios(|| {
//!     let total = Rc::new(RefCell::new(0));
//!     move |env: &mut Environment<'_>| -> Result<(), GenerationError> {
//!         let amount = env.generate_value(&integers(0, 10), Some("add {}"))?;
//!         *total.borrow_mut() += amount;
//!         Ok(())
//!     }
//! });
//! assert!(result.is_ok());
//! ```

use std::cell::RefCell;
use std::fmt;
use std::panic;

use crate::data::DataSource;
use crate::distributions::Repeat;
use crate::error::GenerationError;
use crate::generator::{Generator, MAX_COLLECTION_SIZE};
use crate::trace::SpanKind;
use crate::unwind::{self, PanicCause};

/// An action on the model, drawing whatever it needs from the environment.
pub trait ImperativeCommand {
    fn perform(&self, env: &mut Environment<'_>) -> Result<(), GenerationError>;
}

impl<F> ImperativeCommand for F
where
    F: Fn(&mut Environment<'_>) -> Result<(), GenerationError>,
{
    fn perform(&self, env: &mut Environment<'_>) -> Result<(), GenerationError> {
        self(env)
    }
}

/// What a command sees: the scope it draws from and the scenario log.
pub struct Environment<'a> {
    data: &'a DataSource,
    log: &'a RefCell<Vec<String>>,
}

impl fmt::Debug for Environment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("steps", &self.log.borrow().len())
            .finish()
    }
}

impl<'a> Environment<'a> {
    /// Draws a value in its own span. With a `log_format`, logs it with each
    /// `{}` replaced by the value's `Debug` form.
    pub fn generate_value<T>(&mut self, generator: &Generator<T>, log_format: Option<&str>) -> Result<T, GenerationError>
    where
        T: fmt::Debug + 'static,
    {
        let value = self.data.generate(generator)?;
        if let Some(format) = log_format {
            let line = format.replace("{}", &format!("{:?}", value));
            self.log.borrow_mut().push(line);
        }
        Ok(value)
    }

    pub fn log_message(&mut self, message: impl Into<String>) {
        self.log.borrow_mut().push(message.into());
    }

    /// Draws and performs a sequence of commands, each in its own command
    /// span with an environment bound to that span.
    pub fn execute_commands<C>(&mut self, commands: &Generator<C>) -> Result<(), GenerationError>
    where
        C: ImperativeCommand + 'static,
    {
        let log = self.log;
        self.data.span(SpanKind::Sequence, |sequence| {
            let expected = sequence.suggested_size() as f64 / 4.0;
            let mut repeat = Repeat::new(0, MAX_COLLECTION_SIZE as u64, expected);
            loop {
                let performed = sequence.span(SpanKind::Command, |scope| {
                    if !repeat.should_continue(scope)? {
                        return Ok(false);
                    }
                    let command = scope.generate(commands)?;
                    command.perform(&mut Environment { data: scope, log })?;
                    Ok(true)
                })?;
                if !performed {
                    return Ok(());
                }
            }
        })
    }

    /// The underlying data source, for drawing without logging.
    pub fn data(&self) -> &DataSource {
        self.data
    }
}

/// A generated and executed scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    log: Vec<String>,
    failure: Option<PanicCause>,
}

impl Scenario {
    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// The panic that ended the scenario early, if any.
    pub fn failure(&self) -> Option<&PanicCause> {
        self.failure.as_ref()
    }

    /// The default property for
    /// [`check_scenarios`](crate::engine::PropertyChecker::check_scenarios).
    ///
    /// Returns `true` if every command completed. Otherwise panics again with
    /// the recorded [`PanicCause`] as payload, so a checker sees the original
    /// message and panic location of the failing command.
    pub fn ensure_successful(&self) -> bool {
        match &self.failure {
            None => true,
            Some(cause) => panic::panic_any(cause.clone()),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.log {
            writeln!(f, "{}", line)?;
        }
        match &self.failure {
            Some(cause) => write!(f, "{}", cause),
            None => write!(f, "ok"),
        }
    }
}

/// Scenarios driven by the command `factory` returns. The factory runs once
/// per generated scenario; a panicking command ends the scenario and becomes
/// its failure.
pub fn scenarios<F, C>(factory: F) -> Generator<Scenario>
where
    F: Fn() -> C + 'static,
    C: ImperativeCommand + 'static,
{
    Generator::from(move |data: &DataSource| {
        let command = factory();
        let log = RefCell::new(Vec::new());
        let performed = unwind::catch_silent(|| command.perform(&mut Environment { data, log: &log }));
        let failure = match performed {
            Ok(Ok(())) => None,
            Ok(Err(err)) => return Err(err),
            Err(cause) => Some(cause),
        };
        Ok(Scenario {
            log: log.into_inner(),
            failure,
        })
    })
}
