// Panic capture for generators and properties.
// A process-wide hook is installed once; it records the panic location and
// message for threads that are inside `catch_silent` and defers to the
// previously installed hook everywhere else. A panic whose payload is itself
// a `PanicCause` is a re-raised earlier panic and keeps its original cause.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

/// A caught panic: its message and the source location it was raised at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PanicCause {
    pub message: String,
    pub location: Option<String>,
}

impl fmt::Display for PanicCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "panicked at {}: {}", location, self.message),
            None => write!(f, "panicked: {}", self.message),
        }
    }
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<PanicCause>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let cause = PanicCause {
                    message: payload_message(info.payload()),
                    location: info
                        .location()
                        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
                };
                LAST_PANIC.with(|last| *last.borrow_mut() = Some(cause));
            } else {
                previous(info);
            }
        }));
    });
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(cause) = payload.downcast_ref::<PanicCause>() {
        cause.message.clone()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs `f`, turning a panic into a [`PanicCause`] without printing it.
pub(crate) fn catch_silent<R>(f: impl FnOnce() -> R) -> Result<R, PanicCause> {
    install_hook();
    let was_capturing = CAPTURING.with(|c| c.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|c| c.set(was_capturing));
    result.map_err(|payload| {
        let recorded = LAST_PANIC.with(|last| last.borrow_mut().take());
        match payload.downcast::<PanicCause>() {
            Ok(cause) => *cause,
            Err(payload) => recorded.unwrap_or_else(|| PanicCause {
                message: payload_message(payload.as_ref()),
                location: None,
            }),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_returns_value() {
        assert_eq!(catch_silent(|| 3), Ok(3));
    }

    #[test]
    fn test_catch_records_message_and_location() {
        let cause = catch_silent(|| -> i32 { panic!("boom {}", 7) }).unwrap_err();
        assert_eq!(cause.message, "boom 7");
        assert!(cause.location.unwrap().contains("unwind.rs"));
    }

    #[test]
    fn test_same_site_same_location() {
        let fail = |x: i32| {
            if x > 0 {
                panic!("positive: {}", x);
            }
        };
        let a = catch_silent(|| fail(1)).unwrap_err();
        let b = catch_silent(|| fail(2)).unwrap_err();
        assert_eq!(a.location, b.location);
        assert_ne!(a.message, b.message);
    }

    #[test]
    fn test_reraised_cause_keeps_original_location() {
        let original = catch_silent(|| -> i32 { panic!("first site") }).unwrap_err();
        let reraised = catch_silent(|| -> i32 { panic::panic_any(original.clone()) }).unwrap_err();
        assert_eq!(reraised, original);
    }

    #[test]
    fn test_nested_catch_keeps_outer_capture() {
        let outer = catch_silent(|| {
            let inner = catch_silent(|| panic!("inner"));
            assert!(inner.is_err());
            panic!("outer");
        })
        .unwrap_err();
        assert_eq!(outer.message, "outer");
    }
}
