//! Contract checks and the customizable assertion-handler stack.
//!
//! Every precondition in this crate is checked through [`contract!`]. A
//! failed check reports `(expression, message, location)` to the handler on
//! top of a process-global stack. With no handler installed the failure is
//! written to stderr and the process aborts; an installed handler may panic
//! instead to unwind to a recovery point (useful in tests and in embedders
//! that want to survive contract violations).
//!
//! Handler registration is global state. Pushes and pops form a LIFO stack;
//! prefer [`ScopedAssertionHandler`] so that every push is matched with a pop
//! even when unwinding.
//!
//! ```
//! use keel::contract::{AssertionInfo, ScopedAssertionHandler};
//!
//! let _guard = ScopedAssertionHandler::new(|info: &AssertionInfo| {
//!     panic!("contract violated: {}", info.expression);
//! });
//! // contract failures in this scope panic instead of aborting
//! ```

use core::panic::Location;
use std::sync::Arc;

use spin::Mutex;

/// Everything a handler learns about a failed contract check.
#[derive(Clone, Copy, Debug)]
pub struct AssertionInfo<'a> {
    /// The stringified expression that evaluated to `false`.
    pub expression: &'a str,
    /// The human-readable message attached to the check.
    pub message: &'a str,
    /// Source location of the check.
    pub location: &'static Location<'static>,
}

type Handler = Arc<dyn Fn(&AssertionInfo) + Send + Sync>;

/// The handler stack. The lock is held only while pushing, popping or
/// cloning the top entry, never while a handler runs, so a panicking
/// handler cannot wedge the lock.
static HANDLERS: Mutex<Vec<Handler>> = Mutex::new(Vec::new());

/// Push a custom assertion handler onto the handler stack.
///
/// The handler is invoked for every contract failure until it is popped.
/// Handlers are allowed to panic as a way to unwind to a recovery point.
pub fn push_assertion_handler(handler: impl Fn(&AssertionInfo) + Send + Sync + 'static) {
    HANDLERS.lock().push(Arc::new(handler));
}

/// Pop the topmost assertion handler from the stack.
///
/// Each push must be matched with a pop, including along unwinding paths.
/// Prefer [`ScopedAssertionHandler`] for automatic cleanup.
pub fn pop_assertion_handler() {
    let popped = HANDLERS.lock().pop();
    if popped.is_none() {
        eprintln!("keel: pop_assertion_handler called on an empty handler stack");
    }
}

/// RAII guard pairing a handler push with an unconditional pop on drop.
pub struct ScopedAssertionHandler {
    // keeps the guard out of cross-thread moves; the stack is global and a
    // guard moved to another thread would pop someone else's handler
    _not_send: core::marker::PhantomData<*const ()>,
}

impl ScopedAssertionHandler {
    pub fn new(handler: impl Fn(&AssertionInfo) + Send + Sync + 'static) -> Self {
        push_assertion_handler(handler);
        Self {
            _not_send: core::marker::PhantomData,
        }
    }
}

impl Drop for ScopedAssertionHandler {
    fn drop(&mut self) {
        pop_assertion_handler();
    }
}

/// Reports a failed contract check and never returns normally.
///
/// Invokes the topmost handler if one is installed; if the handler returns
/// (or none is installed) the failure is printed to stderr and the process
/// aborts. A handler that panics unwinds through this function instead.
#[cold]
pub fn contract_failure(expression: &str, message: &str, location: &'static Location<'static>) -> ! {
    let info = AssertionInfo {
        expression,
        message,
        location,
    };

    let handler = HANDLERS.lock().last().cloned();
    if let Some(handler) = handler {
        handler(&info);
    }

    eprintln!("contract check failed: {expression}");
    eprintln!("  message: {message}");
    eprintln!("  location: {location}");
    std::process::abort();
}

/// Checks a precondition, routing failures through the handler stack.
///
/// Unlike `assert!`, this is active in release builds: the checks guard
/// memory-safety-relevant invariants and are cheap by construction.
#[macro_export]
macro_rules! contract {
    ($cond:expr, $msg:expr) => {
        if !$cond {
            $crate::contract::contract_failure(
                stringify!($cond),
                $msg,
                ::core::panic::Location::caller(),
            );
        }
    };
}
