//! Scoped execution of policy code.
//!
//! # Responsibilities
//! - Identify the scope a policy's code runs under ([`PolicyScope`])
//! - Hand that scope explicitly to every invocation, on the control path via
//!   `PolicyChain::scope()` and on the body path as a parameter
//! - Keep a panicking policy from unwinding into the chain engine
//!
//! # Design Decisions
//! - No ambient state: the scope is passed, never looked up. Control path
//!   and body path can run on different threads at the same time without
//!   seeing each other's scope.
//! - [`ScopeGuard`] enters a `tracing` span for the invocation and leaves it
//!   on drop, so the span closes on every exit path including panics.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Identity a policy's code executes under; usually its plugin or policy name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyScope {
    name: Arc<str>,
}

impl PolicyScope {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enter this scope until the returned guard is dropped.
    pub fn enter(&self) -> ScopeGuard<'_> {
        let span = tracing::debug_span!("policy", scope = %self).entered();
        ScopeGuard {
            scope: self,
            _span: span,
        }
    }

    /// Run one invocation inside this scope.
    ///
    /// A panic is caught and returned as its message.
    pub fn run<T>(&self, invocation: impl FnOnce(&PolicyScope) -> T) -> Result<T, String> {
        let guard = self.enter();
        panic::catch_unwind(AssertUnwindSafe(|| invocation(guard.scope()))).map_err(panic_message)
    }
}

impl fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An entered scope; leaves its span when dropped.
pub struct ScopeGuard<'a> {
    scope: &'a PolicyScope,
    _span: tracing::span::EnteredSpan,
}

impl ScopeGuard<'_> {
    pub fn scope(&self) -> &PolicyScope {
        self.scope
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast_ref::<&'static str>() {
            Some(message) => (*message).to_string(),
            None => "panicked".to_string(),
        },
    }
}
