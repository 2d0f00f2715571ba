//! Execution context: an immutable, ordered set of elements keyed by type.
//!
//! `spec.md` §3.1 models this as a set of elements identified by singleton
//! keys, combined right-biased (`a + b` keeps `b`'s elements on key
//! collision), with four required keys: `Job`, `Dispatcher`, `Name`,
//! `ExceptionHandler`. Rust has no dependent "singleton key" idiom, but the
//! element's own `'static` type already is a unique identity — so the key
//! *is* `TypeId::of::<E>()`, the same trick `http::Extensions` and similar
//! typemap crates use.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::dispatcher::DynDispatcher;
use crate::error::ExceptionHandler;
use crate::job::Job;

trait Element: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> Element for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A human-readable task name, attached to the context a scope builder
/// produces (`spec.md` §6.E / kotlinx `CoroutineName`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoroutineName(pub Arc<str>);

impl CoroutineName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        CoroutineName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CoroutineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wraps a [`Job`] so it can be stored as a context element without the
/// `context` module depending on `job`'s internal handle representation.
#[derive(Clone)]
pub struct JobElement(pub Job);

/// Wraps the context's current dispatcher.
#[derive(Clone)]
pub struct DispatcherElement(pub DynDispatcher);

/// Wraps the context's exception handler.
#[derive(Clone)]
pub struct ExceptionHandlerElement(pub Arc<dyn ExceptionHandler>);

#[derive(Clone)]
struct Entry {
    key: TypeId,
    value: Arc<dyn Element>,
}

/// An immutable, structurally-shared context. Cloning is `O(1)` — it shares
/// the same backing `Arc<[Entry]>` — and [`ExecutionContext::plus`] returns a
/// *new* context rather than mutating `self`, per the immutability
/// requirement in `spec.md` §3.1.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    entries: Arc<[Entry]>,
}

impl ExecutionContext {
    pub fn empty() -> Self {
        ExecutionContext {
            entries: Arc::from(Vec::new()),
        }
    }

    /// Returns a new context with `element` present, overriding any existing
    /// element of the same type.
    pub fn with<E: Any + Send + Sync>(&self, element: E) -> Self {
        let key = TypeId::of::<E>();
        let mut merged: Vec<Entry> = self
            .entries
            .iter()
            .filter(|entry| entry.key != key)
            .cloned()
            .collect();
        merged.push(Entry {
            key,
            value: Arc::new(element),
        });
        ExecutionContext {
            entries: Arc::from(merged),
        }
    }

    /// Combines two contexts; elements in `other` win on key collision,
    /// mirroring `spec.md` §3.1 ("composition ... overrides same-key
    /// elements on the left").
    pub fn plus(&self, other: &ExecutionContext) -> ExecutionContext {
        let mut merged: Vec<Entry> = self
            .entries
            .iter()
            .filter(|entry| !other.entries.iter().any(|o| o.key == entry.key))
            .cloned()
            .collect();
        merged.extend(other.entries.iter().cloned());
        ExecutionContext {
            entries: Arc::from(merged),
        }
    }

    pub fn get<E: Any + Send + Sync>(&self) -> Option<&E> {
        let key = TypeId::of::<E>();
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .and_then(|entry| entry.value.as_any().downcast_ref::<E>())
    }

    pub fn job(&self) -> Option<Job> {
        self.get::<JobElement>().map(|e| e.0.clone())
    }

    pub fn dispatcher(&self) -> Option<DynDispatcher> {
        self.get::<DispatcherElement>().map(|e| e.0.clone())
    }

    pub fn name(&self) -> Option<&CoroutineName> {
        self.get::<CoroutineName>()
    }

    pub fn exception_handler(&self) -> Option<Arc<dyn ExceptionHandler>> {
        self.get::<ExceptionHandlerElement>().map(|e| e.0.clone())
    }

    /// Returns a context identical to `self` but with the `Job` element
    /// replaced, used when a scope builder attaches a freshly created child
    /// job to the enclosing context.
    pub fn with_job(&self, job: Job) -> ExecutionContext {
        self.with(JobElement(job))
    }

    pub fn with_dispatcher(&self, dispatcher: DynDispatcher) -> ExecutionContext {
        self.with(DispatcherElement(dispatcher))
    }

    pub fn with_name(&self, name: impl Into<Arc<str>>) -> ExecutionContext {
        self.with(CoroutineName::new(name))
    }

    pub fn with_exception_handler(&self, handler: Arc<dyn ExceptionHandler>) -> ExecutionContext {
        self.with(ExceptionHandlerElement(handler))
    }
}

impl std::ops::Add for &ExecutionContext {
    type Output = ExecutionContext;

    fn add(self, rhs: &ExecutionContext) -> ExecutionContext {
        self.plus(rhs)
    }
}
