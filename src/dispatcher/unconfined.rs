//! The unconfined dispatcher: runs on whatever thread resumed it.

use super::event_loop::dispatch_unconfined;
use super::{Dispatcher, Runnable};

/// Confines nothing: each resumption runs on the thread that produced the
/// value being resumed with, flattened through a thread-local queue so deep
/// chains of immediately-ready suspend points don't blow the stack
/// (`spec.md` §4.2 "Unconfined"). Mirrors `kotlinx.coroutines`'
/// `Dispatchers.Unconfined` — useful for tests and for code that does not
/// care which thread it runs on, dangerous for code that assumes thread
/// confinement.
#[derive(Debug, Default)]
pub struct UnconfinedDispatcher;

impl UnconfinedDispatcher {
    pub fn new() -> Self {
        UnconfinedDispatcher
    }
}

impl Dispatcher for UnconfinedDispatcher {
    fn must_dispatch(&self) -> bool {
        false
    }

    fn dispatch(&self, runnable: Runnable) {
        dispatch_unconfined(runnable);
    }
}
