//! Public error surface (`spec.md` §6 "Public errors", §7 "Error handling
//! design").
//!
//! Two error "kinds" flow through the runtime: cancellation (expected control
//! flow, never reported) and application failure (thrown by user code,
//! aggregated with suppressed siblings, surfaced to `await`/`join` callers or
//! to the exception handler). [`JobCause`] is the internal union of the two;
//! [`CancellationException`], [`TimeoutCancellationException`],
//! [`ClosedSendChannelException`] and [`ClosedReceiveChannelException`] are
//! the public types a caller actually matches on.

use std::fmt;
use std::sync::{Arc, OnceLock};

/// Any user-supplied error, shared rather than boxed so it can be cloned onto
/// every sibling's suppressed list and into every `await` caller without
/// re-wrapping.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Identifies a single `withTimeout`-style deadline. Two [`CancellationCause`]
/// values are "the same timeout" iff they carry `Arc`-equal tokens — this is
/// what lets a `with_timeout` scope catch *its own* timeout and let an outer
/// cancellation (or an unrelated nested timeout) pass through unmolested.
#[derive(Clone)]
pub struct TimeoutToken(Arc<()>);

impl TimeoutToken {
    pub fn new() -> Self {
        TimeoutToken(Arc::new(()))
    }

    pub fn matches(&self, other: &TimeoutToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for TimeoutToken {
    fn default() -> Self {
        Self::new()
    }
}

/// The root cause recorded when a job enters `Finishing` via cancellation
/// (`spec.md` §3.2, §4.5 `cancel`).
#[derive(Clone)]
pub struct CancellationCause {
    message: Arc<str>,
    timeout_token: Option<TimeoutToken>,
}

impl CancellationCause {
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        CancellationCause {
            message: message.into(),
            timeout_token: None,
        }
    }

    pub fn timeout(message: impl Into<Arc<str>>, token: TimeoutToken) -> Self {
        CancellationCause {
            message: message.into(),
            timeout_token: Some(token),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout_token.is_some()
    }

    /// True when this cause is the timeout produced by `token`'s own
    /// `with_timeout` scope (as opposed to some other timeout, or a plain
    /// outer cancellation that happens to race it).
    pub fn matches_timeout(&self, token: &TimeoutToken) -> bool {
        self.timeout_token
            .as_ref()
            .is_some_and(|mine| mine.matches(token))
    }
}

impl fmt::Debug for CancellationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationCause")
            .field("message", &self.message)
            .field("is_timeout", &self.is_timeout())
            .finish()
    }
}

impl fmt::Display for CancellationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// An application failure plus its aggregated suppressed siblings
/// (`spec.md` §4.5 "Exception aggregation"). Persistent/immutable like
/// [`crate::context::ExecutionContext`]: `with_suppressed` returns a new
/// value sharing the old suppressed list's backing storage.
#[derive(Clone)]
pub struct AppError {
    error: SharedError,
    suppressed: Arc<[AppError]>,
}

impl AppError {
    pub fn new(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::from_shared(Arc::new(error))
    }

    pub fn from_shared(error: SharedError) -> Self {
        AppError {
            error,
            suppressed: Arc::from(Vec::new()),
        }
    }

    pub fn error(&self) -> &SharedError {
        &self.error
    }

    pub fn suppressed(&self) -> &[AppError] {
        &self.suppressed
    }

    #[must_use]
    pub fn with_suppressed(&self, extra: AppError) -> AppError {
        let mut merged: Vec<AppError> = self.suppressed.iter().cloned().collect();
        merged.push(extra);
        AppError {
            error: self.error.clone(),
            suppressed: Arc::from(merged),
        }
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppError")
            .field("error", &self.error.to_string())
            .field("suppressed", &self.suppressed.len())
            .finish()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// The terminal cause recorded on a job's `Completed` (or `Finishing`) state:
/// either cancellation (expected) or an application failure (unexpected),
/// never both — `spec.md` §3.2.
#[derive(Clone, Debug)]
pub enum JobCause {
    Cancelled(CancellationCause),
    Failed(AppError),
}

impl JobCause {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, JobCause::Cancelled(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobCause::Failed(_))
    }
}

impl fmt::Display for JobCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobCause::Cancelled(cause) => write!(f, "{cause}"),
            JobCause::Failed(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for JobCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JobCause::Cancelled(_) => None,
            JobCause::Failed(err) => Some(err.error.as_ref()),
        }
    }
}

/// Thrown by `await`-shaped suspend points when the awaited job was
/// cancelled. Normal control flow: a scope swallows its own children's
/// cancellation at its boundary (`spec.md` §7 policy).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct CancellationException(pub CancellationCause);

/// A [`CancellationException`] raised specifically by an expired
/// `with_timeout` deadline. Only the matching `with_timeout` call is
/// entitled to swallow it (`spec.md` §6).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TimeoutCancellationException(pub CancellationCause);

#[derive(Debug, Clone, thiserror::Error)]
#[error("channel is closed for sending")]
pub struct ClosedSendChannelException {
    pub cause: Option<AppError>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("channel is closed for receiving")]
pub struct ClosedReceiveChannelException {
    pub cause: Option<AppError>,
}

/// Consulted when a job fails without a local `await`/`join` caller
/// (`spec.md` §6, §7 kind 3–5). Implementations must not panic — a handler
/// that throws is itself caught and routed here again with a wrapped
/// "handler failure" kind, so a perpetually-panicking handler would loop;
/// callers are expected to keep `handle` infallible in practice.
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, job_name: Option<&str>, cause: &JobCause);
}

/// The default handler installed when a context carries none: logs and
/// moves on, matching `spec.md` §7's "never aborts the pipeline".
pub struct DefaultExceptionHandler;

impl ExceptionHandler for DefaultExceptionHandler {
    fn handle(&self, job_name: Option<&str>, cause: &JobCause) {
        report_to_last_resort(job_name, cause);
    }
}

static LAST_RESORT: OnceLock<Arc<dyn ExceptionHandler>> = OnceLock::new();

/// Installs the process-wide last-resort reporter (`spec.md` §4.3 step 5).
/// Only the first call takes effect; later calls are ignored, mirroring the
/// "install once, early" convention of similar global hooks (e.g.
/// `std::panic::set_hook`-adjacent libraries).
pub fn install_last_resort_handler(handler: Arc<dyn ExceptionHandler>) {
    let _ = LAST_RESORT.set(handler);
}

/// Routes a cause to the installed last-resort handler, or a built-in
/// fallback when none was installed.
pub fn report_to_last_resort(job_name: Option<&str>, cause: &JobCause) {
    if let Some(handler) = LAST_RESORT.get() {
        handler.handle(job_name, cause);
        return;
    }
    default_report(job_name, cause);
}

fn default_report(job_name: Option<&str>, cause: &JobCause) {
    let name = job_name.unwrap_or("<unnamed>");
    #[cfg(feature = "tracing-reporter")]
    {
        tracing::error!(job = name, error = %cause, "uncaught exception escaped a structured-concurrency job");
    }
    #[cfg(not(feature = "tracing-reporter"))]
    {
        eprintln!("uncaught exception in job `{name}`: {cause}");
    }
}
