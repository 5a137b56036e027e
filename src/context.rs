//! Request context shared between the pipeline, the guard, and handlers.
//!
//! A [`Context`] is a cheap shallow clone: request metadata is shared
//! read-only behind an `Arc`, the abort flag and cancellation token are
//! deliberately shared signals, and the writer slot is the only field a
//! fork replaces. [`Context::fork_with_writer`] is the explicit
//! copy-on-fork point the guard uses so the background handler task and the
//! foreground race never contend on the same writer slot.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use http::{HeaderMap, Method};
use tokio_util::sync::CancellationToken;

use crate::writer::ResponseWriter;

/// Boxed future produced by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Alias for asynchronous pipeline handlers.
///
/// A `Handler` is an `Arc` to a function returning a boxed future, so one
/// registration can service many concurrent requests. Handlers write their
/// response through [`Context::writer`]; an unrecoverable failure is a
/// panic, captured at the task boundary by the guard.
pub type Handler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync>;

/// Adapt an async closure to the [`Handler`] shape.
///
/// # Examples
///
/// ```
/// use backstop::context::handler_fn;
///
/// let handler = handler_fn(|ctx| async move {
///     ctx.writer().write_header(204);
/// });
/// # drop(handler);
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Immutable request metadata, shared read-only across forks.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Build a head with empty request headers.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
        }
    }
}

/// Per-request execution context.
///
/// Cloning is shallow. Which fields are shared and which are per-fork:
///
/// - `head` — immutable, shared.
/// - abort flag — shared on purpose: it is the "stop further pipeline
///   stages" signal any fork may assert.
/// - cancellation token — shared on purpose: the guard cancels it when the
///   deadline fires so cooperative handlers can stop early.
/// - writer slot — per-fork; replaced by [`fork_with_writer`](Self::fork_with_writer).
#[derive(Clone)]
pub struct Context {
    head: Arc<RequestHead>,
    writer: Arc<dyn ResponseWriter>,
    aborted: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Context {
    /// Create a context for a fresh request writing to `writer`.
    pub fn new(head: RequestHead, writer: Arc<dyn ResponseWriter>) -> Self {
        Self {
            head: Arc::new(head),
            writer,
            aborted: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Request metadata.
    #[must_use]
    pub fn head(&self) -> &RequestHead { &self.head }

    /// The response writer this fork writes through.
    #[must_use]
    pub fn writer(&self) -> &dyn ResponseWriter { &*self.writer }

    pub(crate) fn writer_arc(&self) -> Arc<dyn ResponseWriter> { Arc::clone(&self.writer) }

    /// Shallow clone with an independent writer slot, sharing everything
    /// else with `self`.
    #[must_use]
    pub fn fork_with_writer(&self, writer: Arc<dyn ResponseWriter>) -> Self {
        Self {
            head: Arc::clone(&self.head),
            writer,
            aborted: Arc::clone(&self.aborted),
            cancel: self.cancel.clone(),
        }
    }

    /// Signal the enclosing pipeline to run no further stages.
    pub fn abort(&self) { self.aborted.store(true, Ordering::Release); }

    /// Whether a stage asked the pipeline to stop.
    #[must_use]
    pub fn is_aborted(&self) -> bool { self.aborted.load(Ordering::Acquire) }

    /// Deadline-linked cancellation token.
    ///
    /// Cancelled by the guard when the deadline fires; well-behaved
    /// long-running handlers select on it to end their work early.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken { self.cancel.clone() }

    pub(crate) fn cancel(&self) { self.cancel.cancel(); }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("head", &self.head)
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}
