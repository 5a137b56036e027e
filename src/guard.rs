//! The deadline guard: races a wrapped handler against a wall-clock timer
//! and decides, exactly once, what reaches the real output.
//!
//! On entry the guard borrows a staging buffer, installs a
//! [`ShadowWriter`] in place of the real writer, forks the request context
//! for the background task, and spawns the handler under
//! `catch_unwind`. The foreground then blocks on a three-way race between
//! the completion signal, the fault signal, and the deadline timer:
//!
//! - completion first: the staged status, headers, and body are committed
//!   to the real writer;
//! - fault first: the buffer is released and the panic is re-surfaced to
//!   the enclosing recovery layer (or rendered inline in diagnostics mode);
//! - timer first: the shadow writer is silenced, the cancellation token
//!   fires, the pipeline is told to stop, and the fallback responder writes
//!   the substitute response — unless headers were already physically
//!   committed, in which case only the outcome is recorded.
//!
//! The background task is never forcibly stopped. If it outlives the
//! decision, every write it attempts is discarded by the silenced shadow
//! writer; it can also end its work early by observing the context's
//! cancellation token.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use log::{debug, error, warn};
use regex::Regex;
use tokio::{sync::oneshot, time::sleep};

use crate::{
    config::GuardBuilder,
    context::{Context, Handler},
    fault::Fault,
    pool::BufferPool,
    writer::ShadowWriter,
};

/// Outcome of the three-way race. Exactly one occurs per guarded request.
#[derive(Debug)]
pub enum RaceOutcome {
    /// The handler finished before the deadline; its response was flushed.
    Completed,
    /// The handler panicked. Only returned in diagnostics mode — otherwise
    /// the panic is re-surfaced and [`DeadlineGuard::handle`] does not
    /// return.
    Faulted(Fault),
    /// The deadline fired first; the fallback response was substituted (or
    /// skipped, if headers had already been committed).
    TimedOut,
}

/// Request-scoped execution guard for a handler pipeline.
///
/// Immutable once built; one guard services all requests for its route.
/// See the [module docs](self) for the race semantics.
pub struct DeadlineGuard {
    timeout: Duration,
    extended_timeout: Option<Duration>,
    extended_paths: Vec<Regex>,
    handler: Handler,
    fallback: Handler,
    diagnostics: bool,
    pool: Arc<BufferPool>,
}

impl std::fmt::Debug for DeadlineGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineGuard")
            .field("timeout", &self.timeout)
            .field("extended_timeout", &self.extended_timeout)
            .field("extended_paths", &self.extended_paths)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}

impl DeadlineGuard {
    /// Start configuring a guard.
    #[must_use]
    pub fn builder() -> GuardBuilder { GuardBuilder::new() }

    pub(crate) fn assemble(
        timeout: Duration,
        extended_timeout: Option<Duration>,
        extended_paths: Vec<Regex>,
        handler: Handler,
        fallback: Handler,
        diagnostics: bool,
        pool: Arc<BufferPool>,
    ) -> Self {
        // Panic-site backtraces must be recorded before the first guarded
        // handler can unwind.
        crate::fault::install_panic_capture();
        Self {
            timeout,
            extended_timeout,
            extended_paths,
            handler,
            fallback,
            diagnostics,
            pool,
        }
    }

    /// The configured base deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration { self.timeout }

    /// Deadline for a specific request path, honouring the extended-path
    /// patterns when an extended timeout is configured.
    fn effective_timeout(&self, path: &str) -> Duration {
        match self.extended_timeout {
            Some(extended) if self.extended_paths.iter().any(|re| re.is_match(path)) => extended,
            _ => self.timeout,
        }
    }

    /// Guard one request.
    ///
    /// With a zero timeout this is a pure pass-through: the handler runs
    /// inline with the real writer and any panic propagates untouched.
    /// Otherwise the race runs as described in the [module docs](self).
    ///
    /// # Panics
    ///
    /// Re-surfaces the wrapped handler's panic when it faults and
    /// diagnostics mode is off, so the enclosing recovery layer can apply
    /// its policy.
    pub async fn handle(&self, ctx: Context) -> RaceOutcome {
        if self.timeout.is_zero() {
            (self.handler)(ctx).await;
            return RaceOutcome::Completed;
        }

        let deadline = self.effective_timeout(&ctx.head().path);
        let shadow = Arc::new(ShadowWriter::new(ctx.writer_arc(), self.pool.get()));
        let background = ctx.fork_with_writer(shadow.clone());

        let (done_tx, done_rx) = oneshot::channel::<()>();
        let (fault_tx, fault_rx) = oneshot::channel::<Fault>();
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            match AssertUnwindSafe(handler(background)).catch_unwind().await {
                Ok(()) => {
                    let _ = done_tx.send(());
                }
                Err(payload) => {
                    let _ = fault_tx.send(Fault::capture(payload));
                }
            }
        });

        // A signal observed first wins outright, even if another event
        // lands microseconds later; disabled branches (a dropped sender)
        // leave the timer as the backstop.
        tokio::select! {
            Ok(()) = done_rx => {
                self.flush(&ctx, &shadow);
                RaceOutcome::Completed
            }
            Ok(fault) = fault_rx => self.report(&ctx, &shadow, fault),
            () = sleep(deadline) => {
                self.substitute(&ctx, &shadow).await;
                RaceOutcome::TimedOut
            }
        }
    }

    /// Adapt a shared guard to the pipeline [`Handler`] shape.
    #[must_use]
    pub fn into_handler(self: Arc<Self>) -> Handler {
        Arc::new(move |ctx| {
            let guard = Arc::clone(&self);
            Box::pin(async move {
                guard.handle(ctx).await;
            })
        })
    }

    fn flush(&self, ctx: &Context, shadow: &ShadowWriter) {
        if let Some(buffer) = shadow.flush() {
            self.pool.put(buffer);
        }
        debug!(
            "handler completed before the deadline: path={}, status={:?}",
            ctx.head().path,
            ctx.writer().status()
        );
    }

    fn report(&self, ctx: &Context, shadow: &ShadowWriter, fault: Fault) -> RaceOutcome {
        if let Some(buffer) = shadow.release() {
            self.pool.put(buffer);
        }
        let message = fault.message();
        error!("guarded handler panicked: panic={message}, path={}", ctx.head().path);
        tracing::error!(panic = %message, path = %ctx.head().path, "guarded handler panicked");
        if self.diagnostics {
            let writer = ctx.writer();
            writer.write_header(500);
            writer.write_str(&format!("panic caught: {message}\n"));
            writer.write_str("panic stack trace:\n");
            writer.write_str(&fault.backtrace().to_string());
            RaceOutcome::Faulted(fault)
        } else {
            fault.resume()
        }
    }

    async fn substitute(&self, ctx: &Context, shadow: &ShadowWriter) {
        let (buffer, committed) = shadow.silence();
        if let Some(buffer) = buffer {
            self.pool.put(buffer);
        }
        ctx.cancel();
        ctx.abort();
        if committed {
            warn!(
                "deadline elapsed after headers were committed; skipping fallback: path={}",
                ctx.head().path
            );
            return;
        }
        warn!("deadline elapsed; substituting fallback response: path={}", ctx.head().path);
        (self.fallback)(ctx.clone()).await;
    }
}
