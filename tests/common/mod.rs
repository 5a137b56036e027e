//! Shared utilities for integration tests.
//!
//! Provides fixtures for building request contexts backed by an
//! inspectable [`SinkWriter`] and a small catch-unwind recovery layer
//! mirroring what an enclosing pipeline would install above the guard.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{panic::AssertUnwindSafe, sync::Arc};

use backstop::{
    context::{Context, Handler, RequestHead},
    writer::SinkWriter,
};
use futures::FutureExt;
use http::Method;

/// A fresh GET request context writing to an inspectable sink.
pub fn request(path: &str) -> (Arc<SinkWriter>, Context) {
    let sink = Arc::new(SinkWriter::new());
    let ctx = Context::new(RequestHead::new(Method::GET, path), sink.clone());
    (sink, ctx)
}

/// Wrap `inner` with a recovery layer that answers `500` to any panic, the
/// way a centralised fault-recovery middleware would.
pub fn recovery_layer(inner: Handler) -> Handler {
    Arc::new(move |ctx: Context| {
        let inner = Arc::clone(&inner);
        Box::pin(async move {
            let outcome = AssertUnwindSafe(inner(ctx.clone())).catch_unwind().await;
            if outcome.is_err() {
                ctx.writer().write_header(500);
                ctx.writer().write_str("Internal Server Error");
            }
        })
    })
}
