#![doc(html_root_url = "https://docs.rs/backstop/latest")]
//! Public API for the `backstop` library.
//!
//! `backstop` is a request-scoped execution guard for asynchronous handler
//! pipelines: it runs a wrapped handler on its own task, races it against a
//! wall-clock deadline, and guarantees the client receives either the
//! handler's complete buffered response or a deterministic timeout
//! response — never a mixture, and never late bytes from work that is still
//! finishing in the background.
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use backstop::{
//!     context::{Context, RequestHead, handler_fn},
//!     guard::DeadlineGuard,
//!     writer::SinkWriter,
//! };
//! use http::Method;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let guard = DeadlineGuard::builder()
//!     .timeout(Duration::from_secs(1))
//!     .handler(handler_fn(|ctx| async move {
//!         ctx.writer().write_str("ok");
//!     }))
//!     .build()
//!     .expect("valid configuration");
//!
//! let sink = Arc::new(SinkWriter::new());
//! let ctx = Context::new(RequestHead::new(Method::GET, "/ping"), sink.clone());
//! guard.handle(ctx).await;
//! assert_eq!(&sink.body()[..], b"ok");
//! # }
//! ```

pub mod config;
pub mod context;
pub mod fault;
pub mod guard;
pub mod pool;
pub mod writer;

pub use config::{ConfigError, DEFAULT_TIMEOUT, GuardBuilder};
pub use context::{Context, Handler, HandlerFuture, RequestHead, handler_fn};
pub use fault::Fault;
pub use guard::{DeadlineGuard, RaceOutcome};
pub use pool::BufferPool;
pub use writer::{ResponseWriter, ShadowWriter, SinkWriter};
