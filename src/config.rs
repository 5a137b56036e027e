//! Guard configuration assembly.
//!
//! [`GuardBuilder`] collects per-guard settings — deadline, fallback
//! responder, wrapped handler, diagnostics mode, and the optional extended
//! timeout for matching paths — and produces an immutable
//! [`DeadlineGuard`](crate::guard::DeadlineGuard) that one route shares
//! across all of its requests.

use std::{sync::Arc, time::Duration};

use http::StatusCode;
use regex::Regex;
use thiserror::Error;

use crate::{
    context::{Handler, handler_fn},
    guard::DeadlineGuard,
    pool::BufferPool,
};

/// Deadline applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while assembling a guard.
///
/// These indicate programmer error and are surfaced at build time, never
/// retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No handler was supplied to wrap.
    #[error("a guarded handler is required")]
    MissingHandler,
    /// An extended-path pattern failed to compile.
    #[error("invalid extended-path pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Builder for [`DeadlineGuard`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use backstop::{context::handler_fn, guard::DeadlineGuard};
///
/// let guard = DeadlineGuard::builder()
///     .timeout(Duration::from_millis(200))
///     .handler(handler_fn(|ctx| async move {
///         ctx.writer().write_str("ok");
///     }))
///     .build()
///     .expect("valid configuration");
/// # drop(guard);
/// ```
pub struct GuardBuilder {
    timeout: Duration,
    extended_timeout: Option<Duration>,
    extended_paths: Vec<String>,
    handler: Option<Handler>,
    fallback: Handler,
    diagnostics: bool,
    pool: Option<Arc<BufferPool>>,
}

impl Default for GuardBuilder {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            extended_timeout: None,
            extended_paths: Vec::new(),
            handler: None,
            fallback: default_fallback(),
            diagnostics: false,
            pool: None,
        }
    }
}

impl GuardBuilder {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Maximum wall-clock duration granted to the wrapped handler.
    ///
    /// `Duration::ZERO` disables guarding entirely: the handler runs with
    /// the real writer and no race. This is a contract, not an error.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deadline substituted for requests whose path matches one of the
    /// [`extended_paths`](Self::extended_paths) patterns.
    #[must_use]
    pub fn extended_timeout(mut self, timeout: Duration) -> Self {
        self.extended_timeout = Some(timeout);
        self
    }

    /// Regular expressions selecting paths that receive the extended
    /// timeout. Without an extended timeout these have no effect.
    #[must_use]
    pub fn extended_paths<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extended_paths = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// The unit of work to guard. Required.
    #[must_use]
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Responder invoked against the real writer when the deadline fires
    /// before headers commit. Defaults to `408` with the canonical reason
    /// phrase as the body.
    #[must_use]
    pub fn fallback(mut self, fallback: Handler) -> Self {
        self.fallback = fallback;
        self
    }

    /// Render captured handler panics inline as a `500` with message and
    /// backtrace instead of re-surfacing them. For local debugging only.
    #[must_use]
    pub fn diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    /// Share an existing buffer pool instead of creating one per guard.
    #[must_use]
    pub fn buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Assemble the guard.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingHandler`] when no handler was supplied
    /// and [`ConfigError::InvalidPattern`] when an extended-path pattern
    /// fails to compile.
    pub fn build(self) -> Result<DeadlineGuard, ConfigError> {
        let handler = self.handler.ok_or(ConfigError::MissingHandler)?;
        let extended_paths = self
            .extended_paths
            .into_iter()
            .map(|pattern| {
                Regex::new(&pattern).map_err(|source| ConfigError::InvalidPattern { pattern, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DeadlineGuard::assemble(
            self.timeout,
            self.extended_timeout,
            extended_paths,
            handler,
            self.fallback,
            self.diagnostics,
            self.pool.unwrap_or_default(),
        ))
    }
}

/// `408` plus the canonical reason phrase, the wire contract on timeout
/// when no custom fallback is configured.
fn default_fallback() -> Handler {
    handler_fn(|ctx| async move {
        let status = StatusCode::REQUEST_TIMEOUT;
        ctx.writer().write_header(status.as_u16());
        ctx.writer()
            .write_str(status.canonical_reason().unwrap_or("Request Timeout"));
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Handler { handler_fn(|_ctx| async {}) }

    #[test]
    fn missing_handler_is_a_configuration_error() {
        let err = GuardBuilder::new().build().expect_err("handler is required");
        assert!(matches!(err, ConfigError::MissingHandler));
    }

    #[test]
    fn invalid_extended_path_pattern_is_reported() {
        let err = GuardBuilder::new()
            .handler(noop())
            .extended_timeout(Duration::from_secs(10))
            .extended_paths(["([unclosed"])
            .build()
            .expect_err("pattern must fail to compile");
        assert!(matches!(err, ConfigError::InvalidPattern { pattern, .. } if pattern == "([unclosed"));
    }

    #[test]
    fn defaults_apply() {
        let guard = GuardBuilder::new().handler(noop()).build().expect("valid");
        assert_eq!(guard.timeout(), DEFAULT_TIMEOUT);
    }
}
