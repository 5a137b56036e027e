//! Response writers: the seam between the guard, the wrapped handler, and
//! the real output.
//!
//! [`ResponseWriter`] is the object-safe writer contract the pipeline hands
//! to handlers. [`SinkWriter`] is the terminal implementation standing for
//! the real output head. [`ShadowWriter`] is the buffering stand-in the
//! guard installs during the race window: it stages status, headers, and
//! body in memory so the guard can later commit them atomically or discard
//! them in favour of the fallback response.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};

/// Reject status codes outside the range HTTP can carry.
///
/// An out-of-range code is a programmer error in the wrapped handler and is
/// reported loudly rather than clamped.
fn check_status(status: u16) {
    assert!(
        (100..=999).contains(&status),
        "invalid HTTP status code: {status}"
    );
}

/// Writer contract handlers and the pipeline write responses through.
///
/// All methods take `&self`: writer instances are shared between the
/// foreground race and the background handler task, so every implementation
/// guards its mutable state internally.
pub trait ResponseWriter: Send + Sync {
    /// Record the response status. The first writer wins; later calls are
    /// ignored.
    ///
    /// # Panics
    ///
    /// Panics when `status` is outside `100..=999`.
    fn write_header(&self, status: u16);

    /// Append body bytes, returning how many were accepted. A silenced
    /// writer accepts zero bytes without error.
    fn write(&self, data: &[u8]) -> usize;

    /// Convenience for writing string content.
    fn write_str(&self, data: &str) -> usize { self.write(data.as_bytes()) }

    /// Set a header, replacing any previous values for the name.
    fn insert_header(&self, name: HeaderName, value: HeaderValue);

    /// Add a header value without displacing existing ones.
    fn append_header(&self, name: HeaderName, value: HeaderValue);

    /// Snapshot of the accumulated headers.
    fn headers(&self) -> HeaderMap;

    /// The response status, if one has been recorded.
    fn status(&self) -> Option<u16>;

    /// Whether status and headers have been physically committed to the
    /// real output, after which substitution is no longer possible.
    fn headers_written(&self) -> bool;

    /// Physically commit status and headers now instead of waiting for the
    /// race to resolve.
    ///
    /// Escape hatch for responses that must not be held back, such as
    /// redirects issued by inner middleware. A writer whose deadline has
    /// already fired ignores the call; a writer that commits through here
    /// can no longer be substituted by the timeout branch.
    fn commit_now(&self);
}

#[derive(Debug, Default)]
struct SinkState {
    status: Option<u16>,
    headers: HeaderMap,
    body: BytesMut,
    committed: bool,
}

/// Terminal writer representing the real output head.
///
/// Status and headers freeze on first commit; the first body write commits
/// an implicit `200` if no status was recorded, per standard HTTP
/// semantics. Embedders flush the finished response to their transport
/// after the pipeline returns; tests inspect it directly.
#[derive(Debug, Default)]
pub struct SinkWriter {
    state: Mutex<SinkState>,
}

impl SinkWriter {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Copy of the committed body.
    #[must_use]
    pub fn body(&self) -> Bytes {
        self.state.lock().expect("lock poisoned").body.clone().freeze()
    }
}

impl ResponseWriter for SinkWriter {
    fn write_header(&self, status: u16) {
        check_status(status);
        let mut state = self.state.lock().expect("lock poisoned");
        if state.committed {
            return;
        }
        state.status = Some(status);
        state.committed = true;
    }

    fn write(&self, data: &[u8]) -> usize {
        let mut state = self.state.lock().expect("lock poisoned");
        if !state.committed {
            state.status.get_or_insert(200);
            state.committed = true;
        }
        state.body.extend_from_slice(data);
        data.len()
    }

    fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.committed {
            return;
        }
        state.headers.insert(name, value);
    }

    fn append_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.committed {
            return;
        }
        state.headers.append(name, value);
    }

    fn headers(&self) -> HeaderMap { self.state.lock().expect("lock poisoned").headers.clone() }

    fn status(&self) -> Option<u16> { self.state.lock().expect("lock poisoned").status }

    fn headers_written(&self) -> bool { self.state.lock().expect("lock poisoned").committed }

    fn commit_now(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.committed {
            return;
        }
        state.status.get_or_insert(200);
        state.committed = true;
    }
}

#[derive(Debug)]
struct ShadowState {
    /// Staging buffer borrowed from the pool; `None` once released.
    body: Option<BytesMut>,
    headers: HeaderMap,
    status: Option<u16>,
    timed_out: bool,
}

/// Buffering stand-in for the real writer during the race window.
///
/// Writes land in a pooled staging buffer instead of the real output. Once
/// the guard marks the writer timed out, further writes and header changes
/// are dropped silently so late output from the still-running handler can
/// never corrupt the response already sent to the client.
pub struct ShadowWriter {
    real: Arc<dyn ResponseWriter>,
    state: Mutex<ShadowState>,
}

impl ShadowWriter {
    /// Wrap `real`, staging body bytes in `buffer`.
    pub fn new(real: Arc<dyn ResponseWriter>, buffer: BytesMut) -> Self {
        Self {
            real,
            state: Mutex::new(ShadowState {
                body: Some(buffer),
                headers: HeaderMap::new(),
                status: None,
                timed_out: false,
            }),
        }
    }

    /// Commit the staged response to the real writer and hand back the
    /// staging buffer for return to the pool.
    ///
    /// The cached status (default `200`) and headers are skipped when
    /// [`commit_now`](Self::commit_now) already committed them.
    pub(crate) fn flush(&self) -> Option<BytesMut> {
        let mut state = self.state.lock().expect("lock poisoned");
        for (name, value) in &state.headers {
            self.real.append_header(name.clone(), value.clone());
        }
        self.real.write_header(state.status.unwrap_or(200));
        let body = state.body.take()?;
        self.real.write(&body);
        Some(body)
    }

    /// Mark the writer timed out and take the staging buffer.
    ///
    /// Returns the buffer (if not already released) and whether headers had
    /// already been physically committed to the real output — read under
    /// the same lock `commit_now` takes, which makes the lock the
    /// authoritative tie-break between a late commit and the deadline.
    pub(crate) fn silence(&self) -> (Option<BytesMut>, bool) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.timed_out = true;
        (state.body.take(), self.real.headers_written())
    }

    /// Take the staging buffer without committing anything, for the fault
    /// path.
    pub(crate) fn release(&self) -> Option<BytesMut> {
        self.state.lock().expect("lock poisoned").body.take()
    }
}

impl ResponseWriter for ShadowWriter {
    fn write_header(&self, status: u16) {
        check_status(status);
        let mut state = self.state.lock().expect("lock poisoned");
        if state.timed_out || state.status.is_some() {
            return;
        }
        state.status = Some(status);
    }

    fn write(&self, data: &[u8]) -> usize {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.timed_out {
            return 0;
        }
        match state.body.as_mut() {
            Some(body) => {
                body.extend_from_slice(data);
                data.len()
            }
            None => 0,
        }
    }

    fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.timed_out {
            return;
        }
        state.headers.insert(name, value);
    }

    fn append_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.timed_out {
            return;
        }
        state.headers.append(name, value);
    }

    fn headers(&self) -> HeaderMap { self.state.lock().expect("lock poisoned").headers.clone() }

    /// The cached status when one was recorded before any timeout;
    /// otherwise the real writer's, so instrumentation wrapping the guard
    /// observes the true final status.
    fn status(&self) -> Option<u16> {
        let state = self.state.lock().expect("lock poisoned");
        if state.timed_out {
            return self.real.status();
        }
        state.status.or_else(|| self.real.status())
    }

    fn headers_written(&self) -> bool { self.real.headers_written() }

    /// Copy cached headers and the cached (or default `200`) status to the
    /// real writer immediately. Body bytes continue to be staged.
    ///
    /// This and the guard's timeout branch serialise on the same lock: once
    /// the deadline has marked the writer timed out this is a no-op, and
    /// once this has committed, the timeout branch observes the committed
    /// headers and skips substitution.
    fn commit_now(&self) {
        let state = self.state.lock().expect("lock poisoned");
        if state.timed_out || self.real.headers_written() {
            return;
        }
        for (name, value) in &state.headers {
            self.real.append_header(name.clone(), value.clone());
        }
        self.real.write_header(state.status.unwrap_or(200));
    }
}
