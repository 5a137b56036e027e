//! Typed capture of handler panics crossing the task boundary.
//!
//! The guard runs its unit of work on a separate task; a panic there must
//! never cross that boundary implicitly. It is caught at the boundary and
//! turned into a [`Fault`] carrying the original payload, a readable
//! message, and a backtrace recorded at the panic site.
//!
//! By the time `catch_unwind` resolves, the panicking frames have already
//! unwound, so a backtrace taken there would show only runtime plumbing. A
//! process-wide panic hook (installed once, chained to the previous hook)
//! therefore stashes a backtrace in a thread-local while the panicking
//! stack is still live; [`Fault::capture`] drains that stash on the same
//! thread the unwind was caught on.

use std::{any::Any, backtrace::Backtrace, cell::RefCell, fmt, panic, sync::Once};

thread_local! {
    static PANIC_SITE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// Install the panic-site backtrace hook. Idempotent; chains to whatever
/// hook was already installed so panic reporting is unchanged.
pub(crate) fn install_panic_capture() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            PANIC_SITE.with(|slot| {
                *slot.borrow_mut() = Some(Backtrace::force_capture());
            });
            previous(info);
        }));
    });
}

fn take_panic_site() -> Option<Backtrace> { PANIC_SITE.with(|slot| slot.borrow_mut().take()) }

/// A captured handler panic.
///
/// The payload is downcast to `String` or `&'static str` when displayed and
/// falls back to a placeholder otherwise.
///
/// ```
/// use backstop::fault::Fault;
///
/// let fault = Fault::capture(Box::new("boom"));
/// assert_eq!(fault.message(), "boom");
/// ```
#[must_use]
pub struct Fault {
    payload: Box<dyn Any + Send>,
    backtrace: Backtrace,
}

impl Fault {
    /// Wrap a panic payload.
    ///
    /// Prefers the backtrace the panic hook stashed at the panic site;
    /// when none is pending (the hook is not installed, or the payload was
    /// built outside an unwind) one is captured here instead.
    pub fn capture(payload: Box<dyn Any + Send>) -> Self {
        Self {
            payload,
            backtrace: take_panic_site().unwrap_or_else(Backtrace::force_capture),
        }
    }

    /// Human-readable form of the panic payload.
    #[must_use]
    pub fn message(&self) -> String {
        if let Some(s) = self.payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else {
            "non-string panic payload".to_owned()
        }
    }

    /// Backtrace from the panic site.
    #[must_use]
    pub fn backtrace(&self) -> &Backtrace { &self.backtrace }

    /// Re-raise the original payload so an enclosing recovery layer sees
    /// exactly what the handler threw.
    pub fn resume(self) -> ! { std::panic::resume_unwind(self.payload) }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.message()) }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("message", &self.message())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_str_and_string_payloads() {
        assert_eq!(Fault::capture(Box::new("boom")).message(), "boom");
        assert_eq!(
            Fault::capture(Box::new(String::from("boom"))).message(),
            "boom"
        );
        assert_eq!(
            Fault::capture(Box::new(5_u32)).message(),
            "non-string panic payload"
        );
    }

    #[test]
    fn resume_rethrows_the_original_payload() {
        let fault = Fault::capture(Box::new("carried through"));
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || fault.resume()))
            .expect_err("resume must unwind");
        assert_eq!(caught.downcast_ref::<&str>(), Some(&"carried through"));
    }

    #[inline(never)]
    fn unwind_from_named_frame() { panic!("named site"); }

    #[test]
    fn backtrace_records_the_panic_site() {
        install_panic_capture();
        let payload = std::panic::catch_unwind(unwind_from_named_frame)
            .expect_err("the named frame must unwind");
        let fault = Fault::capture(payload);
        let rendered = fault.backtrace().to_string();
        assert!(
            rendered.contains("unwind_from_named_frame"),
            "panic-site frame missing from backtrace:\n{rendered}"
        );
    }
}
