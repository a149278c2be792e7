//! Turning panics in user code into reportable errors.
//!
//! Hub methods and lifecycle hooks are user code running on the
//! connection's tasks. A panic there must fail one invocation, not take the
//! connection or the server down.

use std::{any::Any, fmt, future::Future, panic::AssertUnwindSafe};

use futures::FutureExt;

/// Displayable panic payload.
///
/// ```
/// use hubframe::panic::format_panic;
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert_eq!(format_panic(Box::new(String::from("boom"))).to_string(), "boom");
/// assert_eq!(format_panic(Box::new(5_u32)).to_string(), "non-string panic payload");
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            f.write_str("non-string panic payload")
        }
    }
}

/// Wrap a payload caught by `catch_unwind`.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }

/// Run `future`, converting a panic into a [`PanicMessage`].
///
/// # Errors
///
/// Returns the panic payload if `future` panicked while being polled.
pub async fn catch_panic<F>(future: F) -> Result<F::Output, PanicMessage>
where
    F: Future,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(format_panic)
}
