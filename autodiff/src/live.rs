//! Live-allocation accounting for derivative-bearing values.
//!
//! Every value that a linear map captures for its backward pass (block
//! records, [`Tracked`](crate::Tracked) scalars) owns a [`LiveToken`].
//! Creating or cloning a token increments a thread-local counter and
//! dropping it decrements the counter, so a computation that neither
//! leaks nor double-releases leaves the counter where it started.
//!
//! ```
//! use autodiff::live::{live_allocations, with_leak_checking, LiveToken};
//!
//! with_leak_checking(|| {
//!     let token = LiveToken::new();
//!     let copy = token.clone();
//!     assert!(live_allocations() >= 2);
//!     drop((token, copy));
//! });
//! ```

use std::cell::Cell;

thread_local! {
    static LIVE: Cell<isize> = const { Cell::new(0) };
}

/// A counted allocation marker.
#[derive(Debug)]
pub struct LiveToken(());

impl LiveToken {
    /// Registers a new live allocation.
    pub fn new() -> Self {
        LIVE.with(|live| live.set(live.get() + 1));
        LiveToken(())
    }
}

impl Default for LiveToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for LiveToken {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        LIVE.with(|live| live.set(live.get() - 1));
    }
}

/// Number of [`LiveToken`]s currently alive on this thread.
pub fn live_allocations() -> isize {
    LIVE.with(Cell::get)
}

/// Runs `body` and asserts it released exactly what it allocated.
///
/// # Panics
///
/// Panics if the live-allocation count after `body` differs from the
/// count before it: a positive difference is a leak, a negative one a
/// double release.
pub fn with_leak_checking<R>(body: impl FnOnce() -> R) -> R {
    let before = live_allocations();
    let result = body();
    let after = live_allocations();
    assert_eq!(
        after - before,
        0,
        "{} live allocations leaked (before: {before}, after: {after})",
        after - before
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_counted() {
        let before = live_allocations();
        let a = LiveToken::new();
        let b = a.clone();
        assert_eq!(live_allocations(), before + 2);
        drop(a);
        assert_eq!(live_allocations(), before + 1);
        drop(b);
        assert_eq!(live_allocations(), before);
    }

    #[test]
    #[should_panic(expected = "live allocations leaked")]
    fn leaks_are_reported() {
        with_leak_checking(|| std::mem::forget(LiveToken::new()));
    }

    #[test]
    fn returned_values_pass_through() {
        let value = with_leak_checking(|| {
            let _token = LiveToken::new();
            42
        });
        assert_eq!(value, 42);
    }
}
