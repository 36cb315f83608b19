//! A readiness reactor and named dispatch queues.
//!
//! [`Reactor`] runs one dedicated OS thread that multiplexes a dynamic set
//! of raw file descriptors via the OS's level-triggered readiness
//! mechanism. Callers register a `(fd, interest)` pair with a callback;
//! the reactor invokes the callback — inline on its own thread, or
//! handed off to a named [`DispatchQueue`] — whenever the OS reports the
//! fd ready.
//!
//! Testable properties (see `SPEC_FULL.md` §8 for the numbered list this
//! crate's tests check against):
//! - **P1** — at most one entry exists per fd at any time; registering a
//!   second time for the same fd replaces the first.
//! - **P2** — a callback that re-registers its own fd during its own
//!   dispatch is not undone by that dispatch's auto-removal.
//! - **P3** — a replaced or removed callback is dropped exactly once.
//! - **P4** — a `register`/`unregister` call from any thread wakes the
//!   reactor thread promptly rather than waiting out its poll timeout.

mod interest;
mod queue;
mod reactor;

pub use interest::{Interest, WatchFlags};
pub use queue::DispatchQueue;
pub use reactor::{Callback, Reactor, WatchHandle};
