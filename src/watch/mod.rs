//! Long-poll watch engine
//!
//! ```text
//!  WatchLoop(service:web) ──┐
//!  WatchLoop(key:cfg/flag) ─┼──► mpsc ──► MergedStream
//!  WatchLoop(prefix:app/) ──┘
//! ```
//!
//! Each [`WatchLoop`] runs in its own tokio task with exactly one fetch in
//! flight. [`merge`] starts the loops and owns their cancellation token.
mod merge;
mod watch_loop;
pub use merge::*;
pub use watch_loop::*;

#[cfg(test)]
mod merge_test;
