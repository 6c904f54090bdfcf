//! Aggregate state
//!
//! [`AggregateState`] is the immutable result of applying accepted
//! observations in arrival order. [`Aggregator`] owns the current state and
//! publishes one snapshot per accepted observation.
mod aggregator;
mod state;
pub use aggregator::*;
pub use state::*;
