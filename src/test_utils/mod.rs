//! Shared helpers for unit tests
mod common;
mod observation_builder;

pub use common::*;
pub use observation_builder::*;
