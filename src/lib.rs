#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # tickloom
//!
//! Command-line adapter over the orchestrator core, with two demo agents.
//!
//! This library re-exports the workspace crates for convenience.

pub use orchestrator;
pub use tickloom_core;
pub use tickloom_events;

pub mod cli;
pub mod commands;
pub mod demo;
