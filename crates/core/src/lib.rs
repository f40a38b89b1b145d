#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # tickloom-core
//!
//! Core types shared across all tickloom crates.
//!
//! This crate provides:
//! - The unified error taxonomy with an explicit [`ErrorKind`] per error
//! - Result extension traits for logging recovered failures

pub mod error;
pub mod result;

pub use error::{Error, ErrorKind};
pub use result::{Result, ResultExt};
