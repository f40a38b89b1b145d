//! Result type definition and extension traits.
//!
//! Provides combinators for batches that tolerate individual failures
//! without unwrap/expect/panic.

use crate::error::Error;

/// The standard Result type for tickloom operations.
///
/// # Examples
///
/// ```ignore
/// fn operation() -> Result<WorkId> {
///     let config = RuntimeConfig::load("tickloom.toml")?;
///     config.validate()?;
///     orchestrator.submit(item, work)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logging combinators for Results.
pub trait ResultExt<T> {
    /// Inspect the error without consuming the Result.
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
