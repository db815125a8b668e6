//! Errors returned by this crate.

use thiserror::Error;

/// Errors raised by the reachability and rewriting passes.
#[derive(Error, Debug)]
pub enum ShakeError {
    /// The cooperative cancel flag was raised between units of work.
    #[error("shrinking cancelled")]
    Cancelled,
}
