//! Errors returned by this crate.

use dexshrink_model::ModelError;
use dexshrink_naming::NamingError;
use dexshrink_rules::RuleError;
use dexshrink_shake::ShakeError;
use thiserror::Error;

/// Fatal failures of a shrink run, raised at stage boundaries.
#[derive(Error, Debug)]
pub enum ShrinkError {
    /// Malformed input: illegal descriptor, self-inheritance, duplicate
    /// members or classes.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ModelError),

    /// A rule that cannot be parsed or applied.
    #[error("invalid rule: {0}")]
    InvalidRule(#[from] RuleError),

    /// A renaming failure, e.g. an `-applymapping` conflict.
    #[error("renaming failed: {0}")]
    Naming(#[from] NamingError),

    /// Unresolved references that were not suppressed by `-dontwarn` or
    /// `ignore_missing_classes`.
    #[error("{count} unresolved references, first: {first}")]
    MissingClasses { count: usize, first: String },

    /// Structural resolution failures found during tracing, fatal unless
    /// `force_compatibility` downgrades them.
    #[error("{count} resolution failures, first: {first}")]
    ResolutionFailures { count: usize, first: String },

    /// An element named under `-checkdiscard` survived tree-pruning.
    #[error("-checkdiscard failed for {} references, first: {}", .survivors.len(), .survivors.first().map(String::as_str).unwrap_or(""))]
    CheckDiscardFailed { survivors: Vec<String> },

    /// The cooperative cancel flag was raised.
    #[error("shrinking cancelled")]
    Cancelled,

    /// An invariant assertion failed; indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),

    /// Writing an output artifact failed.
    #[error("can't write output")]
    Io(#[from] std::io::Error),

    /// Invalid configuration detected during `Options::validate`.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl From<ShakeError> for ShrinkError {
    fn from(error: ShakeError) -> Self {
        match error {
            ShakeError::Cancelled => ShrinkError::Cancelled,
        }
    }
}
