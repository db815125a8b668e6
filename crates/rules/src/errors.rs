//! Errors returned by this crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while parsing or applying keep rules.
#[derive(Error, Debug)]
pub enum RuleError {
    /// The rule text cannot be parsed.
    #[error("can't parse rules at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A pattern inside a rule has no syntactic meaning.
    #[error("invalid pattern '{0}'")]
    InvalidPattern(String),

    /// An `-if` directive without a following keep rule.
    #[error("-if at line {line} is not followed by a keep rule")]
    DanglingIf { line: usize },

    /// An included rule file cannot be read.
    #[error("can't read rule file {path}")]
    Include {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Include chains deeper than the supported nesting.
    #[error("rule includes nested too deep at {0}")]
    IncludeDepth(PathBuf),
}
