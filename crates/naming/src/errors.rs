//! Errors returned by this crate.

use thiserror::Error;

/// Errors raised while computing or applying renamings.
#[derive(Error, Debug)]
pub enum NamingError {
    /// An applied mapping assigns two different originals the same new name
    /// inside one namespace.
    #[error("applied mapping maps both {first} and {second} to '{name}'")]
    MappingConflict {
        first: String,
        second: String,
        name: String,
    },

    /// A mapping file line that cannot be parsed.
    #[error("can't parse mapping at line {line}: {message}")]
    MappingParse { line: usize, message: String },

    /// A mapping file that cannot be read.
    #[error("can't read mapping file")]
    MappingRead(#[from] std::io::Error),

    /// A renamed descriptor failed to intern; indicates a generator bug.
    #[error("generated an invalid descriptor: {0}")]
    InvalidGenerated(String),
}
