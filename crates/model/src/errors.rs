//! Errors returned by this crate.

use thiserror::Error;

use crate::item::DexType;

/// Errors raised while building or indexing the program model.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A created descriptor is syntactically malformed.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// A class names itself as supertype or interface.
    #[error("class {0} inherits from itself")]
    SelfInheritance(DexType),

    /// Two members of one class share a reference.
    #[error("duplicate member {member}")]
    DuplicateMember { member: String },

    /// A member declares a holder other than its containing class.
    #[error("member {member} does not declare {class} as holder")]
    WrongHolder { member: String, class: DexType },

    /// Two definitions were supplied for the same type.
    #[error("duplicate definition for {0}")]
    DuplicateClass(DexType),
}
