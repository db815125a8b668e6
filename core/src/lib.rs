//! dexshrink: whole-program shrinker core for Android bytecode.
//!
//! The pipeline ingests an opaque class reader, computes the transitive set
//! of program elements reachable from keep-rule roots, prunes everything
//! else, rewrites references through a composable lens stack, renames the
//! survivors and hands the result to an external writer. Classfile and Dex
//! parsing/serialization live outside this workspace.

pub mod diagnostics;
pub mod errors;
pub mod options;
pub mod pipeline;
pub mod reader;
pub mod writer;

pub use diagnostics::{Diagnostic, Reporter, Severity};
pub use errors::ShrinkError;
pub use options::Options;
pub use pipeline::{Pipeline, ShrinkResult, ShrinkStats};
pub use reader::{decode_services, read_classes, AppReader, CollectionReader, DataEntry};
pub use writer::{emit_program, rewrite_class, ArtifactSink, CollectingConsumer, ProgramConsumer};

// the building blocks re-exported for front ends and tests
pub use dexshrink_model as model;
pub use dexshrink_naming as naming;
pub use dexshrink_rules as rules;
pub use dexshrink_shake as shake;
