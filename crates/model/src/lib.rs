//! Program model for the dexshrink shrinker.
//!
//! Everything the pipeline reasons about passes through this crate: interned
//! references with identity semantics, class/member definitions, the
//! hierarchy index with Java-style resolution, and the graph lens stack that
//! later passes rewrite references through.

pub mod app_info;
pub mod code;
pub mod definitions;
pub mod errors;
pub mod factory;
pub mod flags;
pub mod item;
pub mod lens;
pub mod services;

pub use app_info::{
    AppInfo, FieldResolutionResult, MethodResolutionResult, ResolvedField, ResolvedMethod,
};
pub use code::{CallSite, CatchHandler, Code, Instruction, InvokeKind, MethodHandle};
pub use definitions::{
    AnnotationVisibility, ClassKind, ClassRef, DexAnnotation, DexClass, DexEncodedField,
    DexEncodedMethod, DexValue, InliningConstraint, OptimizationInfo, Origin,
};
pub use errors::ModelError;
pub use factory::{ItemFactory, WellKnownItems};
pub use flags::AccessFlags;
pub use item::{DexField, DexMethod, DexProto, DexString, DexType, ItemRef};
pub use lens::{GraphLens, MethodLookup, NestedLensBuilder, PrototypeChanges};
pub use services::{ServiceEntry, ServiceMapping};
