//! Reachability and rewriting passes: the use registry, the enqueuer fixed
//! point, the tree pruner, and the lens-producing member-rebinding and
//! vertical class-merging passes.

pub mod enqueuer;
pub mod errors;
pub mod merging;
pub mod pruner;
pub mod rebinding;
pub mod registry;

#[cfg(test)]
mod testutil;

pub use enqueuer::{
    Enqueuer, EnqueuerConfig, FieldAccessInfo, KeptReason, LivenessView, ReflectiveIdioms,
    ShakeDiagnostic,
};
pub use errors::ShakeError;
pub use merging::{merge_classes, MergeResult};
pub use pruner::{prune_program, PruneResult};
pub use rebinding::rebind_members;
pub use registry::{trace_method, CollectingRegistry, TracedUse, UseRegistry};
