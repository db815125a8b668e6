use std::sync::Arc;

use ahash::AHashMap;

use crate::code::InvokeKind;
use crate::item::{DexField, DexMethod, DexType};

/// Signature delta a lens records for a rewritten method, so that
/// invocation-site rewriters can adjust arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrototypeChanges {
    /// Indices into the original parameter list, sorted ascending.
    pub removed_arguments: Vec<usize>,
    pub appended_arguments: Vec<DexType>,
}

impl PrototypeChanges {
    pub fn is_empty(&self) -> bool {
        self.removed_arguments.is_empty() && self.appended_arguments.is_empty()
    }

    /// Chains a later delta after this one. Removed indices of the later
    /// delta are interpreted against the original parameter order.
    pub fn compose(&self, later: &PrototypeChanges) -> PrototypeChanges {
        if self.is_empty() {
            return later.clone();
        }
        if later.is_empty() {
            return self.clone();
        }
        let mut removed = self.removed_arguments.clone();
        removed.extend(&later.removed_arguments);
        removed.sort_unstable();
        removed.dedup();
        let mut appended = self.appended_arguments.clone();
        appended.extend(later.appended_arguments.iter().cloned());
        PrototypeChanges {
            removed_arguments: removed,
            appended_arguments: appended,
        }
    }
}

/// Result of looking up a method through a lens.
#[derive(Debug, Clone)]
pub struct MethodLookup {
    pub method: DexMethod,
    pub invoke_kind: InvokeKind,
    pub prototype_changes: PrototypeChanges,
}

/// A composable reference rewriter.
///
/// Every pass after tree-pruning reads the program through the current lens;
/// later lenses see references already rewritten by earlier ones. Lenses are
/// immutable after construction and cheap to clone.
#[derive(Clone)]
pub enum GraphLens {
    Identity,
    Nested(Arc<NestedLens>),
}

impl GraphLens {
    pub fn identity() -> GraphLens {
        GraphLens::Identity
    }

    pub fn nested(previous: GraphLens) -> NestedLensBuilder {
        NestedLensBuilder::new(previous)
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, GraphLens::Identity)
    }

    pub fn lookup_type(&self, ty: &DexType) -> DexType {
        match self {
            GraphLens::Identity => ty.clone(),
            GraphLens::Nested(lens) => {
                let previous = lens.previous.lookup_type(ty);
                lens.type_map.get(&previous).cloned().unwrap_or(previous)
            }
        }
    }

    pub fn lookup_field(&self, field: &DexField) -> DexField {
        match self {
            GraphLens::Identity => field.clone(),
            GraphLens::Nested(lens) => {
                let previous = lens.previous.lookup_field(field);
                lens.field_map.get(&previous).cloned().unwrap_or(previous)
            }
        }
    }

    /// Rewrites a method reference for an invocation site. `context` is the
    /// calling method after rewriting; lenses produced by this crate do not
    /// depend on it, but the parameter is part of the contract so that
    /// optimization passes can.
    pub fn lookup_method(
        &self,
        method: &DexMethod,
        _context: Option<&DexMethod>,
        invoke_kind: InvokeKind,
    ) -> MethodLookup {
        let (method, kind_override, prototype_changes) = self.lookup_method_internal(method);
        MethodLookup {
            method,
            invoke_kind: kind_override.unwrap_or(invoke_kind),
            prototype_changes,
        }
    }

    pub fn lookup_prototype_changes(&self, method: &DexMethod) -> PrototypeChanges {
        self.lookup_method_internal(method).2
    }

    fn lookup_method_internal(
        &self,
        method: &DexMethod,
    ) -> (DexMethod, Option<InvokeKind>, PrototypeChanges) {
        match self {
            GraphLens::Identity => (method.clone(), None, PrototypeChanges::default()),
            GraphLens::Nested(lens) => {
                let (previous, prev_kind, prev_changes) =
                    lens.previous.lookup_method_internal(method);
                let current = lens
                    .method_map
                    .get(&previous)
                    .cloned()
                    .unwrap_or(previous);
                let kind = lens.invoke_kind_map.get(&current).copied().or(prev_kind);
                let changes = match lens.prototype_changes.get(&current) {
                    Some(own) => prev_changes.compose(own),
                    None => prev_changes,
                };
                (current, kind, changes)
            }
        }
    }

    /// True iff method lookup does not depend on the caller. Required of the
    /// composed lens before the final writer runs.
    pub fn is_context_free_for_methods(&self) -> bool {
        match self {
            GraphLens::Identity => true,
            GraphLens::Nested(lens) => {
                lens.context_free && lens.previous.is_context_free_for_methods()
            }
        }
    }
}

/// Delta maps applied on top of a previous lens.
pub struct NestedLens {
    previous: GraphLens,
    type_map: AHashMap<DexType, DexType>,
    field_map: AHashMap<DexField, DexField>,
    method_map: AHashMap<DexMethod, DexMethod>,
    /// Keyed by the rewritten method reference.
    prototype_changes: AHashMap<DexMethod, PrototypeChanges>,
    /// Keyed by the rewritten method reference.
    invoke_kind_map: AHashMap<DexMethod, InvokeKind>,
    context_free: bool,
}

pub struct NestedLensBuilder {
    previous: GraphLens,
    type_map: AHashMap<DexType, DexType>,
    field_map: AHashMap<DexField, DexField>,
    method_map: AHashMap<DexMethod, DexMethod>,
    prototype_changes: AHashMap<DexMethod, PrototypeChanges>,
    invoke_kind_map: AHashMap<DexMethod, InvokeKind>,
    context_free: bool,
}

impl NestedLensBuilder {
    fn new(previous: GraphLens) -> NestedLensBuilder {
        NestedLensBuilder {
            previous,
            type_map: AHashMap::new(),
            field_map: AHashMap::new(),
            method_map: AHashMap::new(),
            prototype_changes: AHashMap::new(),
            invoke_kind_map: AHashMap::new(),
            context_free: true,
        }
    }

    pub fn map_type(mut self, from: DexType, to: DexType) -> Self {
        if from != to {
            self.type_map.insert(from, to);
        }
        self
    }

    pub fn map_field(mut self, from: DexField, to: DexField) -> Self {
        if from != to {
            self.field_map.insert(from, to);
        }
        self
    }

    pub fn map_method(mut self, from: DexMethod, to: DexMethod) -> Self {
        if from != to {
            self.method_map.insert(from, to);
        }
        self
    }

    /// Records that call sites of `method` (already rewritten) must use a
    /// different invoke kind, e.g. virtual turned direct after merging.
    pub fn set_invoke_kind(mut self, method: DexMethod, kind: InvokeKind) -> Self {
        self.invoke_kind_map.insert(method, kind);
        self
    }

    pub fn set_prototype_changes(mut self, method: DexMethod, changes: PrototypeChanges) -> Self {
        if !changes.is_empty() {
            self.prototype_changes.insert(method, changes);
        }
        self
    }

    pub fn mark_context_sensitive(mut self) -> Self {
        self.context_free = false;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.type_map.is_empty()
            && self.field_map.is_empty()
            && self.method_map.is_empty()
            && self.prototype_changes.is_empty()
            && self.invoke_kind_map.is_empty()
    }

    /// Builds the lens. Mapped-to values are collapsed through the delta
    /// maps so that lookups are idempotent: no value remains that is itself
    /// a key.
    pub fn build(mut self) -> GraphLens {
        if self.is_empty() {
            return self.previous;
        }
        collapse(&mut self.type_map);
        collapse(&mut self.field_map);
        collapse(&mut self.method_map);
        GraphLens::Nested(Arc::new(NestedLens {
            previous: self.previous,
            type_map: self.type_map,
            field_map: self.field_map,
            method_map: self.method_map,
            prototype_changes: self.prototype_changes,
            invoke_kind_map: self.invoke_kind_map,
            context_free: self.context_free,
        }))
    }
}

fn collapse<K>(map: &mut AHashMap<K, K>)
where
    K: Clone + Eq + std::hash::Hash,
{
    let keys: Vec<K> = map.keys().cloned().collect();
    for key in keys {
        let mut target = map[&key].clone();
        let mut hops = 0;
        while let Some(next) = map.get(&target) {
            target = next.clone();
            hops += 1;
            // a cycle here means the pass built a bad delta; stop rather
            // than spin
            if hops > map.len() {
                break;
            }
        }
        map.insert(key, target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ItemFactory;

    #[test]
    fn identity_returns_input() {
        let factory = ItemFactory::new();
        let ty = factory.create_type("LA;").unwrap();
        let lens = GraphLens::identity();
        assert_eq!(lens.lookup_type(&ty), ty);
        assert!(lens.is_context_free_for_methods());
    }

    #[test]
    fn nested_applies_delta_over_previous() {
        let factory = ItemFactory::new();
        let a = factory.create_type("LA;").unwrap();
        let b = factory.create_type("LB;").unwrap();
        let c = factory.create_type("LC;").unwrap();

        let first = GraphLens::nested(GraphLens::identity())
            .map_type(a.clone(), b.clone())
            .build();
        let second = GraphLens::nested(first).map_type(b.clone(), c.clone()).build();

        assert_eq!(second.lookup_type(&a), c);
        assert_eq!(second.lookup_type(&b), c);
    }

    #[test]
    fn lookup_is_idempotent() {
        let factory = ItemFactory::new();
        let a = factory.create_type("LA;").unwrap();
        let b = factory.create_type("LB;").unwrap();
        let c = factory.create_type("LC;").unwrap();

        // a -> b and b -> c in one delta collapses to a -> c, b -> c
        let lens = GraphLens::nested(GraphLens::identity())
            .map_type(a.clone(), b.clone())
            .map_type(b.clone(), c.clone())
            .build();

        let once = lens.lookup_type(&a);
        let twice = lens.lookup_type(&once);
        assert_eq!(once, twice);
        assert_eq!(once, c);
    }

    #[test]
    fn invoke_kind_override_applies() {
        let factory = ItemFactory::new();
        let a = factory.create_type("LA;").unwrap();
        let void = factory.create_type("V").unwrap();
        let proto = factory.create_proto(void, &[]).unwrap();
        let from = factory.create_method(a.clone(), "m", proto.clone());
        let to = factory.create_method(a, "m$merged", proto);

        let lens = GraphLens::nested(GraphLens::identity())
            .map_method(from.clone(), to.clone())
            .set_invoke_kind(to.clone(), InvokeKind::Direct)
            .build();

        let lookup = lens.lookup_method(&from, None, InvokeKind::Virtual);
        assert_eq!(lookup.method, to);
        assert_eq!(lookup.invoke_kind, InvokeKind::Direct);
    }

    #[test]
    fn prototype_changes_compose_along_chain() {
        let factory = ItemFactory::new();
        let a = factory.create_type("LA;").unwrap();
        let int = factory.create_type("I").unwrap();
        let void = factory.create_type("V").unwrap();
        let proto = factory
            .create_proto(void, &[int.clone(), int.clone()])
            .unwrap();
        let m0 = factory.create_method(a.clone(), "m", proto.clone());
        let m1 = factory.create_method(a.clone(), "m$1", proto.clone());
        let m2 = factory.create_method(a, "m$2", proto);

        let first = GraphLens::nested(GraphLens::identity())
            .map_method(m0.clone(), m1.clone())
            .set_prototype_changes(
                m1.clone(),
                PrototypeChanges {
                    removed_arguments: vec![0],
                    appended_arguments: Vec::new(),
                },
            )
            .build();
        let second = GraphLens::nested(first)
            .map_method(m1, m2.clone())
            .set_prototype_changes(
                m2.clone(),
                PrototypeChanges {
                    removed_arguments: vec![1],
                    appended_arguments: vec![int],
                },
            )
            .build();

        let changes = second.lookup_prototype_changes(&m0);
        assert_eq!(changes.removed_arguments, vec![0, 1]);
        assert_eq!(changes.appended_arguments.len(), 1);
        assert_eq!(second.lookup_method(&m0, None, InvokeKind::Virtual).method, m2);
    }

    #[test]
    fn empty_builder_returns_previous() {
        let lens = GraphLens::nested(GraphLens::identity()).build();
        assert!(lens.is_identity());
    }
}
