use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::definitions::{ClassRef, DexEncodedMethod};
use crate::errors::ModelError;
use crate::factory::ItemFactory;
use crate::flags::AccessFlags;
use crate::item::{DexField, DexMethod, DexType};

/// Successful method resolution: the class the definition was found on and
/// the definition's own reference.
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    pub class: ClassRef,
    pub method: DexMethod,
    pub access_flags: AccessFlags,
}

impl ResolvedMethod {
    pub fn definition<'a>(&'a self) -> Option<&'a DexEncodedMethod> {
        self.class.lookup_method(&self.method)
    }
}

/// Outcome of Java-style method resolution.
#[derive(Debug, Clone)]
pub enum MethodResolutionResult {
    Found(ResolvedMethod),
    /// The receiver or an intermediate class has no definition.
    ClassMissing(DexType),
    NoSuchMethod {
        receiver: DexType,
        method: DexMethod,
    },
    /// More than one maximally-specific non-abstract default method.
    AmbiguousDefault {
        method: DexMethod,
        candidates: Vec<DexMethod>,
    },
    /// Resolution succeeded but the context may not access the definition.
    Inaccessible {
        method: DexMethod,
        context: DexType,
    },
}

impl MethodResolutionResult {
    pub fn resolved(&self) -> Option<&ResolvedMethod> {
        match self {
            MethodResolutionResult::Found(resolved) => Some(resolved),
            _ => None,
        }
    }
}

/// Successful field resolution.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub class: ClassRef,
    pub field: DexField,
    pub access_flags: AccessFlags,
}

/// Outcome of field resolution.
#[derive(Debug, Clone)]
pub enum FieldResolutionResult {
    Found(ResolvedField),
    ClassMissing(DexType),
    NoSuchField {
        receiver: DexType,
        field: DexField,
    },
    Inaccessible {
        field: DexField,
        context: DexType,
    },
}

impl FieldResolutionResult {
    pub fn resolved(&self) -> Option<&ResolvedField> {
        match self {
            FieldResolutionResult::Found(resolved) => Some(resolved),
            _ => None,
        }
    }
}

/// Hierarchy index over program, classpath and library classes.
///
/// Built once per reachability round; lookups are read-only afterwards so
/// tracing can share it across workers.
pub struct AppInfo {
    factory: Arc<ItemFactory>,
    classes: AHashMap<DexType, ClassRef>,
    /// Direct `extends` and `implements` edges, parent to children.
    direct_subtypes: AHashMap<DexType, Vec<DexType>>,
}

impl AppInfo {
    pub fn build(
        factory: Arc<ItemFactory>,
        all_classes: impl IntoIterator<Item = ClassRef>,
    ) -> Result<AppInfo, ModelError> {
        let mut classes: AHashMap<DexType, ClassRef> = AHashMap::new();
        let mut direct_subtypes: AHashMap<DexType, Vec<DexType>> = AHashMap::new();

        for class in all_classes {
            let ty = class.class_type.clone();
            if classes.contains_key(&ty) {
                return Err(ModelError::DuplicateClass(ty));
            }
            if let Some(super_type) = &class.super_type {
                direct_subtypes
                    .entry(super_type.clone())
                    .or_default()
                    .push(ty.clone());
            }
            for interface in &class.interfaces {
                direct_subtypes
                    .entry(interface.clone())
                    .or_default()
                    .push(ty.clone());
            }
            classes.insert(ty, class);
        }

        for children in direct_subtypes.values_mut() {
            children.sort();
            children.dedup();
        }

        log::debug!("indexed {} classes", classes.len());

        Ok(AppInfo {
            factory,
            classes,
            direct_subtypes,
        })
    }

    #[inline]
    pub fn factory(&self) -> &Arc<ItemFactory> {
        &self.factory
    }

    /// Uniform lookup across program, classpath and library classes.
    #[inline]
    pub fn definition_for(&self, ty: &DexType) -> Option<&ClassRef> {
        self.classes.get(ty)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassRef> {
        self.classes.values()
    }

    pub fn program_classes(&self) -> impl Iterator<Item = &ClassRef> {
        self.classes.values().filter(|c| c.is_program())
    }

    /// Transitive subtypes of `ty`, not including `ty` itself.
    pub fn subtypes(&self, ty: &DexType) -> AHashSet<DexType> {
        let mut result = AHashSet::new();
        let mut worklist = vec![ty.clone()];
        while let Some(current) = worklist.pop() {
            if let Some(children) = self.direct_subtypes.get(&current) {
                for child in children {
                    if result.insert(child.clone()) {
                        worklist.push(child.clone());
                    }
                }
            }
        }
        result
    }

    /// Reflexive subtype test following super and interface edges.
    pub fn is_subtype(&self, sub: &DexType, sup: &DexType) -> bool {
        if sub == sup {
            return true;
        }
        let mut visited = AHashSet::new();
        let mut worklist = vec![sub.clone()];
        while let Some(current) = worklist.pop() {
            if &current == sup {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(class) = self.classes.get(&current) {
                if let Some(super_type) = &class.super_type {
                    worklist.push(super_type.clone());
                }
                worklist.extend(class.interfaces.iter().cloned());
            }
        }
        false
    }

    /// Java-style method resolution without an access check: the receiver
    /// class and its superclasses first, then maximally-specific
    /// superinterface methods.
    pub fn resolve_method(
        &self,
        receiver: &DexType,
        method: &DexMethod,
    ) -> MethodResolutionResult {
        if self.classes.get(receiver).is_none() {
            return MethodResolutionResult::ClassMissing(receiver.clone());
        }

        // class chain
        let mut current = Some(receiver.clone());
        while let Some(ty) = current {
            let Some(class) = self.classes.get(&ty) else {
                break;
            };
            if let Some(definition) = class.lookup_method(method) {
                return MethodResolutionResult::Found(ResolvedMethod {
                    class: class.clone(),
                    method: definition.method.clone(),
                    access_flags: definition.access_flags,
                });
            }
            current = class.super_type.clone();
        }

        // superinterfaces, maximally specific
        let mut candidates: Vec<ResolvedMethod> = Vec::new();
        for interface in self.all_superinterfaces(receiver) {
            let Some(class) = self.classes.get(&interface) else {
                continue;
            };
            if let Some(definition) = class.lookup_method(method) {
                if definition.access_flags.is_virtual() {
                    candidates.push(ResolvedMethod {
                        class: class.clone(),
                        method: definition.method.clone(),
                        access_flags: definition.access_flags,
                    });
                }
            }
        }

        if candidates.is_empty() {
            return MethodResolutionResult::NoSuchMethod {
                receiver: receiver.clone(),
                method: method.clone(),
            };
        }

        // A candidate is maximally specific when no other candidate's holder
        // is a strict subinterface of its holder.
        let maximal: Vec<ResolvedMethod> = candidates
            .iter()
            .filter(|c| {
                !candidates.iter().any(|d| {
                    d.method.holder() != c.method.holder()
                        && self.is_subtype(d.method.holder(), c.method.holder())
                })
            })
            .cloned()
            .collect();

        let mut non_abstract: Vec<ResolvedMethod> = maximal
            .iter()
            .filter(|c| !c.access_flags.is_abstract())
            .cloned()
            .collect();
        non_abstract.sort_by(|a, b| a.method.cmp(&b.method));

        match non_abstract.len() {
            1 => MethodResolutionResult::Found(non_abstract.remove(0)),
            0 => {
                // only abstract declarations survive; resolution still
                // succeeds, deterministically on the smallest reference
                let mut sorted: Vec<ResolvedMethod> = maximal;
                sorted.sort_by(|a, b| a.method.cmp(&b.method));
                MethodResolutionResult::Found(sorted.remove(0))
            }
            _ => MethodResolutionResult::AmbiguousDefault {
                method: method.clone(),
                candidates: non_abstract.into_iter().map(|c| c.method).collect(),
            },
        }
    }

    /// Resolution plus the accessibility check for the given context.
    pub fn resolve_method_in_context(
        &self,
        receiver: &DexType,
        method: &DexMethod,
        context: &DexType,
    ) -> MethodResolutionResult {
        match self.resolve_method(receiver, method) {
            MethodResolutionResult::Found(resolved) => {
                if self.is_member_accessible(
                    resolved.access_flags,
                    resolved.method.holder(),
                    context,
                ) {
                    MethodResolutionResult::Found(resolved)
                } else {
                    MethodResolutionResult::Inaccessible {
                        method: resolved.method,
                        context: context.clone(),
                    }
                }
            }
            other => other,
        }
    }

    /// Field resolution: the receiver class, its superinterfaces, then the
    /// superclass chain.
    pub fn resolve_field(&self, receiver: &DexType, field: &DexField) -> FieldResolutionResult {
        if self.classes.get(receiver).is_none() {
            return FieldResolutionResult::ClassMissing(receiver.clone());
        }

        let mut current = Some(receiver.clone());
        while let Some(ty) = current {
            let Some(class) = self.classes.get(&ty) else {
                break;
            };
            if let Some(definition) = class.lookup_field(field) {
                return FieldResolutionResult::Found(ResolvedField {
                    class: class.clone(),
                    field: definition.field.clone(),
                    access_flags: definition.access_flags,
                });
            }
            for interface in self.all_superinterfaces(&ty) {
                let Some(iface_class) = self.classes.get(&interface) else {
                    continue;
                };
                if let Some(definition) = iface_class.lookup_field(field) {
                    return FieldResolutionResult::Found(ResolvedField {
                        class: iface_class.clone(),
                        field: definition.field.clone(),
                        access_flags: definition.access_flags,
                    });
                }
            }
            current = class.super_type.clone();
        }

        FieldResolutionResult::NoSuchField {
            receiver: receiver.clone(),
            field: field.clone(),
        }
    }

    pub fn resolve_field_in_context(
        &self,
        receiver: &DexType,
        field: &DexField,
        context: &DexType,
    ) -> FieldResolutionResult {
        match self.resolve_field(receiver, field) {
            FieldResolutionResult::Found(resolved) => {
                if self.is_member_accessible(resolved.access_flags, resolved.field.holder(), context)
                {
                    FieldResolutionResult::Found(resolved)
                } else {
                    FieldResolutionResult::Inaccessible {
                        field: resolved.field,
                        context: context.clone(),
                    }
                }
            }
            other => other,
        }
    }

    /// The concrete definition a virtual or interface call executes for a
    /// given receiver type.
    pub fn dispatch_target(
        &self,
        receiver: &DexType,
        resolved: &ResolvedMethod,
    ) -> Option<ResolvedMethod> {
        let mut current = Some(receiver.clone());
        while let Some(ty) = current {
            let class = self.classes.get(&ty)?;
            if let Some(definition) = class.lookup_method(&resolved.method) {
                if definition.is_virtual() {
                    return Some(ResolvedMethod {
                        class: class.clone(),
                        method: definition.method.clone(),
                        access_flags: definition.access_flags,
                    });
                }
            }
            current = class.super_type.clone();
        }
        // no override in the class chain: fall back to default-method
        // resolution starting at the receiver
        self.resolve_method(receiver, &resolved.method)
            .resolved()
            .filter(|target| !target.access_flags.is_abstract())
            .cloned()
    }

    /// Program-method definitions a virtual call may actually reach given the
    /// currently instantiated receiver types. Sorted for determinism.
    pub fn lookup_virtual_dispatch_targets(
        &self,
        resolved: &ResolvedMethod,
        instantiated: &AHashSet<DexType>,
    ) -> Vec<ResolvedMethod> {
        let holder = resolved.method.holder();
        let mut targets: Vec<ResolvedMethod> = Vec::new();
        let mut seen: AHashSet<DexMethod> = AHashSet::new();
        for receiver in instantiated {
            if !self.is_subtype(receiver, holder) {
                continue;
            }
            if let Some(target) = self.dispatch_target(receiver, resolved) {
                if target.class.is_program() && seen.insert(target.method.clone()) {
                    targets.push(target);
                }
            }
        }
        targets.sort_by(|a, b| a.method.cmp(&b.method));
        targets
    }

    /// All superinterfaces of `ty`, transitively, in declaration order.
    fn all_superinterfaces(&self, ty: &DexType) -> Vec<DexType> {
        let mut result = Vec::new();
        let mut visited = AHashSet::new();
        let mut worklist: Vec<DexType> = Vec::new();

        let mut current = Some(ty.clone());
        while let Some(cls_ty) = current {
            let Some(class) = self.classes.get(&cls_ty) else {
                break;
            };
            worklist.extend(class.interfaces.iter().cloned());
            current = class.super_type.clone();
        }

        while !worklist.is_empty() {
            let interface = worklist.remove(0);
            if !visited.insert(interface.clone()) {
                continue;
            }
            if let Some(class) = self.classes.get(&interface) {
                worklist.extend(class.interfaces.iter().cloned());
            }
            result.push(interface);
        }
        result
    }

    /// Package-private rules with feature-split boundaries: two classes share
    /// a package only when they also ship in the same feature.
    pub fn is_member_accessible(
        &self,
        flags: AccessFlags,
        declared_holder: &DexType,
        context: &DexType,
    ) -> bool {
        if flags.is_public() {
            return true;
        }
        if flags.is_private() {
            return declared_holder == context;
        }
        let same_package = declared_holder.is_same_package(context) && self.same_feature(declared_holder, context);
        if flags.is_protected() {
            return same_package || self.is_subtype(context, declared_holder);
        }
        same_package
    }

    pub fn feature_of(&self, ty: &DexType) -> Option<&str> {
        self.classes.get(ty).and_then(|c| c.feature.as_deref())
    }

    fn same_feature(&self, a: &DexType, b: &DexType) -> bool {
        self.feature_of(a) == self.feature_of(b)
    }
}
