use std::sync::Arc;

use ahash::AHashMap;
use dexshrink_model::{
    AppInfo, ClassRef, DexClass, DexField, DexType, GraphLens, ItemRef,
};

use crate::enqueuer::{FieldAccessInfo, LivenessView};

/// Output of tree-pruning: the surviving program, the removed references,
/// and the (identity) lens this stage installs.
pub struct PruneResult {
    /// Surviving program classes, rebuilt with only live members, sorted by
    /// type.
    pub classes: Vec<ClassRef>,
    /// Removed classes and removed members of surviving classes, sorted for
    /// the usage output.
    pub removed: Vec<ItemRef>,
    /// Tree-pruning removes definitions but renames nothing.
    pub lens: GraphLens,
    /// Field access info restricted to surviving fields.
    pub field_access: AHashMap<DexField, FieldAccessInfo>,
}

/// Builds a new program containing only live classes and, within each, only
/// live fields and methods. Dead supers of a surviving class are bridged by
/// hoisting the super link to the nearest surviving ancestor.
pub fn prune_program(app_info: &AppInfo, view: &LivenessView) -> PruneResult {
    let mut all_program: Vec<ClassRef> = app_info
        .program_classes()
        .cloned()
        .chain(view.synthesized.iter().cloned())
        .collect();
    all_program.sort_by(|a, b| a.class_type.cmp(&b.class_type));

    let mut kept: Vec<ClassRef> = Vec::new();
    let mut removed: Vec<ItemRef> = Vec::new();

    for class in &all_program {
        if !view.live_types.contains(&class.class_type) {
            removed.push(ItemRef::Type(class.class_type.clone()));
            continue;
        }

        let keep_method = |m: &&dexshrink_model::DexEncodedMethod| {
            view.live_methods.contains(&m.method) || view.virtual_targets.contains(&m.method)
        };
        let annotate = |mut m: dexshrink_model::DexEncodedMethod| {
            if view.root_set.assume_no_side_effects.contains(&m.method) {
                m.optimization_info.no_side_effects = true;
            }
            m
        };
        let direct_methods = class
            .direct_methods
            .iter()
            .filter(keep_method)
            .cloned()
            .map(annotate)
            .collect::<Vec<_>>();
        let virtual_methods = class
            .virtual_methods
            .iter()
            .filter(keep_method)
            .cloned()
            .map(annotate)
            .collect::<Vec<_>>();
        let static_fields = class
            .static_fields
            .iter()
            .filter(|f| view.is_field_live(&f.field))
            .cloned()
            .collect::<Vec<_>>();
        let instance_fields = class
            .instance_fields
            .iter()
            .filter(|f| view.is_field_live(&f.field))
            .cloned()
            .collect::<Vec<_>>();

        for method in class.methods() {
            if !view.live_methods.contains(&method.method)
                && !view.virtual_targets.contains(&method.method)
            {
                removed.push(ItemRef::Method(method.method.clone()));
            }
        }
        for field in class.fields() {
            if !view.is_field_live(&field.field) {
                removed.push(ItemRef::Field(field.field.clone()));
            }
        }

        let super_type = class
            .super_type
            .as_ref()
            .map(|super_type| hoist_super(app_info, view, super_type));
        let interfaces = hoist_interfaces(app_info, view, &class.interfaces);

        kept.push(Arc::new(DexClass {
            super_type,
            interfaces,
            direct_methods,
            virtual_methods,
            static_fields,
            instance_fields,
            ..(**class).clone()
        }));
    }

    removed.sort();

    let field_access: AHashMap<DexField, FieldAccessInfo> = view
        .field_access
        .iter()
        .filter(|(field, _)| view.live_types.contains(field.holder()))
        .map(|(field, info)| (field.clone(), info.clone()))
        .collect();

    log::debug!(
        "pruned program: {} classes kept, {} items removed",
        kept.len(),
        removed.len()
    );

    PruneResult {
        classes: kept,
        removed,
        lens: GraphLens::identity(),
        field_access,
    }
}

/// The nearest surviving ancestor: dead program supers are skipped; library
/// and classpath supers always survive textually.
fn hoist_super(app_info: &AppInfo, view: &LivenessView, super_type: &DexType) -> DexType {
    let mut current = super_type.clone();
    loop {
        match app_info.definition_for(&current) {
            Some(class) if class.is_program() && !view.live_types.contains(&current) => {
                match &class.super_type {
                    Some(next) => current = next.clone(),
                    None => return current,
                }
            }
            _ => return current,
        }
    }
}

/// Dead program interfaces are replaced by their surviving superinterfaces.
fn hoist_interfaces(
    app_info: &AppInfo,
    view: &LivenessView,
    interfaces: &[DexType],
) -> Vec<DexType> {
    let mut result: Vec<DexType> = Vec::new();
    let mut worklist: Vec<DexType> = interfaces.to_vec();
    while !worklist.is_empty() {
        let interface = worklist.remove(0);
        match app_info.definition_for(&interface) {
            Some(class) if class.is_program() && !view.live_types.contains(&interface) => {
                worklist.extend(class.interfaces.iter().cloned());
            }
            _ => {
                if !result.contains(&interface) {
                    result.push(interface);
                }
            }
        }
    }
    result
}
