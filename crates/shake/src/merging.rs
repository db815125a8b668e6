use std::sync::Arc;

use ahash::AHashSet;
use dexshrink_model::{
    AppInfo, ClassRef, DexClass, DexType, GraphLens, Instruction, ItemRef,
};
use dexshrink_rules::RootSet;

/// Output of vertical class merging.
pub struct MergeResult {
    /// The rewritten program: merged classes removed, their members re-homed
    /// in the subclass. Sorted by type.
    pub classes: Vec<ClassRef>,
    pub lens: GraphLens,
    /// (merged class, surviving subclass) pairs, for logging.
    pub merged: Vec<(DexType, DexType)>,
}

/// Collapses single-subtype chains: a memberless-except-virtuals, non-pinned
/// class with exactly one program subclass disappears into that subclass.
///
/// The pass is deliberately conservative; its value is the lens seam, not
/// maximal merging. Anything that looks risky is skipped silently.
pub fn merge_classes(app_info: &AppInfo, root_set: &RootSet, previous: GraphLens) -> MergeResult {
    let mut classes: Vec<ClassRef> = app_info.program_classes().cloned().collect();
    classes.sort_by(|a, b| a.class_type.cmp(&b.class_type));

    let mut builder = GraphLens::nested(previous);
    let mut merged: Vec<(DexType, DexType)> = Vec::new();
    let mut touched: AHashSet<DexType> = AHashSet::new();

    for class in &classes {
        let candidate = &class.class_type;
        if touched.contains(candidate) {
            continue;
        }
        let Some(target) = merge_target(app_info, root_set, class) else {
            continue;
        };
        if touched.contains(&target) {
            continue;
        }
        touched.insert(candidate.clone());
        touched.insert(target.clone());
        merged.push((candidate.clone(), target.clone()));
    }

    if merged.is_empty() {
        return MergeResult {
            classes,
            lens: builder.build(),
            merged,
        };
    }

    let factory = app_info.factory().clone();
    let mut result: Vec<ClassRef> = Vec::new();
    for class in &classes {
        if merged.iter().any(|(from, _)| from == &class.class_type) {
            continue;
        }
        let Some((from, _)) = merged
            .iter()
            .find(|(_, into)| into == &class.class_type)
            .cloned()
        else {
            result.push(class.clone());
            continue;
        };

        let source = app_info
            .definition_for(&from)
            .expect("merge source is a program class");

        // re-home the merged virtual methods under the subclass
        let mut virtual_methods = class.virtual_methods.clone();
        for method in &source.virtual_methods {
            let new_ref = factory.create_method(
                class.class_type.clone(),
                method.method.name().as_str(),
                method.method.proto().clone(),
            );
            builder = builder.map_method(method.method.clone(), new_ref.clone());
            let mut moved = method.clone();
            moved.method = new_ref;
            virtual_methods.push(moved);
        }
        builder = builder.map_type(from.clone(), class.class_type.clone());

        let mut interfaces = class.interfaces.clone();
        for interface in &source.interfaces {
            if !interfaces.contains(interface) && interface != &class.class_type {
                interfaces.push(interface.clone());
            }
        }
        interfaces.retain(|i| i != &from);

        result.push(Arc::new(DexClass {
            super_type: source.super_type.clone(),
            interfaces,
            virtual_methods,
            ..(**class).clone()
        }));
    }

    log::debug!("vertically merged {} classes", merged.len());

    MergeResult {
        classes: result,
        lens: builder.build(),
        merged,
    }
}

/// The single subclass `class` may disappear into, if any.
fn merge_target(app_info: &AppInfo, root_set: &RootSet, class: &ClassRef) -> Option<DexType> {
    let ty = &class.class_type;
    let flags = class.access_flags;
    if flags.is_interface() || flags.is_enum() || flags.is_annotation() {
        return None;
    }
    if root_set.is_type_pinned(ty) {
        return None;
    }
    // only classes that are pure virtual-method carriers merge
    if !class.direct_methods.is_empty()
        || !class.static_fields.is_empty()
        || !class.instance_fields.is_empty()
    {
        return None;
    }

    let subtypes = app_info.subtypes(ty);
    let direct: Vec<&DexType> = subtypes
        .iter()
        .filter(|sub| {
            app_info
                .definition_for(sub)
                .is_some_and(|c| c.super_type.as_ref() == Some(ty))
        })
        .collect();
    if direct.len() != 1 || subtypes.len() != 1 {
        return None;
    }
    let target = direct[0].clone();

    let target_class = app_info.definition_for(&target)?;
    if !target_class.is_program() || target_class.feature != class.feature {
        return None;
    }

    // signature collisions or super calls into the candidate block the merge
    for method in &class.virtual_methods {
        if target_class
            .methods()
            .any(|m| m.method.matches_signature(&method.method))
        {
            return None;
        }
        if root_set.is_pinned(&ItemRef::Method(method.method.clone())) {
            return None;
        }
    }
    for method in target_class.methods() {
        let Some(code) = &method.code else {
            continue;
        };
        for instruction in &code.instructions {
            if let Instruction::InvokeSuper(target_ref) = instruction {
                if target_ref.holder() == ty {
                    return None;
                }
            }
        }
    }

    Some(target)
}

#[cfg(test)]
mod tests {
    use dexshrink_model::InvokeKind;

    use super::*;
    use crate::testutil::ProgramBuilder;

    #[test]
    fn single_subtype_chain_collapses() {
        let mut pb = ProgramBuilder::new();
        pb.define_class("LBase;", Some("Ljava/lang/Object;"));
        pb.add_virtual_method("LBase;", "helper", "()V", Some(vec![Instruction::ReturnVoid]));
        pb.define_class("LOnly;", Some("LBase;"));
        pb.add_constructor("LOnly;", vec![Instruction::ReturnVoid]);
        let base = pb.type_ref("LBase;");
        let only = pb.type_ref("LOnly;");
        let base_helper = pb.method_ref("LBase;", "helper", "()V");
        let (factory, app_info) = pb.build();

        let result = merge_classes(&app_info, &RootSet::default(), GraphLens::identity());
        assert_eq!(result.merged, vec![(base.clone(), only.clone())]);
        assert!(result.classes.iter().all(|c| c.class_type != base));

        let survivor = result
            .classes
            .iter()
            .find(|c| c.class_type == only)
            .unwrap();
        assert!(survivor
            .virtual_methods
            .iter()
            .any(|m| m.method.name().as_str() == "helper"));
        assert_eq!(survivor.super_type, Some(factory.known().object_type.clone()));

        assert_eq!(result.lens.lookup_type(&base), only);
        let moved = result.lens.lookup_method(&base_helper, None, InvokeKind::Virtual);
        assert_eq!(moved.method.holder(), &only);
    }

    #[test]
    fn pinned_class_is_not_merged() {
        let mut pb = ProgramBuilder::new();
        pb.define_class("LBase;", Some("Ljava/lang/Object;"));
        pb.define_class("LOnly;", Some("LBase;"));
        let base = pb.type_ref("LBase;");
        let (_, app_info) = pb.build();

        let mut root_set = RootSet::default();
        root_set.pinned.insert(ItemRef::Type(base.clone()));

        let result = merge_classes(&app_info, &root_set, GraphLens::identity());
        assert!(result.merged.is_empty());
        assert!(result.classes.iter().any(|c| c.class_type == base));
    }

    #[test]
    fn signature_collision_blocks_merge() {
        let mut pb = ProgramBuilder::new();
        pb.define_class("LBase;", Some("Ljava/lang/Object;"));
        pb.add_virtual_method("LBase;", "m", "()V", Some(vec![Instruction::ReturnVoid]));
        pb.define_class("LOnly;", Some("LBase;"));
        pb.add_virtual_method("LOnly;", "m", "()V", Some(vec![Instruction::ReturnVoid]));
        let (_, app_info) = pb.build();

        let result = merge_classes(&app_info, &RootSet::default(), GraphLens::identity());
        assert!(result.merged.is_empty());
    }

    #[test]
    fn two_subclasses_block_merge() {
        let mut pb = ProgramBuilder::new();
        pb.define_class("LBase;", Some("Ljava/lang/Object;"));
        pb.define_class("LA;", Some("LBase;"));
        pb.define_class("LB;", Some("LBase;"));
        let (_, app_info) = pb.build();

        let result = merge_classes(&app_info, &RootSet::default(), GraphLens::identity());
        assert!(result.merged.is_empty());
    }
}
