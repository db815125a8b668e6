use dexshrink_model::{
    AppInfo, ClassRef, DexField, DexMethod, FieldResolutionResult, GraphLens, Instruction, ItemRef,
    MethodResolutionResult,
};
use dexshrink_rules::RootSet;

/// Member rebinding: rewrites member references found in live bodies to the
/// class that actually defines the member, so later passes and the writer
/// deal with canonical references only. Produces a lens; definitions are not
/// touched.
pub fn rebind_members(app_info: &AppInfo, root_set: &RootSet, previous: GraphLens) -> GraphLens {
    let mut classes: Vec<&ClassRef> = app_info.program_classes().collect();
    classes.sort_by(|a, b| a.class_type.cmp(&b.class_type));

    let mut builder = GraphLens::nested(previous);

    for class in classes {
        for method in class.methods() {
            let Some(code) = &method.code else {
                continue;
            };
            for instruction in &code.instructions {
                match instruction {
                    // invoke-direct is exact by definition and never rebound
                    Instruction::InvokeVirtual(target)
                    | Instruction::InvokeInterface(target)
                    | Instruction::InvokeSuper(target)
                    | Instruction::InvokeStatic(target) => {
                        if let Some(rebound) = rebind_method(app_info, root_set, target) {
                            builder = builder.map_method(target.clone(), rebound);
                        }
                    }
                    Instruction::StaticGet(field)
                    | Instruction::StaticPut(field)
                    | Instruction::InstanceGet(field)
                    | Instruction::InstancePut(field) => {
                        if let Some(rebound) = rebind_field(app_info, root_set, field) {
                            builder = builder.map_field(field.clone(), rebound);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    builder.build()
}

/// The defining class's reference, when moving there is safe for every
/// caller: the definition must be public or stay within the same package.
fn rebind_method(
    app_info: &AppInfo,
    root_set: &RootSet,
    reference: &DexMethod,
) -> Option<DexMethod> {
    if root_set.is_pinned(&ItemRef::Method(reference.clone())) {
        return None;
    }
    let MethodResolutionResult::Found(resolved) =
        app_info.resolve_method(reference.holder(), reference)
    else {
        return None;
    };
    if resolved.method == *reference {
        return None;
    }
    if root_set.is_pinned(&ItemRef::Method(resolved.method.clone())) {
        return None;
    }
    let context_free = resolved.access_flags.is_public()
        || resolved.method.holder().is_same_package(reference.holder());
    context_free.then_some(resolved.method)
}

fn rebind_field(app_info: &AppInfo, root_set: &RootSet, reference: &DexField) -> Option<DexField> {
    if root_set.is_pinned(&ItemRef::Field(reference.clone())) {
        return None;
    }
    let FieldResolutionResult::Found(resolved) =
        app_info.resolve_field(reference.holder(), reference)
    else {
        return None;
    };
    if resolved.field == *reference {
        return None;
    }
    if root_set.is_pinned(&ItemRef::Field(resolved.field.clone())) {
        return None;
    }
    let context_free = resolved.access_flags.is_public()
        || resolved.field.holder().is_same_package(reference.holder());
    context_free.then_some(resolved.field)
}
