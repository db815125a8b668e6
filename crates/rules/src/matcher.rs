use dexshrink_model::{AppInfo, ClassRef, DexAnnotation, DexField, DexMethod, DexType};

use crate::ast::{ClassSpec, MemberSpec, ParamsPattern};

/// Members of one class matched by a class spec, with per-spec success so
/// `-keepclasseswithmembers` can be checked atomically.
#[derive(Debug, Default)]
pub struct MemberMatches {
    pub fields: Vec<DexField>,
    pub methods: Vec<DexMethod>,
    spec_matched: Vec<bool>,
}

impl MemberMatches {
    /// True when every member spec matched at least one member.
    pub fn all_specs_matched(&self) -> bool {
        self.spec_matched.iter().all(|&m| m)
    }
}

/// Evaluates a class spec against every program class, in sorted order.
pub fn match_spec<'a>(
    spec: &ClassSpec,
    app_info: &'a AppInfo,
) -> Vec<(&'a ClassRef, MemberMatches)> {
    let mut classes: Vec<&ClassRef> = app_info.program_classes().collect();
    classes.sort_by(|a, b| a.class_type.cmp(&b.class_type));
    classes
        .into_iter()
        .filter(|class| class_matches(spec, class, app_info))
        .map(|class| (class, match_members(spec, class)))
        .collect()
}

/// The class half of the match: kind, access, name, annotation, inheritance.
pub fn class_matches(spec: &ClassSpec, class: &ClassRef, app_info: &AppInfo) -> bool {
    if !spec.kind.matches(class.access_flags) {
        return false;
    }
    if !spec.access.matches(class.access_flags) {
        return false;
    }
    if !spec.name.matches(&class.class_type.java_name()) {
        return false;
    }
    if let Some(annotation) = &spec.annotation {
        if !has_annotation(&class.annotations, |name| annotation.matches(name)) {
            return false;
        }
    }
    if let Some(extends) = &spec.extends {
        let matched = strict_supertypes(class, app_info).into_iter().any(|sup| {
            if !extends.name.matches(&sup.java_name()) {
                return false;
            }
            match &extends.annotation {
                None => true,
                Some(annotation) => app_info
                    .definition_for(&sup)
                    .is_some_and(|sup_class| {
                        has_annotation(&sup_class.annotations, |name| annotation.matches(name))
                    }),
            }
        });
        if !matched {
            return false;
        }
    }
    true
}

/// All strict supertypes and superinterfaces, transitively.
fn strict_supertypes(class: &ClassRef, app_info: &AppInfo) -> Vec<DexType> {
    let mut result = Vec::new();
    let mut worklist: Vec<DexType> = Vec::new();
    if let Some(super_type) = &class.super_type {
        worklist.push(super_type.clone());
    }
    worklist.extend(class.interfaces.iter().cloned());
    while let Some(ty) = worklist.pop() {
        if result.contains(&ty) {
            continue;
        }
        if let Some(definition) = app_info.definition_for(&ty) {
            if let Some(super_type) = &definition.super_type {
                worklist.push(super_type.clone());
            }
            worklist.extend(definition.interfaces.iter().cloned());
        }
        result.push(ty);
    }
    result
}

fn has_annotation(annotations: &[DexAnnotation], matches: impl Fn(&str) -> bool) -> bool {
    annotations
        .iter()
        .any(|a| matches(&a.annotation_type.java_name()))
}

/// Evaluates the member specs of an already-matched class.
pub fn match_members(spec: &ClassSpec, class: &ClassRef) -> MemberMatches {
    let mut matches = MemberMatches {
        spec_matched: vec![false; spec.members.len()],
        ..MemberMatches::default()
    };

    for (index, member_spec) in spec.members.iter().enumerate() {
        match member_spec {
            MemberSpec::AllMembers => {
                for field in class.fields() {
                    matches.fields.push(field.field.clone());
                    matches.spec_matched[index] = true;
                }
                for method in class.methods() {
                    matches.methods.push(method.method.clone());
                    matches.spec_matched[index] = true;
                }
            }
            MemberSpec::AllFields(access) => {
                for field in class.fields() {
                    if access.matches(field.access_flags) {
                        matches.fields.push(field.field.clone());
                        matches.spec_matched[index] = true;
                    }
                }
            }
            MemberSpec::AllMethods(access) => {
                for method in class.methods() {
                    if access.matches(method.access_flags) {
                        matches.methods.push(method.method.clone());
                        matches.spec_matched[index] = true;
                    }
                }
            }
            MemberSpec::Init(params) => {
                for method in &class.direct_methods {
                    if method.method.is_instance_initializer()
                        && params_match(params, &method.method)
                    {
                        matches.methods.push(method.method.clone());
                        matches.spec_matched[index] = true;
                    }
                }
            }
            MemberSpec::Field(field_spec) => {
                for field in class.fields() {
                    if !field_spec.access.matches(field.access_flags) {
                        continue;
                    }
                    if !field_spec.name.matches(field.field.name().as_str()) {
                        continue;
                    }
                    if !field_spec
                        .field_type
                        .matches(&field.field.field_type().java_name())
                    {
                        continue;
                    }
                    if let Some(annotation) = &field_spec.annotation {
                        if !has_annotation(&field.annotations, |name| annotation.matches(name)) {
                            continue;
                        }
                    }
                    matches.fields.push(field.field.clone());
                    matches.spec_matched[index] = true;
                }
            }
            MemberSpec::Method(method_spec) => {
                for method in class.methods() {
                    if !method_spec.access.matches(method.access_flags) {
                        continue;
                    }
                    if !method_spec.name.matches(method.method.name().as_str()) {
                        continue;
                    }
                    if !method_spec
                        .return_type
                        .matches(&method.method.proto().return_type().java_name())
                    {
                        continue;
                    }
                    if !params_match(&method_spec.params, &method.method) {
                        continue;
                    }
                    if let Some(annotation) = &method_spec.annotation {
                        if !has_annotation(&method.annotations, |name| annotation.matches(name)) {
                            continue;
                        }
                    }
                    matches.methods.push(method.method.clone());
                    matches.spec_matched[index] = true;
                }
            }
        }
    }

    matches
}

fn params_match(pattern: &ParamsPattern, method: &DexMethod) -> bool {
    match pattern {
        ParamsPattern::Any => true,
        ParamsPattern::Exact(patterns) => {
            let params = method.proto().parameters();
            params.len() == patterns.len()
                && patterns
                    .iter()
                    .zip(params)
                    .all(|(pattern, param)| pattern.matches(&param.java_name()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dexshrink_model::{
        AccessFlags, ClassKind, DexClass, DexEncodedField, DexEncodedMethod, ItemFactory, Origin,
    };

    use super::*;
    use crate::parse::parse_rules;
    use crate::ast::Rule;

    fn spec_of(text: &str) -> ClassSpec {
        let config = parse_rules(text).unwrap();
        match config.rules.into_iter().next().unwrap() {
            Rule::Keep(rule) => rule.spec,
            _ => panic!("expected keep rule"),
        }
    }

    fn build_app() -> (Arc<ItemFactory>, AppInfo) {
        let factory = ItemFactory::new();
        let object = factory.known().object_type.clone();
        let void = factory.create_type("V").unwrap();
        let int = factory.create_type("I").unwrap();

        let main_ty = factory.create_type("Lcom/example/Main;").unwrap();
        let string_array = factory.create_type("[Ljava/lang/String;").unwrap();
        let main_proto = factory.create_proto(void.clone(), &[string_array]).unwrap();
        let main_method = factory.create_method(main_ty.clone(), "main", main_proto);
        let counter_field = factory.create_field(main_ty.clone(), "counter", int.clone());

        let main = DexClass::new(
            ClassKind::Program,
            main_ty,
            Some(object.clone()),
            Vec::new(),
            AccessFlags::PUBLIC,
            vec![DexEncodedMethod::new(
                main_method,
                AccessFlags::PUBLIC | AccessFlags::STATIC,
            )],
            Vec::new(),
            vec![DexEncodedField::new(
                counter_field,
                AccessFlags::PRIVATE | AccessFlags::STATIC,
            )],
            Vec::new(),
            Origin::Unknown,
        )
        .unwrap();

        let base_ty = factory.create_type("Lcom/example/Base;").unwrap();
        let base = DexClass::new(
            ClassKind::Program,
            base_ty.clone(),
            Some(object.clone()),
            Vec::new(),
            AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Origin::Unknown,
        )
        .unwrap();

        let derived_ty = factory.create_type("Lcom/example/Derived;").unwrap();
        let derived = DexClass::new(
            ClassKind::Program,
            derived_ty,
            Some(base_ty),
            Vec::new(),
            AccessFlags::PUBLIC,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Origin::Unknown,
        )
        .unwrap();

        let object_class = DexClass::new(
            ClassKind::Library,
            object,
            None,
            Vec::new(),
            AccessFlags::PUBLIC,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Origin::Unknown,
        )
        .unwrap();

        let app_info = AppInfo::build(
            factory.clone(),
            vec![
                Arc::new(main),
                Arc::new(base),
                Arc::new(derived),
                Arc::new(object_class),
            ],
        )
        .unwrap();
        (factory, app_info)
    }

    #[test]
    fn matches_class_and_member() {
        let (_, app_info) = build_app();
        let spec = spec_of(
            "-keep class com.example.Main { public static void main(java.lang.String[]); }",
        );
        let matched = match_spec(&spec, &app_info);
        assert_eq!(matched.len(), 1);
        let (class, members) = &matched[0];
        assert_eq!(class.class_type.java_name(), "com.example.Main");
        assert_eq!(members.methods.len(), 1);
        assert!(members.all_specs_matched());
    }

    #[test]
    fn member_spec_without_match_reports_failure() {
        let (_, app_info) = build_app();
        let spec = spec_of("-keepclasseswithmembers class com.example.Main { void missing(); }");
        let matched = match_spec(&spec, &app_info);
        assert_eq!(matched.len(), 1);
        assert!(!matched[0].1.all_specs_matched());
    }

    #[test]
    fn extends_selector_matches_subclasses_only() {
        let (_, app_info) = build_app();
        let spec = spec_of("-keep class * extends com.example.Base");
        let matched = match_spec(&spec, &app_info);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].0.class_type.java_name(), "com.example.Derived");
    }

    #[test]
    fn access_filter_applies_to_fields() {
        let (_, app_info) = build_app();
        let spec = spec_of("-keep class com.example.Main { private static <fields>; }");
        let matched = match_spec(&spec, &app_info);
        assert_eq!(matched[0].1.fields.len(), 1);

        let spec = spec_of("-keep class com.example.Main { public <fields>; }");
        let matched = match_spec(&spec, &app_info);
        assert!(matched[0].1.fields.is_empty());
    }

    #[test]
    fn wildcard_matches_all_program_classes() {
        let (_, app_info) = build_app();
        let spec = spec_of("-keep class com.example.** { *; }");
        let matched = match_spec(&spec, &app_info);
        assert_eq!(matched.len(), 3);
    }
}
