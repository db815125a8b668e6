use std::path::PathBuf;

use ahash::{AHashMap, AHashSet};
use dexshrink_model::{AppInfo, DexField, DexMethod, DexType, ItemRef};

use crate::ast::{
    ClassNamePattern, IfRule, KeepKind, KeepRule, Rule, RuleConfig,
};
use crate::errors::RuleError;
use crate::matcher::{match_spec, MemberMatches};

/// Members that become live once their holder does, from
/// `-keepclassmembers`.
#[derive(Debug, Clone)]
pub struct ConditionalMembers {
    pub holder: DexType,
    pub fields: Vec<DexField>,
    pub methods: Vec<DexMethod>,
}

/// The reachability seeds and per-reference attribute sets produced by
/// applying the rules to the program.
#[derive(Debug, Default, Clone)]
pub struct RootSet {
    pub live_types: AHashSet<DexType>,
    pub live_fields: AHashSet<DexField>,
    pub live_methods: AHashSet<DexMethod>,
    /// Types whose constructors are kept: may appear as dynamic receivers.
    pub instantiated_types: AHashSet<DexType>,
    /// Names and signatures that must survive verbatim. Monotone: nothing is
    /// ever removed from this set.
    pub pinned: AHashSet<ItemRef>,
    pub no_obfuscation: AHashSet<ItemRef>,
    pub no_shrinking: AHashSet<ItemRef>,
    pub no_access_modification: AHashSet<ItemRef>,
    pub check_discard: AHashSet<ItemRef>,
    pub assume_no_side_effects: AHashSet<DexMethod>,
    pub assume_values: AHashSet<ItemRef>,
    pub reasons_asked: AHashSet<ItemRef>,
    pub not_inlining_asked: AHashSet<ItemRef>,
    /// `-keepclassmembers` matches, keyed by holder.
    pub conditional_members: AHashMap<DexType, Vec<ConditionalMembers>>,
    /// `-if` rules re-evaluated by the enqueuer as types become live.
    pub if_rules: Vec<IfRule>,
    /// Seed for the minifier from `-applymapping`.
    pub apply_mapping: Option<PathBuf>,
    /// `-dontwarn` patterns filtering missing-class diagnostics.
    pub dont_warn: Vec<ClassNamePattern>,
}

impl RootSet {
    pub fn is_pinned(&self, item: &ItemRef) -> bool {
        self.pinned.contains(item)
    }

    /// Applies one matched keep rule to one class. Called by the builder for
    /// every initial match and by the enqueuer when an `-if` condition is
    /// met mid-round; pinning is monotone either way.
    pub fn apply_matched_keep(
        &mut self,
        keep: &KeepRule,
        class_type: &DexType,
        members: MemberMatches,
    ) {
        match keep.kind {
            KeepKind::Classes => {
                self.keep_class_and_members(keep, class_type, members);
            }
            KeepKind::ClassMembers => {
                self.pin_members(keep, &members);
                self.conditional_members
                    .entry(class_type.clone())
                    .or_default()
                    .push(ConditionalMembers {
                        holder: class_type.clone(),
                        fields: members.fields,
                        methods: members.methods,
                    });
            }
            KeepKind::ClassesWithMembers => {
                // atomic: the class enters the root set only when every
                // member spec matched
                if members.all_specs_matched() {
                    self.keep_class_and_members(keep, class_type, members);
                }
            }
        }
    }

    fn keep_class_and_members(
        &mut self,
        keep: &KeepRule,
        class_type: &DexType,
        members: MemberMatches,
    ) {
        let modifiers = &keep.modifiers;
        let class_item = ItemRef::Type(class_type.clone());

        if !modifiers.allow_shrinking {
            self.live_types.insert(class_type.clone());
            self.no_shrinking.insert(class_item.clone());
        }
        if !modifiers.allow_obfuscation {
            self.pinned.insert(class_item.clone());
            self.no_obfuscation.insert(class_item.clone());
        }
        if !modifiers.allow_access_modification {
            self.no_access_modification.insert(class_item);
        }

        self.pin_members(keep, &members);

        for field in members.fields {
            if !modifiers.allow_shrinking {
                self.no_shrinking.insert(ItemRef::Field(field.clone()));
                self.live_fields.insert(field);
            }
        }
        for method in members.methods {
            if method.is_instance_initializer() && !modifiers.allow_shrinking {
                self.instantiated_types.insert(class_type.clone());
            }
            if !modifiers.allow_shrinking {
                self.no_shrinking.insert(ItemRef::Method(method.clone()));
                self.live_methods.insert(method);
            }
        }
    }

    fn pin_members(&mut self, keep: &KeepRule, members: &MemberMatches) {
        if keep.modifiers.allow_obfuscation {
            return;
        }
        for field in &members.fields {
            let item = ItemRef::Field(field.clone());
            self.pinned.insert(item.clone());
            self.no_obfuscation.insert(item);
        }
        for method in &members.methods {
            let item = ItemRef::Method(method.clone());
            self.pinned.insert(item.clone());
            self.no_obfuscation.insert(item);
        }
    }

    pub fn is_type_pinned(&self, ty: &DexType) -> bool {
        self.pinned.contains(&ItemRef::Type(ty.clone()))
    }

    pub fn warning_suppressed(&self, java_name: &str) -> bool {
        self.dont_warn.iter().any(|p| p.matches(java_name))
    }

    /// Copy with seeds restricted to surviving types, applied after
    /// tree-pruning. Pinning is monotone, so `pinned` and the attribute sets
    /// driving later decisions carry over unchanged; `check_discard` must
    /// still be verified against the pruned program and carries over too.
    pub fn pruned_copy(&self, live_types: &AHashSet<DexType>) -> RootSet {
        RootSet {
            live_types: self
                .live_types
                .iter()
                .filter(|ty| live_types.contains(*ty))
                .cloned()
                .collect(),
            live_fields: self
                .live_fields
                .iter()
                .filter(|field| live_types.contains(field.holder()))
                .cloned()
                .collect(),
            live_methods: self
                .live_methods
                .iter()
                .filter(|method| live_types.contains(method.holder()))
                .cloned()
                .collect(),
            instantiated_types: self
                .instantiated_types
                .iter()
                .filter(|ty| live_types.contains(*ty))
                .cloned()
                .collect(),
            pinned: self.pinned.clone(),
            no_obfuscation: self.no_obfuscation.clone(),
            no_shrinking: self.no_shrinking.clone(),
            no_access_modification: self.no_access_modification.clone(),
            check_discard: self.check_discard.clone(),
            assume_no_side_effects: self.assume_no_side_effects.clone(),
            assume_values: self.assume_values.clone(),
            reasons_asked: self.reasons_asked.clone(),
            not_inlining_asked: self.not_inlining_asked.clone(),
            conditional_members: self
                .conditional_members
                .iter()
                .filter(|(ty, _)| live_types.contains(*ty))
                .map(|(ty, members)| (ty.clone(), members.clone()))
                .collect(),
            if_rules: self.if_rules.clone(),
            apply_mapping: self.apply_mapping.clone(),
            dont_warn: self.dont_warn.clone(),
        }
    }

    /// Sorted seed lines for the `-printseeds` output.
    pub fn seed_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        let mut types: Vec<_> = self.live_types.iter().collect();
        types.sort();
        for ty in types {
            lines.push(ty.java_name());
        }
        let mut fields: Vec<_> = self.live_fields.iter().collect();
        fields.sort();
        for field in fields {
            lines.push(format!(
                "{}: {} {}",
                field.holder().java_name(),
                field.field_type().java_name(),
                field.name()
            ));
        }
        let mut methods: Vec<_> = self.live_methods.iter().collect();
        methods.sort();
        for method in methods {
            let params: Vec<String> = method
                .proto()
                .parameters()
                .iter()
                .map(|p| p.java_name())
                .collect();
            lines.push(format!(
                "{}: {} {}({})",
                method.holder().java_name(),
                method.proto().return_type().java_name(),
                method.name(),
                params.join(",")
            ));
        }
        lines
    }
}

/// Applies matched rules to produce the root set.
pub struct RootSetBuilder<'a> {
    app_info: &'a AppInfo,
    root_set: RootSet,
}

impl<'a> RootSetBuilder<'a> {
    pub fn new(app_info: &'a AppInfo) -> RootSetBuilder<'a> {
        RootSetBuilder {
            app_info,
            root_set: RootSet::default(),
        }
    }

    pub fn build(mut self, config: &RuleConfig) -> Result<RootSet, RuleError> {
        for rule in &config.rules {
            match rule {
                Rule::Keep(keep) => self.apply_keep(keep),
                Rule::If(if_rule) => self.root_set.if_rules.push(if_rule.clone()),
                Rule::CheckDiscard(spec) => {
                    for (class, members) in match_spec(spec, self.app_info) {
                        if spec.members.is_empty() {
                            self.root_set
                                .check_discard
                                .insert(ItemRef::Type(class.class_type.clone()));
                        }
                        for field in members.fields {
                            self.root_set.check_discard.insert(ItemRef::Field(field));
                        }
                        for method in members.methods {
                            self.root_set.check_discard.insert(ItemRef::Method(method));
                        }
                    }
                }
                Rule::AssumeNoSideEffects(spec) => {
                    for (_, members) in match_spec(spec, self.app_info) {
                        self.root_set
                            .assume_no_side_effects
                            .extend(members.methods);
                    }
                }
                Rule::AssumeValues(spec) => {
                    for (_, members) in match_spec(spec, self.app_info) {
                        self.root_set
                            .assume_values
                            .extend(members.fields.into_iter().map(ItemRef::Field));
                        self.root_set
                            .assume_values
                            .extend(members.methods.into_iter().map(ItemRef::Method));
                    }
                }
                Rule::WhyAreYouKeeping(spec) => {
                    for (class, members) in match_spec(spec, self.app_info) {
                        self.root_set
                            .reasons_asked
                            .insert(ItemRef::Type(class.class_type.clone()));
                        self.root_set
                            .reasons_asked
                            .extend(members.fields.into_iter().map(ItemRef::Field));
                        self.root_set
                            .reasons_asked
                            .extend(members.methods.into_iter().map(ItemRef::Method));
                    }
                }
                Rule::WhyAreYouNotInlining(spec) => {
                    for (_, members) in match_spec(spec, self.app_info) {
                        self.root_set
                            .not_inlining_asked
                            .extend(members.methods.into_iter().map(ItemRef::Method));
                    }
                }
            }
        }

        self.root_set.apply_mapping = config.options.apply_mapping.clone();
        self.root_set.dont_warn = config.options.dont_warn.clone();

        log::debug!(
            "root set: {} types, {} methods, {} fields, {} pinned",
            self.root_set.live_types.len(),
            self.root_set.live_methods.len(),
            self.root_set.live_fields.len(),
            self.root_set.pinned.len()
        );

        Ok(self.root_set)
    }

    fn apply_keep(&mut self, keep: &KeepRule) {
        let matched = match_spec(&keep.spec, self.app_info);
        for (class, members) in matched {
            self.root_set
                .apply_matched_keep(keep, &class.class_type, members);
        }
    }
}

/// Convenience entry point: match a config against the program.
pub fn build_root_set(app_info: &AppInfo, config: &RuleConfig) -> Result<RootSet, RuleError> {
    RootSetBuilder::new(app_info).build(config)
}

/// Re-evaluates one `-if` rule; returns the matched keep applications so the
/// enqueuer can feed them through an existing builder.
pub fn evaluate_if_rule<'a>(
    rule: &IfRule,
    app_info: &'a AppInfo,
    live_types: &AHashSet<DexType>,
) -> Vec<(DexType, MemberMatches)> {
    let condition_met = match_spec(&rule.condition, app_info)
        .into_iter()
        .any(|(class, members)| {
            live_types.contains(&class.class_type) && members.all_specs_matched()
        });
    if !condition_met {
        return Vec::new();
    }
    match_spec(&rule.keep.spec, app_info)
        .into_iter()
        .map(|(class, members)| (class.class_type.clone(), members))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dexshrink_model::{
        AccessFlags, AppInfo, ClassKind, DexClass, DexEncodedMethod, ItemFactory, Origin,
    };

    use super::*;
    use crate::parse::parse_rules;

    fn build_app() -> (Arc<ItemFactory>, AppInfo) {
        let factory = ItemFactory::new();
        let object = factory.known().object_type.clone();
        let void = factory.create_type("V").unwrap();

        let a_ty = factory.create_type("LA;").unwrap();
        let proto = factory.create_proto(void.clone(), &[]).unwrap();
        let m1 = factory.create_method(a_ty.clone(), "m1", proto.clone());
        let m2 = factory.create_method(a_ty.clone(), "m2", proto.clone());
        let init = factory.create_method(a_ty.clone(), "<init>", proto);

        let a = DexClass::new(
            ClassKind::Program,
            a_ty,
            Some(object.clone()),
            Vec::new(),
            AccessFlags::PUBLIC,
            vec![DexEncodedMethod::new(
                init,
                AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
            )],
            vec![
                DexEncodedMethod::new(m1, AccessFlags::PUBLIC),
                DexEncodedMethod::new(m2, AccessFlags::PUBLIC),
            ],
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

        let app_info =
            AppInfo::build(factory.clone(), vec![Arc::new(a), Arc::new(object_class)]).unwrap();
        (factory, app_info)
    }

    #[test]
    fn keep_seeds_live_and_pinned() {
        let (factory, app_info) = build_app();
        let config = parse_rules("-keep class A { void m1(); }").unwrap();
        let root_set = build_root_set(&app_info, &config).unwrap();

        let a = factory.create_type("LA;").unwrap();
        let void = factory.create_type("V").unwrap();
        let proto = factory.create_proto(void, &[]).unwrap();
        let m1 = factory.create_method(a.clone(), "m1", proto.clone());
        let m2 = factory.create_method(a.clone(), "m2", proto);

        assert!(root_set.live_types.contains(&a));
        assert!(root_set.live_methods.contains(&m1));
        assert!(!root_set.live_methods.contains(&m2));
        assert!(root_set.is_type_pinned(&a));
        assert!(root_set.is_pinned(&ItemRef::Method(m1)));
    }

    #[test]
    fn kept_constructor_marks_instantiated() {
        let (factory, app_info) = build_app();
        let config = parse_rules("-keep class A { <init>(); }").unwrap();
        let root_set = build_root_set(&app_info, &config).unwrap();
        let a = factory.create_type("LA;").unwrap();
        assert!(root_set.instantiated_types.contains(&a));
    }

    #[test]
    fn allowobfuscation_keeps_but_does_not_pin() {
        let (factory, app_info) = build_app();
        let config = parse_rules("-keep,allowobfuscation class A { void m1(); }").unwrap();
        let root_set = build_root_set(&app_info, &config).unwrap();
        let a = factory.create_type("LA;").unwrap();
        assert!(root_set.live_types.contains(&a));
        assert!(!root_set.is_type_pinned(&a));
    }

    #[test]
    fn allowshrinking_pins_without_rooting() {
        let (factory, app_info) = build_app();
        let config = parse_rules("-keep,allowshrinking class A").unwrap();
        let root_set = build_root_set(&app_info, &config).unwrap();
        let a = factory.create_type("LA;").unwrap();
        assert!(!root_set.live_types.contains(&a));
        assert!(root_set.is_type_pinned(&a));
    }

    #[test]
    fn keepclassmembers_is_conditional() {
        let (factory, app_info) = build_app();
        let config = parse_rules("-keepclassmembers class A { void m1(); }").unwrap();
        let root_set = build_root_set(&app_info, &config).unwrap();
        let a = factory.create_type("LA;").unwrap();
        assert!(!root_set.live_types.contains(&a));
        assert!(root_set.live_methods.is_empty());
        assert_eq!(root_set.conditional_members[&a].len(), 1);
        assert_eq!(root_set.conditional_members[&a][0].methods.len(), 1);
    }

    #[test]
    fn keepclasseswithmembers_is_atomic() {
        let (factory, app_info) = build_app();
        let config =
            parse_rules("-keepclasseswithmembers class A { void m1(); void missing(); }").unwrap();
        let root_set = build_root_set(&app_info, &config).unwrap();
        let a = factory.create_type("LA;").unwrap();
        assert!(!root_set.live_types.contains(&a));
        assert!(root_set.live_methods.is_empty());
    }

    #[test]
    fn checkdiscard_collects_references() {
        let (factory, app_info) = build_app();
        let config = parse_rules("-checkdiscard class A").unwrap();
        let root_set = build_root_set(&app_info, &config).unwrap();
        let a = factory.create_type("LA;").unwrap();
        assert!(root_set.check_discard.contains(&ItemRef::Type(a)));
    }
}
