use ahash::{AHashMap, AHashSet};
use dexshrink_model::{
    AppInfo, ClassRef, DexField, DexMethod, DexProto, DexType, GraphLens, ItemRef,
};
use dexshrink_rules::{RepackagePolicy, RootSet};

use crate::errors::NamingError;
use crate::mapping::ParsedMapping;

/// Generates `a`, `b`, ... `z`, `aa`, `ab`, ... in order.
struct NameGenerator {
    index: usize,
}

impl NameGenerator {
    fn new() -> NameGenerator {
        NameGenerator { index: 0 }
    }

    fn next_raw(&mut self) -> String {
        let mut index = self.index;
        self.index += 1;
        let mut name = String::new();
        loop {
            name.insert(0, (b'a' + (index % 26) as u8) as char);
            index /= 26;
            if index == 0 {
                break;
            }
            index -= 1;
        }
        name
    }

    fn next_free(&mut self, is_used: impl Fn(&str) -> bool) -> String {
        loop {
            let candidate = self.next_raw();
            if !is_used(&candidate) {
                return candidate;
            }
        }
    }
}

/// Computes a renaming lens for every non-pinned class, field and method.
///
/// Generated names never reuse an original name visible in the same
/// namespace, which keeps lens lookups idempotent: no renamed reference is
/// itself the original of another mapping.
pub struct Minifier<'a> {
    app_info: &'a AppInfo,
    root_set: &'a RootSet,
    repackage: RepackagePolicy,
    applied: Option<&'a ParsedMapping>,
}

impl<'a> Minifier<'a> {
    pub fn new(
        app_info: &'a AppInfo,
        root_set: &'a RootSet,
        repackage: RepackagePolicy,
        applied: Option<&'a ParsedMapping>,
    ) -> Minifier<'a> {
        Minifier {
            app_info,
            root_set,
            repackage,
            applied,
        }
    }

    pub fn compute_renaming(&self, previous: GraphLens) -> Result<GraphLens, NamingError> {
        let mut classes: Vec<&ClassRef> = self.app_info.program_classes().collect();
        classes.sort_by(|a, b| a.class_type.cmp(&b.class_type));

        let type_map = self.rename_classes(&classes)?;
        let method_names = self.rename_methods(&classes)?;
        let field_names = self.rename_fields(&classes)?;
        log::debug!(
            "renaming {} classes, {} methods, {} fields",
            type_map.len(),
            method_names.len(),
            field_names.len()
        );

        // assemble the complete reference maps: members of a renamed class
        // get new references even when their own name is unchanged
        let factory = self.app_info.factory();
        let mut builder = GraphLens::nested(previous);
        for (from, to) in &type_map {
            builder = builder.map_type(from.clone(), to.clone());
        }

        let mapped_type = |ty: &DexType| -> Result<DexType, NamingError> {
            map_type(ty, &type_map, self.app_info)
        };

        for class in &classes {
            let new_holder = mapped_type(&class.class_type)?;
            for field in class.fields() {
                let name = field_names
                    .get(&field.field)
                    .map(String::as_str)
                    .unwrap_or_else(|| field.field.name().as_str());
                let new_field =
                    factory.create_field(new_holder.clone(), name, mapped_type(field.field.field_type())?);
                builder = builder.map_field(field.field.clone(), new_field);
            }
            for method in class.methods() {
                let name = method_names
                    .get(&method.method)
                    .map(String::as_str)
                    .unwrap_or_else(|| method.method.name().as_str());
                let new_proto = map_proto(method.method.proto(), &type_map, self.app_info)?;
                let new_method = factory.create_method(new_holder.clone(), name, new_proto);
                builder = builder.map_method(method.method.clone(), new_method);
            }
        }

        Ok(builder.build())
    }

    /// Class-name scheme: per-package, flattened, or repackaged.
    fn rename_classes(
        &self,
        classes: &[&ClassRef],
    ) -> Result<AHashMap<DexType, DexType>, NamingError> {
        let factory = self.app_info.factory();

        // applied-mapping assignments win; detect conflicting targets
        let mut forced: AHashMap<String, String> = AHashMap::new();
        let mut forced_targets: AHashMap<String, String> = AHashMap::new();
        if let Some(applied) = self.applied {
            for (original, renamed) in applied.class_renamings() {
                if let Some(previous) = forced_targets.get(renamed) {
                    if previous != original {
                        return Err(NamingError::MappingConflict {
                            first: previous.clone(),
                            second: original.to_owned(),
                            name: renamed.to_owned(),
                        });
                    }
                }
                forced_targets.insert(renamed.to_owned(), original.to_owned());
                forced.insert(original.to_owned(), renamed.to_owned());
            }
        }

        // every name already visible in a package is off limits
        let mut used: AHashMap<String, AHashSet<String>> = AHashMap::new();
        for class in self.app_info.classes() {
            if let (Some(package), Some(simple)) = (
                class.class_type.package(),
                class.class_type.simple_name(),
            ) {
                used.entry(package.to_owned())
                    .or_default()
                    .insert(simple.to_owned());
            }
        }
        for target in forced.values() {
            let (package, simple) = split_java_name(target);
            used.entry(package).or_default().insert(simple);
        }

        let mut generators: AHashMap<String, NameGenerator> = AHashMap::new();
        let mut flatten_packages: AHashMap<String, String> = AHashMap::new();
        let mut package_generator = NameGenerator::new();

        let mut type_map = AHashMap::new();
        for class in classes {
            let ty = &class.class_type;
            let java_name = ty.java_name();

            let new_java_name = if let Some(target) = forced.get(&java_name) {
                target.clone()
            } else if self.root_set.is_type_pinned(ty) {
                continue;
            } else {
                let target_package = match &self.repackage {
                    RepackagePolicy::None => ty.package().unwrap_or("").to_owned(),
                    RepackagePolicy::All(package) => package.replace('.', "/"),
                    RepackagePolicy::Flatten(package) => {
                        let original = ty.package().unwrap_or("").to_owned();
                        flatten_packages
                            .entry(original)
                            .or_insert_with(|| {
                                let prefix = package.replace('.', "/");
                                let sub = package_generator.next_raw();
                                if prefix.is_empty() {
                                    sub
                                } else {
                                    format!("{prefix}/{sub}")
                                }
                            })
                            .clone()
                    }
                };
                let used_in_package = used.entry(target_package.clone()).or_default();
                let generator = generators
                    .entry(target_package.clone())
                    .or_insert_with(NameGenerator::new);
                let simple = generator.next_free(|candidate| used_in_package.contains(candidate));
                used_in_package.insert(simple.clone());
                if target_package.is_empty() {
                    simple
                } else {
                    format!("{}.{simple}", target_package.replace('/', "."))
                }
            };

            let descriptor = format!("L{};", new_java_name.replace('.', "/"));
            let new_type = factory
                .create_type(&descriptor)
                .map_err(|_| NamingError::InvalidGenerated(descriptor.clone()))?;
            if new_type != *ty {
                type_map.insert(ty.clone(), new_type);
            }
        }
        Ok(type_map)
    }

    /// Virtual methods are renamed per override/co-implementation
    /// equivalence class; direct methods per class. Initializers keep their
    /// names.
    fn rename_methods(
        &self,
        classes: &[&ClassRef],
    ) -> Result<AHashMap<DexMethod, String>, NamingError> {
        let mut groups = UnionFind::new();
        let mut library_locked: AHashSet<DexMethod> = AHashSet::new();

        for class in classes {
            for method in &class.virtual_methods {
                groups.ensure(&method.method);
                for super_type in self.all_strict_supertypes(&class.class_type) {
                    let Some(super_class) = self.app_info.definition_for(&super_type) else {
                        continue;
                    };
                    let Some(super_method) = super_class
                        .methods()
                        .find(|m| m.method.matches_signature(&method.method))
                    else {
                        continue;
                    };
                    if super_class.is_program() {
                        groups.union(&method.method, &super_method.method);
                    } else {
                        // overriding a library method locks the whole group
                        library_locked.insert(method.method.clone());
                    }
                }
            }
        }

        let mut members_by_group: AHashMap<DexMethod, Vec<DexMethod>> = AHashMap::new();
        for member in groups.members() {
            members_by_group
                .entry(groups.find(&member))
                .or_default()
                .push(member);
        }
        let mut sorted_groups: Vec<(DexMethod, Vec<DexMethod>)> =
            members_by_group.into_iter().collect();
        for (_, members) in &mut sorted_groups {
            members.sort();
        }
        sorted_groups.sort_by(|a, b| a.1[0].cmp(&b.1[0]));

        let mut used: AHashMap<DexType, AHashSet<String>> = AHashMap::new();
        let mut assignments: AHashMap<DexMethod, String> = AHashMap::new();
        let mut generator = NameGenerator::new();

        for (_, members) in sorted_groups {
            if members.iter().any(|m| {
                m.is_instance_initializer()
                    || m.is_class_initializer()
                    || self.root_set.is_pinned(&ItemRef::Method(m.clone()))
                    || library_locked.contains(m)
            }) {
                continue;
            }

            if let Some(forced) = self.forced_method_name(&members)? {
                for member in &members {
                    assignments.insert(member.clone(), forced.clone());
                }
                continue;
            }

            // the chosen name must be fresh in every class the group's
            // dispatch can touch
            let mut affected: AHashSet<DexType> = AHashSet::new();
            for member in &members {
                affected.insert(member.holder().clone());
                affected.extend(self.app_info.subtypes(member.holder()));
            }
            for ty in &affected {
                self.seed_used_method_names(ty, &mut used);
            }
            let name = generator.next_free(|candidate| {
                affected
                    .iter()
                    .any(|ty| used.get(ty).is_some_and(|set| set.contains(candidate)))
            });
            for ty in &affected {
                used.entry(ty.clone()).or_default().insert(name.clone());
            }
            for member in &members {
                assignments.insert(member.clone(), name.clone());
            }
        }

        // direct methods: per-class namespaces
        for class in classes {
            let holder = &class.class_type;
            self.seed_used_method_names(holder, &mut used);
            let mut class_generator = NameGenerator::new();
            let mut direct: Vec<&DexMethod> =
                class.direct_methods.iter().map(|m| &m.method).collect();
            direct.sort();
            for method in direct {
                if method.is_instance_initializer()
                    || method.is_class_initializer()
                    || self.root_set.is_pinned(&ItemRef::Method(method.clone()))
                {
                    continue;
                }
                if let Some(forced) = self.forced_method_name(std::slice::from_ref(method))? {
                    assignments.insert(method.clone(), forced);
                    continue;
                }
                let used_here = used.entry(holder.clone()).or_default();
                let name = class_generator.next_free(|candidate| used_here.contains(candidate));
                used_here.insert(name.clone());
                assignments.insert(method.clone(), name);
            }
        }

        Ok(assignments)
    }

    /// Fields live in their own per-class namespace.
    fn rename_fields(
        &self,
        classes: &[&ClassRef],
    ) -> Result<AHashMap<DexField, String>, NamingError> {
        let mut assignments = AHashMap::new();
        for class in classes {
            let mut used: AHashSet<String> = class
                .fields()
                .map(|f| f.field.name().as_str().to_owned())
                .collect();
            let mut forced_targets: AHashMap<String, String> = AHashMap::new();
            let mut generator = NameGenerator::new();
            let mut fields: Vec<&DexField> = class.fields().map(|f| &f.field).collect();
            fields.sort();
            for field in fields {
                if self.root_set.is_pinned(&ItemRef::Field(field.clone())) {
                    continue;
                }
                if let Some(forced) = self.forced_field_name(field) {
                    if let Some(previous) = forced_targets.get(&forced) {
                        if previous != field.name().as_str() {
                            return Err(NamingError::MappingConflict {
                                first: previous.clone(),
                                second: field.name().as_str().to_owned(),
                                name: forced,
                            });
                        }
                    }
                    forced_targets.insert(forced.clone(), field.name().as_str().to_owned());
                    used.insert(forced.clone());
                    assignments.insert(field.clone(), forced);
                    continue;
                }
                let name = generator.next_free(|candidate| used.contains(candidate));
                used.insert(name.clone());
                assignments.insert(field.clone(), name);
            }
        }
        Ok(assignments)
    }

    fn forced_method_name(&self, members: &[DexMethod]) -> Result<Option<String>, NamingError> {
        let Some(applied) = self.applied else {
            return Ok(None);
        };
        let mut chosen: Option<String> = None;
        for member in members {
            let holder_name = member.holder().java_name();
            let Some(class) = applied.classes.iter().find(|c| c.original == holder_name) else {
                continue;
            };
            for record in &class.members {
                if !record.is_method || record.original_name != member.name().as_str() {
                    continue;
                }
                if let Some(parameters) = &record.parameters {
                    let actual: Vec<String> = member
                        .proto()
                        .parameters()
                        .iter()
                        .map(|p| p.java_name())
                        .collect();
                    if parameters != &actual {
                        continue;
                    }
                }
                match &chosen {
                    None => chosen = Some(record.renamed_name.clone()),
                    Some(existing) if existing != &record.renamed_name => {
                        return Err(NamingError::MappingConflict {
                            first: existing.clone(),
                            second: record.renamed_name.clone(),
                            name: member.name().as_str().to_owned(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(chosen)
    }

    fn forced_field_name(&self, field: &DexField) -> Option<String> {
        let applied = self.applied?;
        let holder_name = field.holder().java_name();
        let class = applied.classes.iter().find(|c| c.original == holder_name)?;
        class
            .members
            .iter()
            .find(|record| !record.is_method && record.original_name == field.name().as_str())
            .map(|record| record.renamed_name.clone())
    }

    fn seed_used_method_names(&self, ty: &DexType, used: &mut AHashMap<DexType, AHashSet<String>>) {
        if used.contains_key(ty) {
            return;
        }
        let mut names = AHashSet::new();
        if let Some(class) = self.app_info.definition_for(ty) {
            for method in class.methods() {
                names.insert(method.method.name().as_str().to_owned());
            }
        }
        // names of non-program ancestors are reserved along the chain
        for super_type in self.all_strict_supertypes(ty) {
            if let Some(class) = self.app_info.definition_for(&super_type) {
                if !class.is_program() {
                    for method in class.methods() {
                        names.insert(method.method.name().as_str().to_owned());
                    }
                }
            }
        }
        used.insert(ty.clone(), names);
    }

    fn all_strict_supertypes(&self, ty: &DexType) -> Vec<DexType> {
        let mut result = Vec::new();
        let mut visited = AHashSet::new();
        let mut worklist = Vec::new();
        if let Some(class) = self.app_info.definition_for(ty) {
            if let Some(super_type) = &class.super_type {
                worklist.push(super_type.clone());
            }
            worklist.extend(class.interfaces.iter().cloned());
        }
        while let Some(current) = worklist.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(class) = self.app_info.definition_for(&current) {
                if let Some(super_type) = &class.super_type {
                    worklist.push(super_type.clone());
                }
                worklist.extend(class.interfaces.iter().cloned());
            }
            result.push(current);
        }
        result
    }
}

fn split_java_name(java_name: &str) -> (String, String) {
    match java_name.rsplit_once('.') {
        Some((package, simple)) => (package.replace('.', "/"), simple.to_owned()),
        None => (String::new(), java_name.to_owned()),
    }
}

fn map_type(
    ty: &DexType,
    type_map: &AHashMap<DexType, DexType>,
    app_info: &AppInfo,
) -> Result<DexType, NamingError> {
    if let Some(mapped) = type_map.get(ty) {
        return Ok(mapped.clone());
    }
    if ty.is_array() {
        let descriptor = ty.descriptor().as_str();
        let depth = descriptor.len() - descriptor.trim_start_matches('[').len();
        let element = &descriptor[depth..];
        let factory = app_info.factory();
        let element_type = factory
            .create_type(element)
            .map_err(|_| NamingError::InvalidGenerated(element.to_owned()))?;
        if let Some(mapped_element) = type_map.get(&element_type) {
            let new_descriptor =
                format!("{}{}", "[".repeat(depth), mapped_element.descriptor().as_str());
            return factory
                .create_type(&new_descriptor)
                .map_err(|_| NamingError::InvalidGenerated(new_descriptor));
        }
    }
    Ok(ty.clone())
}

fn map_proto(
    proto: &DexProto,
    type_map: &AHashMap<DexType, DexType>,
    app_info: &AppInfo,
) -> Result<DexProto, NamingError> {
    let return_type = map_type(proto.return_type(), type_map, app_info)?;
    let mut parameters = Vec::with_capacity(proto.parameters().len());
    for parameter in proto.parameters() {
        parameters.push(map_type(parameter, type_map, app_info)?);
    }
    app_info
        .factory()
        .create_proto(return_type, &parameters)
        .map_err(|_| NamingError::InvalidGenerated(proto.descriptor().as_str().to_owned()))
}

/// Union-find over interned method references.
struct UnionFind {
    indices: AHashMap<DexMethod, usize>,
    parents: Vec<usize>,
    items: Vec<DexMethod>,
}

impl UnionFind {
    fn new() -> UnionFind {
        UnionFind {
            indices: AHashMap::new(),
            parents: Vec::new(),
            items: Vec::new(),
        }
    }

    fn ensure(&mut self, method: &DexMethod) -> usize {
        if let Some(&index) = self.indices.get(method) {
            return index;
        }
        let index = self.parents.len();
        self.indices.insert(method.clone(), index);
        self.parents.push(index);
        self.items.push(method.clone());
        index
    }

    fn find_index(&mut self, mut index: usize) -> usize {
        while self.parents[index] != index {
            self.parents[index] = self.parents[self.parents[index]];
            index = self.parents[index];
        }
        index
    }

    fn union(&mut self, a: &DexMethod, b: &DexMethod) {
        let a = self.ensure(a);
        let b = self.ensure(b);
        let root_a = self.find_index(a);
        let root_b = self.find_index(b);
        if root_a != root_b {
            self.parents[root_b] = root_a;
        }
    }

    fn find(&mut self, method: &DexMethod) -> DexMethod {
        let index = self.ensure(method);
        let root = self.find_index(index);
        self.items[root].clone()
    }

    fn members(&self) -> Vec<DexMethod> {
        self.items.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dexshrink_model::{
        AccessFlags, ClassKind, DexClass, DexEncodedField, DexEncodedMethod, InvokeKind,
        ItemFactory, Origin,
    };

    use super::*;
    use crate::mapping::write_mapping;

    struct Fixture {
        factory: Arc<ItemFactory>,
        classes: Vec<ClassRef>,
    }

    use dexshrink_model::ClassRef;

    impl Fixture {
        fn new() -> Fixture {
            let factory = ItemFactory::new();
            let object = DexClass::new(
                ClassKind::Library,
                factory.known().object_type.clone(),
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
            Fixture {
                factory,
                classes: vec![Arc::new(object)],
            }
        }

        fn add_class(
            &mut self,
            descriptor: &str,
            super_descriptor: &str,
            virtual_methods: &[&str],
            fields: &[(&str, &str)],
        ) {
            let ty = self.factory.create_type(descriptor).unwrap();
            let void = self.factory.create_type("V").unwrap();
            let proto = self.factory.create_proto(void, &[]).unwrap();
            let virtual_methods = virtual_methods
                .iter()
                .map(|name| {
                    let method = self.factory.create_method(ty.clone(), name, proto.clone());
                    DexEncodedMethod::new(method, AccessFlags::PUBLIC)
                })
                .collect();
            let instance_fields = fields
                .iter()
                .map(|(name, field_type)| {
                    let field_type = self.factory.create_type(field_type).unwrap();
                    let field = self.factory.create_field(ty.clone(), name, field_type);
                    DexEncodedField::new(field, AccessFlags::PRIVATE)
                })
                .collect();
            let class = DexClass::new(
                ClassKind::Program,
                ty,
                Some(self.factory.create_type(super_descriptor).unwrap()),
                Vec::new(),
                AccessFlags::PUBLIC,
                Vec::new(),
                virtual_methods,
                Vec::new(),
                instance_fields,
                Origin::Unknown,
            )
            .unwrap();
            self.classes.push(Arc::new(class));
        }

        fn app_info(self) -> (Arc<ItemFactory>, AppInfo) {
            let factory = self.factory.clone();
            let app_info = AppInfo::build(factory.clone(), self.classes).unwrap();
            (factory, app_info)
        }
    }

    fn method_ref(factory: &ItemFactory, holder: &str, name: &str) -> DexMethod {
        let holder = factory.create_type(holder).unwrap();
        let void = factory.create_type("V").unwrap();
        let proto = factory.create_proto(void, &[]).unwrap();
        factory.create_method(holder, name, proto)
    }

    #[test]
    fn override_pairs_share_their_new_name() {
        let mut fx = Fixture::new();
        fx.add_class("Lcom/example/P;", "Ljava/lang/Object;", &["foo"], &[]);
        fx.add_class("Lcom/example/Q;", "Lcom/example/P;", &["foo"], &[]);
        let (factory, app_info) = fx.app_info();

        let root_set = RootSet::default();
        let minifier = Minifier::new(&app_info, &root_set, RepackagePolicy::None, None);
        let lens = minifier.compute_renaming(GraphLens::identity()).unwrap();

        let p_foo = method_ref(&factory, "Lcom/example/P;", "foo");
        let q_foo = method_ref(&factory, "Lcom/example/Q;", "foo");
        let p_new = lens.lookup_method(&p_foo, None, InvokeKind::Virtual).method;
        let q_new = lens.lookup_method(&q_foo, None, InvokeKind::Virtual).method;
        assert_eq!(p_new.name(), q_new.name());
        assert_ne!(p_new.name().as_str(), "foo");
        assert_ne!(p_new.holder(), q_new.holder());
    }

    #[test]
    fn pinned_names_survive_verbatim() {
        let mut fx = Fixture::new();
        fx.add_class("Lcom/example/Keep;", "Ljava/lang/Object;", &["kept"], &[]);
        let (factory, app_info) = fx.app_info();

        let keep_ty = factory.create_type("Lcom/example/Keep;").unwrap();
        let kept = method_ref(&factory, "Lcom/example/Keep;", "kept");
        let mut root_set = RootSet::default();
        root_set.pinned.insert(ItemRef::Type(keep_ty.clone()));
        root_set.pinned.insert(ItemRef::Method(kept.clone()));

        let minifier = Minifier::new(&app_info, &root_set, RepackagePolicy::None, None);
        let lens = minifier.compute_renaming(GraphLens::identity()).unwrap();

        assert_eq!(lens.lookup_type(&keep_ty), keep_ty);
        assert_eq!(
            lens.lookup_method(&kept, None, InvokeKind::Virtual).method,
            kept
        );
    }

    #[test]
    fn library_overrides_are_never_renamed() {
        let mut fx = Fixture::new();
        // toString overrides java.lang.Object
        let object_ty = fx.factory.known().object_type.clone();
        let string_ty = fx.factory.known().string_type.clone();
        let to_string_proto = fx.factory.create_proto(string_ty, &[]).unwrap();
        let object_to_string =
            fx.factory
                .create_method(object_ty.clone(), "toString", to_string_proto.clone());
        // rebuild the object class with toString on it
        fx.classes[0] = Arc::new(
            DexClass::new(
                ClassKind::Library,
                object_ty,
                None,
                Vec::new(),
                AccessFlags::PUBLIC,
                Vec::new(),
                vec![DexEncodedMethod::new(object_to_string, AccessFlags::PUBLIC)],
                Vec::new(),
                Vec::new(),
                Origin::Unknown,
            )
            .unwrap(),
        );
        let ty = fx.factory.create_type("Lcom/example/A;").unwrap();
        let my_to_string = fx
            .factory
            .create_method(ty.clone(), "toString", to_string_proto);
        let class = DexClass::new(
            ClassKind::Program,
            ty,
            Some(fx.factory.known().object_type.clone()),
            Vec::new(),
            AccessFlags::PUBLIC,
            Vec::new(),
            vec![DexEncodedMethod::new(
                my_to_string.clone(),
                AccessFlags::PUBLIC,
            )],
            Vec::new(),
            Vec::new(),
            Origin::Unknown,
        )
        .unwrap();
        fx.classes.push(Arc::new(class));
        let (_, app_info) = fx.app_info();

        let root_set = RootSet::default();
        let minifier = Minifier::new(&app_info, &root_set, RepackagePolicy::None, None);
        let lens = minifier.compute_renaming(GraphLens::identity()).unwrap();

        let renamed = lens
            .lookup_method(&my_to_string, None, InvokeKind::Virtual)
            .method;
        assert_eq!(renamed.name().as_str(), "toString");
    }

    #[test]
    fn applied_mapping_wins_and_conflicts_abort() {
        let mut fx = Fixture::new();
        fx.add_class("LA;", "Ljava/lang/Object;", &["m1"], &[]);
        let (factory, app_info) = fx.app_info();

        let mapping = ParsedMapping::parse("A -> X:\n    void m1() -> n\n").unwrap();
        let root_set = RootSet::default();
        let minifier = Minifier::new(&app_info, &root_set, RepackagePolicy::None, Some(&mapping));
        let lens = minifier.compute_renaming(GraphLens::identity()).unwrap();

        let a = factory.create_type("LA;").unwrap();
        assert_eq!(lens.lookup_type(&a).java_name(), "X");
        let m1 = method_ref(&factory, "LA;", "m1");
        let renamed = lens.lookup_method(&m1, None, InvokeKind::Virtual).method;
        assert_eq!(renamed.name().as_str(), "n");
        assert_eq!(renamed.holder().java_name(), "X");

        // two classes forced onto one name is a rule conflict
        let mut fx = Fixture::new();
        fx.add_class("LA;", "Ljava/lang/Object;", &[], &[]);
        fx.add_class("LB;", "Ljava/lang/Object;", &[], &[]);
        let (_, app_info) = fx.app_info();
        let conflicting = ParsedMapping::parse("A -> X:\nB -> X:\n").unwrap();
        let minifier = Minifier::new(
            &app_info,
            &root_set,
            RepackagePolicy::None,
            Some(&conflicting),
        );
        assert!(matches!(
            minifier.compute_renaming(GraphLens::identity()),
            Err(NamingError::MappingConflict { .. })
        ));
    }

    #[test]
    fn repackage_moves_all_classes_into_target() {
        let mut fx = Fixture::new();
        fx.add_class("Lcom/example/A;", "Ljava/lang/Object;", &[], &[]);
        fx.add_class("Lorg/other/B;", "Ljava/lang/Object;", &[], &[]);
        let (factory, app_info) = fx.app_info();

        let root_set = RootSet::default();
        let minifier = Minifier::new(
            &app_info,
            &root_set,
            RepackagePolicy::All("o".to_owned()),
            None,
        );
        let lens = minifier.compute_renaming(GraphLens::identity()).unwrap();

        let a = factory.create_type("Lcom/example/A;").unwrap();
        let b = factory.create_type("Lorg/other/B;").unwrap();
        assert!(lens.lookup_type(&a).java_name().starts_with("o."));
        assert!(lens.lookup_type(&b).java_name().starts_with("o."));
        assert_ne!(lens.lookup_type(&a), lens.lookup_type(&b));
    }

    #[test]
    fn field_types_are_rewritten_through_the_class_renaming() {
        let mut fx = Fixture::new();
        fx.add_class("Lcom/example/A;", "Ljava/lang/Object;", &[], &[]);
        fx.add_class(
            "Lcom/example/B;",
            "Ljava/lang/Object;",
            &[],
            &[("other", "Lcom/example/A;")],
        );
        let (factory, app_info) = fx.app_info();

        let root_set = RootSet::default();
        let minifier = Minifier::new(&app_info, &root_set, RepackagePolicy::None, None);
        let lens = minifier.compute_renaming(GraphLens::identity()).unwrap();

        let a = factory.create_type("Lcom/example/A;").unwrap();
        let field = factory.create_field(
            factory.create_type("Lcom/example/B;").unwrap(),
            "other",
            a.clone(),
        );
        let renamed = lens.lookup_field(&field);
        assert_eq!(renamed.field_type(), &lens.lookup_type(&a));
        assert_ne!(renamed.name().as_str(), "other");
    }

    #[test]
    fn mapping_round_trips_through_the_emitter() {
        let mut fx = Fixture::new();
        fx.add_class(
            "Lcom/example/Main;",
            "Ljava/lang/Object;",
            &["run"],
            &[("counter", "I")],
        );
        let (_, app_info) = fx.app_info();

        let root_set = RootSet::default();
        let minifier = Minifier::new(&app_info, &root_set, RepackagePolicy::None, None);
        let lens = minifier.compute_renaming(GraphLens::identity()).unwrap();

        let classes: Vec<ClassRef> = app_info.program_classes().cloned().collect();
        let mut buffer = Vec::new();
        write_mapping(&classes, &lens, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        let parsed = ParsedMapping::parse(&text).unwrap();
        assert_eq!(parsed.classes.len(), 1);
        let class = &parsed.classes[0];
        assert_eq!(class.original, "com.example.Main");

        // feeding the emitted map back reproduces the same lens
        let minifier =
            Minifier::new(&app_info, &root_set, RepackagePolicy::None, Some(&parsed));
        let lens2 = minifier.compute_renaming(GraphLens::identity()).unwrap();
        let main_ty = app_info.factory().create_type("Lcom/example/Main;").unwrap();
        assert_eq!(lens.lookup_type(&main_ty), lens2.lookup_type(&main_ty));
        let run = method_ref(app_info.factory(), "Lcom/example/Main;", "run");
        assert_eq!(
            lens.lookup_method(&run, None, InvokeKind::Virtual).method,
            lens2.lookup_method(&run, None, InvokeKind::Virtual).method
        );
    }
}
