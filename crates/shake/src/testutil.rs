//! Shared fixture for this crate's tests: builds small programs against a
//! fresh factory without going through a reader.

use std::sync::Arc;

use ahash::AHashMap;
use dexshrink_model::{
    AccessFlags, AppInfo, ClassKind, ClassRef, Code, DexClass, DexEncodedField, DexEncodedMethod,
    DexField, DexMethod, DexType, Instruction, ItemFactory, Origin,
};

struct PendingClass {
    kind: ClassKind,
    super_type: Option<String>,
    interfaces: Vec<String>,
    flags: AccessFlags,
    direct_methods: Vec<DexEncodedMethod>,
    virtual_methods: Vec<DexEncodedMethod>,
    static_fields: Vec<DexEncodedField>,
    instance_fields: Vec<DexEncodedField>,
}

pub(crate) struct ProgramBuilder {
    pub factory: Arc<ItemFactory>,
    classes: AHashMap<String, PendingClass>,
    order: Vec<String>,
}

impl ProgramBuilder {
    pub fn new() -> ProgramBuilder {
        ProgramBuilder {
            factory: ItemFactory::new(),
            classes: AHashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn define_class(&mut self, descriptor: &str, super_descriptor: Option<&str>) {
        self.define_class_with(descriptor, super_descriptor, &[], AccessFlags::PUBLIC);
    }

    pub fn define_class_with(
        &mut self,
        descriptor: &str,
        super_descriptor: Option<&str>,
        interfaces: &[&str],
        flags: AccessFlags,
    ) {
        self.order.push(descriptor.to_owned());
        self.classes.insert(
            descriptor.to_owned(),
            PendingClass {
                kind: ClassKind::Program,
                super_type: super_descriptor.map(str::to_owned),
                interfaces: interfaces.iter().map(|s| (*s).to_owned()).collect(),
                flags,
                direct_methods: Vec::new(),
                virtual_methods: Vec::new(),
                static_fields: Vec::new(),
                instance_fields: Vec::new(),
            },
        );
    }

    pub fn define_interface(&mut self, descriptor: &str) {
        self.define_class_with(
            descriptor,
            Some("Ljava/lang/Object;"),
            &[],
            AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT,
        );
    }

    pub fn type_ref(&self, descriptor: &str) -> DexType {
        self.factory.create_type(descriptor).unwrap()
    }

    pub fn method_ref(&self, holder: &str, name: &str, proto: &str) -> DexMethod {
        let holder = self.type_ref(holder);
        let proto = self.factory.create_proto_from_descriptor(proto).unwrap();
        self.factory.create_method(holder, name, proto)
    }

    pub fn field_ref(&self, holder: &str, name: &str, field_type: &str) -> DexField {
        let holder = self.type_ref(holder);
        let field_type = self.type_ref(field_type);
        self.factory.create_field(holder, name, field_type)
    }

    pub fn add_virtual_method(
        &mut self,
        holder: &str,
        name: &str,
        proto: &str,
        instructions: Option<Vec<Instruction>>,
    ) {
        let reference = self.method_ref(holder, name, proto);
        let mut method = DexEncodedMethod::new(reference, AccessFlags::PUBLIC);
        if let Some(instructions) = instructions {
            method = method.with_code(Code::new(instructions));
        } else {
            method.access_flags |= AccessFlags::ABSTRACT;
        }
        self.classes
            .get_mut(holder)
            .expect("class defined")
            .virtual_methods
            .push(method);
    }

    pub fn add_static_method(
        &mut self,
        holder: &str,
        name: &str,
        proto: &str,
        instructions: Vec<Instruction>,
    ) {
        let reference = self.method_ref(holder, name, proto);
        let method = DexEncodedMethod::new(
            reference,
            AccessFlags::PUBLIC | AccessFlags::STATIC,
        )
        .with_code(Code::new(instructions));
        self.classes
            .get_mut(holder)
            .expect("class defined")
            .direct_methods
            .push(method);
    }

    pub fn add_constructor(&mut self, holder: &str, instructions: Vec<Instruction>) {
        let reference = self.method_ref(holder, "<init>", "()V");
        let method = DexEncodedMethod::new(
            reference,
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
        )
        .with_code(Code::new(instructions));
        self.classes
            .get_mut(holder)
            .expect("class defined")
            .direct_methods
            .push(method);
    }

    pub fn add_instance_field(&mut self, holder: &str, name: &str, field_type: &str) {
        let reference = self.field_ref(holder, name, field_type);
        self.classes
            .get_mut(holder)
            .expect("class defined")
            .instance_fields
            .push(DexEncodedField::new(reference, AccessFlags::PRIVATE));
    }

    pub fn add_static_field(&mut self, holder: &str, name: &str, field_type: &str) {
        let reference = self.field_ref(holder, name, field_type);
        self.classes
            .get_mut(holder)
            .expect("class defined")
            .static_fields
            .push(DexEncodedField::new(
                reference,
                AccessFlags::PUBLIC | AccessFlags::STATIC,
            ));
    }

    pub fn build_classes(&mut self) -> Vec<ClassRef> {
        let mut result: Vec<ClassRef> = Vec::new();

        let object = DexClass::new(
            ClassKind::Library,
            self.factory.known().object_type.clone(),
            None,
            Vec::new(),
            AccessFlags::PUBLIC,
            vec![DexEncodedMethod::new(
                self.factory.known().object_init.clone(),
                AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
            )],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Origin::Unknown,
        )
        .unwrap();
        result.push(Arc::new(object));

        for descriptor in &self.order {
            let pending = self.classes.remove(descriptor).expect("pending class");
            let class = DexClass::new(
                pending.kind,
                self.factory.create_type(descriptor).unwrap(),
                pending
                    .super_type
                    .as_deref()
                    .map(|d| self.factory.create_type(d).unwrap()),
                pending
                    .interfaces
                    .iter()
                    .map(|d| self.factory.create_type(d).unwrap())
                    .collect(),
                pending.flags,
                pending.direct_methods,
                pending.virtual_methods,
                pending.static_fields,
                pending.instance_fields,
                Origin::Unknown,
            )
            .unwrap();
            result.push(Arc::new(class));
        }
        result
    }

    pub fn build(mut self) -> (Arc<ItemFactory>, AppInfo) {
        let classes = self.build_classes();
        let factory = self.factory.clone();
        let app_info = AppInfo::build(factory.clone(), classes).unwrap();
        (factory, app_info)
    }
}
