//! End-to-end shrink scenarios driving the full pipeline through the
//! in-memory reader.

use std::io::Write;

use dexshrink::model::{
    AccessFlags, ClassKind, Code, DexClass, DexEncodedMethod, DexMethod, DexType, Instruction,
    InvokeKind, ItemFactory, Origin,
};
use dexshrink::rules::parse_rules;
use dexshrink::{CollectionReader, DataEntry, Options, Pipeline, ShrinkError, ShrinkResult};
use std::sync::Arc;

struct AppBuilder {
    factory: Arc<ItemFactory>,
    reader: CollectionReader,
}

impl AppBuilder {
    fn new() -> AppBuilder {
        let factory = ItemFactory::new();
        let mut reader = CollectionReader::default();

        let object_init = factory.known().object_init.clone();
        let object = DexClass::new(
            ClassKind::Library,
            factory.known().object_type.clone(),
            None,
            Vec::new(),
            AccessFlags::PUBLIC,
            vec![DexEncodedMethod::new(
                object_init,
                AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
            )],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Origin::Unknown,
        )
        .unwrap();
        reader.library.push(object);

        AppBuilder { factory, reader }
    }

    fn ty(&self, descriptor: &str) -> DexType {
        self.factory.create_type(descriptor).unwrap()
    }

    fn method(&self, holder: &str, name: &str, proto: &str) -> DexMethod {
        let holder = self.ty(holder);
        let proto = self.factory.create_proto_from_descriptor(proto).unwrap();
        self.factory.create_method(holder, name, proto)
    }

    fn class(
        &mut self,
        descriptor: &str,
        interfaces: &[&str],
        flags: AccessFlags,
        methods: Vec<DexEncodedMethod>,
    ) {
        let (direct, virtuals): (Vec<_>, Vec<_>) = methods
            .into_iter()
            .partition(|m| !m.access_flags.is_virtual() || m.method.is_class_initializer());
        let class = DexClass::new(
            ClassKind::Program,
            self.ty(descriptor),
            Some(self.factory.known().object_type.clone()),
            interfaces.iter().map(|i| self.ty(i)).collect(),
            flags,
            direct,
            virtuals,
            Vec::new(),
            Vec::new(),
            Origin::Unknown,
        )
        .unwrap();
        self.reader.program.push(class);
    }

    fn subclass(
        &mut self,
        descriptor: &str,
        super_descriptor: &str,
        methods: Vec<DexEncodedMethod>,
    ) {
        let (direct, virtuals): (Vec<_>, Vec<_>) = methods
            .into_iter()
            .partition(|m| !m.access_flags.is_virtual() || m.method.is_class_initializer());
        let class = DexClass::new(
            ClassKind::Program,
            self.ty(descriptor),
            Some(self.ty(super_descriptor)),
            Vec::new(),
            AccessFlags::PUBLIC,
            direct,
            virtuals,
            Vec::new(),
            Vec::new(),
            Origin::Unknown,
        )
        .unwrap();
        self.reader.program.push(class);
    }

    fn virtual_method(&self, holder: &str, name: &str, proto: &str, code: Vec<Instruction>) -> DexEncodedMethod {
        DexEncodedMethod::new(self.method(holder, name, proto), AccessFlags::PUBLIC)
            .with_code(Code::new(code))
    }

    fn abstract_method(&self, holder: &str, name: &str, proto: &str) -> DexEncodedMethod {
        DexEncodedMethod::new(
            self.method(holder, name, proto),
            AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
        )
    }

    fn static_method(&self, holder: &str, name: &str, proto: &str, code: Vec<Instruction>) -> DexEncodedMethod {
        DexEncodedMethod::new(
            self.method(holder, name, proto),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
        )
        .with_code(Code::new(code))
    }

    fn constructor(&self, holder: &str, code: Vec<Instruction>) -> DexEncodedMethod {
        DexEncodedMethod::new(
            self.method(holder, "<init>", "()V"),
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
        )
        .with_code(Code::new(code))
    }

    fn run(self, rules_text: &str, options: Options) -> Result<ShrinkResult, ShrinkError> {
        let rules = parse_rules(rules_text).expect("rules parse");
        Pipeline::new(options).run(&self.factory, &self.reader, &rules)
    }
}

fn find_class<'r>(result: &'r ShrinkResult, java_name: &str) -> Option<&'r dexshrink::model::ClassRef> {
    result
        .classes
        .iter()
        .find(|c| c.class_type.java_name() == java_name)
}

#[test]
fn dead_method_is_eliminated_and_kept_method_survives_unrenamed() {
    let mut app = AppBuilder::new();
    app.class(
        "LA;",
        &[],
        AccessFlags::PUBLIC,
        vec![
            app.virtual_method("LA;", "m1", "()V", vec![Instruction::ReturnVoid]),
            app.virtual_method("LA;", "m2", "()V", vec![Instruction::ReturnVoid]),
        ],
    );

    let result = app
        .run("-keep class A { void m1(); }", Options::default())
        .unwrap();

    let a = find_class(&result, "A").expect("A survives under its own name");
    assert!(a.methods().any(|m| m.method.name().as_str() == "m1"));
    assert!(!a.methods().any(|m| m.method.name().as_str() == "m2"));
    assert_eq!(result.stats.output_classes, 1);
}

#[test]
fn interface_dispatch_keeps_only_the_instantiated_implementation() {
    let mut app = AppBuilder::new();
    app.class(
        "LI;",
        &[],
        AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT,
        vec![app.abstract_method("LI;", "f", "()V")],
    );
    app.class(
        "LC;",
        &["LI;"],
        AccessFlags::PUBLIC,
        vec![
            app.constructor("LC;", vec![Instruction::ReturnVoid]),
            app.virtual_method("LC;", "f", "()V", vec![Instruction::ReturnVoid]),
        ],
    );
    app.class(
        "LD;",
        &["LI;"],
        AccessFlags::PUBLIC,
        vec![app.virtual_method("LD;", "f", "()V", vec![Instruction::ReturnVoid])],
    );
    let main_body = vec![
        Instruction::NewInstance(app.ty("LC;")),
        Instruction::InvokeDirect(app.method("LC;", "<init>", "()V")),
        Instruction::InvokeInterface(app.method("LI;", "f", "()V")),
        Instruction::ReturnVoid,
    ];
    app.class(
        "LMain;",
        &[],
        AccessFlags::PUBLIC,
        vec![app.static_method("LMain;", "main", "([Ljava/lang/String;)V", main_body)],
    );

    let options = Options {
        minification: false,
        ..Options::default()
    };
    let result = app
        .run(
            "-keep class Main { public static void main(java.lang.String[]); }",
            options,
        )
        .unwrap();

    let c = find_class(&result, "C").expect("C survives");
    assert!(c.methods().any(|m| m.method.name().as_str() == "f"));
    assert!(find_class(&result, "D").is_none(), "D must be removed");
    let i = find_class(&result, "I").expect("I survives");
    assert!(
        i.methods().any(|m| m.method.name().as_str() == "f"),
        "I.f stays as a virtual target"
    );
}

#[test]
fn service_loader_keeps_the_listed_implementation() {
    let mut app = AppBuilder::new();
    app.class(
        "LS;",
        &[],
        AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT,
        vec![],
    );
    app.class(
        "LS$Impl;",
        &["LS;"],
        AccessFlags::PUBLIC,
        vec![app.constructor("LS$Impl;", vec![Instruction::ReturnVoid])],
    );
    let load = app.factory.known().service_loader_load.clone();
    let main_body = vec![
        Instruction::ConstClass(app.ty("LS;")),
        Instruction::InvokeStatic(load),
        Instruction::ReturnVoid,
    ];
    app.class(
        "LMain;",
        &[],
        AccessFlags::PUBLIC,
        vec![app.static_method("LMain;", "main", "([Ljava/lang/String;)V", main_body)],
    );
    app.reader.data_entries.push(DataEntry {
        name: "META-INF/services/S".to_owned(),
        bytes: b"S$Impl\n".to_vec(),
        feature: None,
    });

    let options = Options {
        minification: false,
        ..Options::default()
    };
    let result = app
        .run(
            "-keep class Main { public static void main(java.lang.String[]); }",
            options,
        )
        .unwrap();

    let implementation = find_class(&result, "S$Impl").expect("implementation survives");
    assert!(
        implementation
            .direct_methods
            .iter()
            .any(|m| m.method.is_instance_initializer()),
        "no-arg constructor stays live"
    );
}

#[test]
fn minification_renames_override_pairs_identically() {
    let mut app = AppBuilder::new();
    app.class(
        "LP;",
        &[],
        AccessFlags::PUBLIC,
        vec![app.virtual_method("LP;", "foo", "()V", vec![Instruction::ReturnVoid])],
    );
    app.subclass(
        "LQ;",
        "LP;",
        vec![app.virtual_method("LQ;", "foo", "()V", vec![Instruction::ReturnVoid])],
    );
    let p_foo = app.method("LP;", "foo", "()V");
    let q_foo = app.method("LQ;", "foo", "()V");

    let result = app
        .run("-keep,allowobfuscation class ** { *; }", Options::default())
        .unwrap();

    let p_new = result.lens.lookup_method(&p_foo, None, InvokeKind::Virtual).method;
    let q_new = result.lens.lookup_method(&q_foo, None, InvokeKind::Virtual).method;
    assert_eq!(p_new.name(), q_new.name(), "override pair shares one name");
    assert_ne!(p_new.name().as_str(), "foo");
}

#[test]
fn applied_mapping_is_respected_and_re_emitted() {
    let mut mapping_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(mapping_file, "A -> X:").unwrap();
    writeln!(mapping_file, "    void m1() -> n").unwrap();
    mapping_file.flush().unwrap();

    let mut app = AppBuilder::new();
    app.class(
        "LA;",
        &[],
        AccessFlags::PUBLIC,
        vec![
            app.virtual_method("LA;", "m1", "()V", vec![Instruction::ReturnVoid]),
            app.virtual_method("LA;", "m2", "()V", vec![Instruction::ReturnVoid]),
        ],
    );

    let rules = format!(
        "-keep,allowobfuscation class A {{ void m1(); }}\n-applymapping {}\n-printmapping\n",
        mapping_file.path().display()
    );
    let result = app.run(&rules, Options::default()).unwrap();

    let renamed = find_class(&result, "X").expect("A is renamed to X");
    assert!(renamed.methods().any(|m| m.method.name().as_str() == "n"));

    let mapping = result.mapping.expect("mapping requested");
    assert!(mapping.contains("A -> X:"));
    assert!(mapping.contains("void m1() -> n"));
}

#[test]
fn check_discard_failure_is_fatal_and_produces_no_output() {
    let mut app = AppBuilder::new();
    app.class(
        "LDbg;",
        &[],
        AccessFlags::PUBLIC,
        vec![app.static_method("LDbg;", "log", "()V", vec![Instruction::ReturnVoid])],
    );
    let main_body = vec![
        Instruction::InvokeStatic(app.method("LDbg;", "log", "()V")),
        Instruction::ReturnVoid,
    ];
    app.class(
        "LMain;",
        &[],
        AccessFlags::PUBLIC,
        vec![app.static_method("LMain;", "main", "([Ljava/lang/String;)V", main_body)],
    );

    let result = app.run(
        "-keep class Main { public static void main(java.lang.String[]); }\n-checkdiscard class Dbg",
        Options::default(),
    );

    assert!(matches!(
        result,
        Err(ShrinkError::CheckDiscardFailed { .. })
    ));
}

#[test]
fn usage_output_lists_removed_elements() {
    let mut app = AppBuilder::new();
    app.class(
        "LA;",
        &[],
        AccessFlags::PUBLIC,
        vec![
            app.virtual_method("LA;", "kept", "()V", vec![Instruction::ReturnVoid]),
            app.virtual_method("LA;", "gone", "()V", vec![Instruction::ReturnVoid]),
        ],
    );
    app.class("LDead;", &[], AccessFlags::PUBLIC, vec![]);

    let options = Options {
        minification: false,
        ..Options::default()
    };
    let result = app
        .run("-keep class A { void kept(); }\n-printusage\n", options)
        .unwrap();

    let usage = result.usage.expect("usage requested");
    assert!(usage.iter().any(|line| line.contains("gone")));
    assert!(usage.iter().any(|line| line.contains("LDead;")));
}

#[test]
fn seeds_output_lists_matched_roots() {
    let mut app = AppBuilder::new();
    app.class(
        "LA;",
        &[],
        AccessFlags::PUBLIC,
        vec![app.virtual_method("LA;", "m1", "()V", vec![Instruction::ReturnVoid])],
    );

    let result = app
        .run("-keep class A { void m1(); }\n-printseeds\n", Options::default())
        .unwrap();

    let seeds = result.seeds.expect("seeds requested");
    assert!(seeds.iter().any(|line| line == "A"));
    assert!(seeds.iter().any(|line| line.contains("void m1()")));
}
