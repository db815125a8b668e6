use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use dexshrink_model::{
    CallSite, ClassRef, Code, DexAnnotation, DexClass, DexEncodedField, DexEncodedMethod,
    DexValue, GraphLens, Instruction, InvokeKind, MethodHandle,
};

use crate::errors::ShrinkError;

/// Receives the final program, one class at a time, in sorted order.
pub trait ProgramConsumer {
    fn accept_class(&mut self, class: &DexClass) -> Result<(), ShrinkError>;
}

/// A consumer that simply collects the emitted classes.
#[derive(Default)]
pub struct CollectingConsumer {
    pub classes: Vec<DexClass>,
}

impl ProgramConsumer for CollectingConsumer {
    fn accept_class(&mut self, class: &DexClass) -> Result<(), ShrinkError> {
        self.classes.push(class.clone());
        Ok(())
    }
}

/// Applies the final composed lens while yielding classes to the consumer.
///
/// The lens must be context-free for methods by this point; anything else is
/// an internal error.
pub fn emit_program(
    classes: &[ClassRef],
    lens: &GraphLens,
    consumer: &mut dyn ProgramConsumer,
) -> Result<(), ShrinkError> {
    if !lens.is_context_free_for_methods() {
        return Err(ShrinkError::Internal(
            "final lens is not context-free for methods".to_owned(),
        ));
    }
    let mut sorted: Vec<&ClassRef> = classes.iter().collect();
    sorted.sort_by(|a, b| a.class_type.cmp(&b.class_type));
    for class in sorted {
        let rewritten = rewrite_class(class, lens);
        consumer.accept_class(&rewritten)?;
    }
    Ok(())
}

/// Rewrites every reference of a class through a lens, producing the class
/// as the next stage sees it.
pub fn rewrite_class(class: &DexClass, lens: &GraphLens) -> DexClass {
    if lens.is_identity() {
        return class.clone();
    }

    let class_type = lens.lookup_type(&class.class_type);
    let super_type = class.super_type.as_ref().map(|ty| lens.lookup_type(ty));
    let interfaces = class
        .interfaces
        .iter()
        .map(|ty| lens.lookup_type(ty))
        .collect();

    let rewrite_method = |method: &DexEncodedMethod| -> DexEncodedMethod {
        let new_ref = lens
            .lookup_method(&method.method, None, InvokeKind::Virtual)
            .method;
        DexEncodedMethod {
            method: new_ref,
            access_flags: method.access_flags,
            annotations: method
                .annotations
                .iter()
                .map(|a| rewrite_annotation(a, lens))
                .collect(),
            parameter_annotations: method
                .parameter_annotations
                .iter()
                .map(|list| list.iter().map(|a| rewrite_annotation(a, lens)).collect())
                .collect(),
            code: method.code.as_ref().map(|code| rewrite_code(code, lens)),
            optimization_info: method.optimization_info.clone(),
        }
    };
    let rewrite_field = |field: &DexEncodedField| -> DexEncodedField {
        DexEncodedField {
            field: lens.lookup_field(&field.field),
            access_flags: field.access_flags,
            annotations: field
                .annotations
                .iter()
                .map(|a| rewrite_annotation(a, lens))
                .collect(),
            static_value: field
                .static_value
                .as_ref()
                .map(|value| rewrite_value(value, lens)),
        }
    };

    DexClass {
        class_type,
        super_type,
        interfaces,
        direct_methods: class.direct_methods.iter().map(rewrite_method).collect(),
        virtual_methods: class.virtual_methods.iter().map(rewrite_method).collect(),
        static_fields: class.static_fields.iter().map(rewrite_field).collect(),
        instance_fields: class.instance_fields.iter().map(rewrite_field).collect(),
        annotations: class
            .annotations
            .iter()
            .map(|a| rewrite_annotation(a, lens))
            .collect(),
        ..class.clone()
    }
}

fn rewrite_code(code: &Code, lens: &GraphLens) -> Code {
    let instructions = code
        .instructions
        .iter()
        .map(|instruction| rewrite_instruction(instruction, lens))
        .collect();
    let handlers = code
        .handlers
        .iter()
        .map(|handler| dexshrink_model::CatchHandler {
            guard: handler.guard.as_ref().map(|ty| lens.lookup_type(ty)),
        })
        .collect();
    Code {
        instructions,
        handlers,
    }
}

fn rewrite_instruction(instruction: &Instruction, lens: &GraphLens) -> Instruction {
    let invoke = |target: &dexshrink_model::DexMethod, kind: InvokeKind| {
        let lookup = lens.lookup_method(target, None, kind);
        match lookup.invoke_kind {
            InvokeKind::Virtual => Instruction::InvokeVirtual(lookup.method),
            InvokeKind::Interface => Instruction::InvokeInterface(lookup.method),
            InvokeKind::Super => Instruction::InvokeSuper(lookup.method),
            InvokeKind::Direct => Instruction::InvokeDirect(lookup.method),
            InvokeKind::Static => Instruction::InvokeStatic(lookup.method),
        }
    };
    match instruction {
        Instruction::ConstString(value) => Instruction::ConstString(value.clone()),
        Instruction::ConstClass(ty) => Instruction::ConstClass(lens.lookup_type(ty)),
        Instruction::CheckCast(ty) => Instruction::CheckCast(lens.lookup_type(ty)),
        Instruction::InstanceOf(ty) => Instruction::InstanceOf(lens.lookup_type(ty)),
        Instruction::NewInstance(ty) => Instruction::NewInstance(lens.lookup_type(ty)),
        Instruction::NewArray(ty) => Instruction::NewArray(lens.lookup_type(ty)),
        Instruction::InvokeVirtual(m) => invoke(m, InvokeKind::Virtual),
        Instruction::InvokeInterface(m) => invoke(m, InvokeKind::Interface),
        Instruction::InvokeSuper(m) => invoke(m, InvokeKind::Super),
        Instruction::InvokeDirect(m) => invoke(m, InvokeKind::Direct),
        Instruction::InvokeStatic(m) => invoke(m, InvokeKind::Static),
        Instruction::StaticGet(f) => Instruction::StaticGet(lens.lookup_field(f)),
        Instruction::StaticPut(f) => Instruction::StaticPut(lens.lookup_field(f)),
        Instruction::InstanceGet(f) => Instruction::InstanceGet(lens.lookup_field(f)),
        Instruction::InstancePut(f) => Instruction::InstancePut(lens.lookup_field(f)),
        Instruction::ConstMethodHandle(handle) => {
            Instruction::ConstMethodHandle(rewrite_handle(handle, lens))
        }
        Instruction::InvokeCustom(call_site) => Instruction::InvokeCustom(Arc::new(CallSite {
            bootstrap: call_site.bootstrap.clone(),
            method_name: call_site.method_name.clone(),
            method_proto: call_site.method_proto.clone(),
            bootstrap_args: call_site
                .bootstrap_args
                .iter()
                .map(|value| rewrite_value(value, lens))
                .collect(),
        })),
        Instruction::ReturnVoid => Instruction::ReturnVoid,
        Instruction::Return => Instruction::Return,
        Instruction::Nop => Instruction::Nop,
    }
}

fn rewrite_handle(handle: &MethodHandle, lens: &GraphLens) -> MethodHandle {
    let method = |m: &dexshrink_model::DexMethod| lens.lookup_method(m, None, InvokeKind::Virtual).method;
    let field = |f: &dexshrink_model::DexField| lens.lookup_field(f);
    match handle {
        MethodHandle::StaticInvoke(m) => MethodHandle::StaticInvoke(method(m)),
        MethodHandle::InstanceInvoke(m) => MethodHandle::InstanceInvoke(method(m)),
        MethodHandle::InterfaceInvoke(m) => MethodHandle::InterfaceInvoke(method(m)),
        MethodHandle::ConstructorInvoke(m) => MethodHandle::ConstructorInvoke(method(m)),
        MethodHandle::StaticGet(f) => MethodHandle::StaticGet(field(f)),
        MethodHandle::StaticPut(f) => MethodHandle::StaticPut(field(f)),
        MethodHandle::InstanceGet(f) => MethodHandle::InstanceGet(field(f)),
        MethodHandle::InstancePut(f) => MethodHandle::InstancePut(field(f)),
    }
}

fn rewrite_annotation(annotation: &DexAnnotation, lens: &GraphLens) -> DexAnnotation {
    DexAnnotation {
        annotation_type: lens.lookup_type(&annotation.annotation_type),
        visibility: annotation.visibility,
        elements: annotation
            .elements
            .iter()
            .map(|(name, value)| (name.clone(), rewrite_value(value, lens)))
            .collect(),
    }
}

fn rewrite_value(value: &DexValue, lens: &GraphLens) -> DexValue {
    match value {
        DexValue::Type(ty) => DexValue::Type(lens.lookup_type(ty)),
        DexValue::Field(f) => DexValue::Field(lens.lookup_field(f)),
        DexValue::Method(m) => {
            DexValue::Method(lens.lookup_method(m, None, InvokeKind::Virtual).method)
        }
        DexValue::MethodHandle(handle) => DexValue::MethodHandle(rewrite_handle(handle, lens)),
        DexValue::MethodType(proto) => DexValue::MethodType(proto.clone()),
        DexValue::Array(values) => {
            DexValue::Array(values.iter().map(|v| rewrite_value(v, lens)).collect())
        }
        DexValue::Annotation(inner) => {
            DexValue::Annotation(Box::new(rewrite_annotation(inner, lens)))
        }
        other => other.clone(),
    }
}

/// A line-oriented artifact target: a file, or standard output when no path
/// is configured. The file handle lives only inside `write_all`, so it is
/// closed on every exit path including failure.
pub struct ArtifactSink {
    target: Option<PathBuf>,
}

impl ArtifactSink {
    pub fn file(path: PathBuf) -> ArtifactSink {
        ArtifactSink { target: Some(path) }
    }

    pub fn stdout() -> ArtifactSink {
        ArtifactSink { target: None }
    }

    pub fn write_all(&self, text: &str) -> io::Result<()> {
        match &self.target {
            Some(path) => {
                let mut writer = BufWriter::new(File::create(path)?);
                writer.write_all(text.as_bytes())?;
                writer.flush()
            }
            None => {
                let stdout = io::stdout();
                let mut lock = stdout.lock();
                lock.write_all(text.as_bytes())?;
                lock.flush()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use dexshrink_model::{AccessFlags, ClassKind, ItemFactory, Origin};

    use super::*;

    #[test]
    fn rewrite_changes_kind_when_the_lens_says_so() {
        let factory = ItemFactory::new();
        let a = factory.create_type("LA;").unwrap();
        let void = factory.create_type("V").unwrap();
        let proto = factory.create_proto(void, &[]).unwrap();
        let from = factory.create_method(a.clone(), "m", proto.clone());
        let to = factory.create_method(a.clone(), "m2", proto.clone());

        let lens = GraphLens::nested(GraphLens::identity())
            .map_method(from.clone(), to.clone())
            .set_invoke_kind(to.clone(), InvokeKind::Direct)
            .build();

        let caller_ref = factory.create_method(a.clone(), "caller", proto);
        let caller = DexEncodedMethod::new(caller_ref, AccessFlags::PUBLIC).with_code(Code::new(
            vec![Instruction::InvokeVirtual(from), Instruction::ReturnVoid],
        ));
        let class = DexClass::new(
            ClassKind::Program,
            a,
            Some(factory.known().object_type.clone()),
            Vec::new(),
            AccessFlags::PUBLIC,
            Vec::new(),
            vec![caller],
            Vec::new(),
            Vec::new(),
            Origin::Unknown,
        )
        .unwrap();

        let rewritten = rewrite_class(&class, &lens);
        let code = rewritten.virtual_methods[0].code.as_ref().unwrap();
        match &code.instructions[0] {
            Instruction::InvokeDirect(target) => assert_eq!(target, &to),
            other => panic!("expected invoke-direct, got {other:?}"),
        }
    }

    #[test]
    fn emit_rewrites_and_sorts_classes() {
        let factory = ItemFactory::new();
        let make_class = |descriptor: &str| {
            let ty = factory.create_type(descriptor).unwrap();
            Arc::new(
                DexClass::new(
                    ClassKind::Program,
                    ty,
                    Some(factory.known().object_type.clone()),
                    Vec::new(),
                    AccessFlags::PUBLIC,
                    Vec::new(),
                    Vec::new(),
                    Vec::new(),
                    Vec::new(),
                    Origin::Unknown,
                )
                .unwrap(),
            )
        };
        let classes = vec![make_class("LB;"), make_class("LA;")];

        let a = factory.create_type("LA;").unwrap();
        let renamed = factory.create_type("LZ;").unwrap();
        let lens = GraphLens::nested(GraphLens::identity())
            .map_type(a, renamed.clone())
            .build();

        let mut consumer = CollectingConsumer::default();
        emit_program(&classes, &lens, &mut consumer).unwrap();

        assert_eq!(consumer.classes.len(), 2);
        // sorted by the original type; LA; was yielded first, renamed
        assert_eq!(consumer.classes[0].class_type, renamed);
        assert_eq!(consumer.classes[1].class_type.descriptor().as_str(), "LB;");
    }
}
