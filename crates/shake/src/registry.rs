use std::sync::Arc;

use dexshrink_model::{
    CallSite, DexEncodedMethod, DexField, DexMethod, DexString, DexType, Instruction, MethodHandle,
};

/// One reference reported while tracing a method body, in instruction order.
#[derive(Debug, Clone)]
pub enum TracedUse {
    InvokeVirtual(DexMethod),
    InvokeInterface(DexMethod),
    InvokeSuper(DexMethod),
    InvokeDirect(DexMethod),
    InvokeStatic(DexMethod),
    FieldRead { field: DexField, is_static: bool },
    FieldWrite { field: DexField, is_static: bool },
    NewInstance(DexType),
    TypeReference(DexType),
    ConstClass(DexType),
    ConstString(DexString),
    MethodHandle(MethodHandle),
    CallSite(Arc<CallSite>),
}

/// Receives every reference a method body could execute or link against.
///
/// Implementations must be prepared for one call per bytecode reference,
/// including references inside exception handlers.
pub trait UseRegistry {
    fn register(&mut self, traced: TracedUse);
}

/// The default registry: buffers uses so tracing can run on worker threads
/// and be merged at worklist drain.
#[derive(Debug, Default)]
pub struct CollectingRegistry {
    pub uses: Vec<TracedUse>,
}

impl UseRegistry for CollectingRegistry {
    fn register(&mut self, traced: TracedUse) {
        self.uses.push(traced);
    }
}

/// Walks one method body and reports every reference to the registry.
pub fn trace_method(method: &DexEncodedMethod, registry: &mut dyn UseRegistry) {
    let Some(code) = &method.code else {
        return;
    };

    for instruction in &code.instructions {
        match instruction {
            Instruction::ConstString(value) => {
                registry.register(TracedUse::ConstString(value.clone()));
            }
            Instruction::ConstClass(ty) => {
                registry.register(TracedUse::ConstClass(ty.clone()));
            }
            Instruction::CheckCast(ty)
            | Instruction::InstanceOf(ty)
            | Instruction::NewArray(ty) => {
                registry.register(TracedUse::TypeReference(ty.clone()));
            }
            Instruction::NewInstance(ty) => {
                registry.register(TracedUse::NewInstance(ty.clone()));
            }
            Instruction::InvokeVirtual(target) => {
                registry.register(TracedUse::InvokeVirtual(target.clone()));
            }
            Instruction::InvokeInterface(target) => {
                registry.register(TracedUse::InvokeInterface(target.clone()));
            }
            Instruction::InvokeSuper(target) => {
                registry.register(TracedUse::InvokeSuper(target.clone()));
            }
            Instruction::InvokeDirect(target) => {
                registry.register(TracedUse::InvokeDirect(target.clone()));
            }
            Instruction::InvokeStatic(target) => {
                registry.register(TracedUse::InvokeStatic(target.clone()));
            }
            Instruction::StaticGet(field) => {
                registry.register(TracedUse::FieldRead {
                    field: field.clone(),
                    is_static: true,
                });
            }
            Instruction::StaticPut(field) => {
                registry.register(TracedUse::FieldWrite {
                    field: field.clone(),
                    is_static: true,
                });
            }
            Instruction::InstanceGet(field) => {
                registry.register(TracedUse::FieldRead {
                    field: field.clone(),
                    is_static: false,
                });
            }
            Instruction::InstancePut(field) => {
                registry.register(TracedUse::FieldWrite {
                    field: field.clone(),
                    is_static: false,
                });
            }
            Instruction::ConstMethodHandle(handle) => {
                registry.register(TracedUse::MethodHandle(handle.clone()));
            }
            Instruction::InvokeCustom(call_site) => {
                registry.register(TracedUse::CallSite(call_site.clone()));
            }
            Instruction::ReturnVoid | Instruction::Return | Instruction::Nop => {}
        }
    }

    for handler in &code.handlers {
        if let Some(guard) = &handler.guard {
            registry.register(TracedUse::TypeReference(guard.clone()));
        }
    }
}
