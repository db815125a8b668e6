use std::sync::Arc;

use crate::definitions::DexValue;
use crate::item::{DexField, DexMethod, DexProto, DexString, DexType};

/// Kind of a method invocation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Virtual,
    Interface,
    Super,
    Direct,
    Static,
}

/// Internal instruction form walked during tracing.
///
/// Readers lower classfile or Dex bodies into this shape; only the
/// reference-bearing instructions matter to the shaker, so data-flow
/// instructions collapse into [`Instruction::Nop`].
#[derive(Debug, Clone)]
pub enum Instruction {
    ConstString(DexString),
    ConstClass(DexType),
    CheckCast(DexType),
    InstanceOf(DexType),
    NewInstance(DexType),
    NewArray(DexType),
    InvokeVirtual(DexMethod),
    InvokeInterface(DexMethod),
    InvokeSuper(DexMethod),
    InvokeDirect(DexMethod),
    InvokeStatic(DexMethod),
    StaticGet(DexField),
    StaticPut(DexField),
    InstanceGet(DexField),
    InstancePut(DexField),
    ConstMethodHandle(MethodHandle),
    InvokeCustom(Arc<CallSite>),
    ReturnVoid,
    Return,
    Nop,
}

/// A method body: instructions plus exception handler table.
#[derive(Debug, Clone, Default)]
pub struct Code {
    pub instructions: Vec<Instruction>,
    pub handlers: Vec<CatchHandler>,
}

impl Code {
    pub fn new(instructions: Vec<Instruction>) -> Code {
        Code {
            instructions,
            handlers: Vec::new(),
        }
    }
}

/// One entry of the exception handler table. `guard` is `None` for
/// catch-all handlers.
#[derive(Debug, Clone)]
pub struct CatchHandler {
    pub guard: Option<DexType>,
}

/// A resolved method-handle constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodHandle {
    StaticInvoke(DexMethod),
    InstanceInvoke(DexMethod),
    InterfaceInvoke(DexMethod),
    ConstructorInvoke(DexMethod),
    StaticGet(DexField),
    StaticPut(DexField),
    InstanceGet(DexField),
    InstancePut(DexField),
}

impl MethodHandle {
    pub fn method(&self) -> Option<&DexMethod> {
        match self {
            MethodHandle::StaticInvoke(m)
            | MethodHandle::InstanceInvoke(m)
            | MethodHandle::InterfaceInvoke(m)
            | MethodHandle::ConstructorInvoke(m) => Some(m),
            _ => None,
        }
    }

    pub fn field(&self) -> Option<&DexField> {
        match self {
            MethodHandle::StaticGet(f)
            | MethodHandle::StaticPut(f)
            | MethodHandle::InstanceGet(f)
            | MethodHandle::InstancePut(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_field_write(&self) -> bool {
        matches!(self, MethodHandle::StaticPut(_) | MethodHandle::InstancePut(_))
    }
}

/// An `invoke-custom` call site.
///
/// For sites whose bootstrap is the platform lambda metafactory the
/// bootstrap arguments are, in order: the erased interface method type, the
/// implementation handle, and the instantiated method type.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub bootstrap: DexMethod,
    pub method_name: DexString,
    pub method_proto: DexProto,
    pub bootstrap_args: Vec<DexValue>,
}

impl CallSite {
    /// The implementation handle of a metafactory site, if present.
    pub fn implementation_handle(&self) -> Option<&MethodHandle> {
        self.bootstrap_args.iter().find_map(|arg| match arg {
            DexValue::MethodHandle(handle) => Some(handle),
            _ => None,
        })
    }

    /// The erased interface method prototype of a metafactory site.
    pub fn interface_proto(&self) -> Option<&DexProto> {
        self.bootstrap_args.iter().find_map(|arg| match arg {
            DexValue::MethodType(proto) => Some(proto),
            _ => None,
        })
    }
}
