use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use ahash::AHashSet;

use crate::code::{Code, MethodHandle};
use crate::errors::ModelError;
use crate::flags::AccessFlags;
use crate::item::{DexField, DexMethod, DexProto, DexString, DexType};

/// Where a definition came from, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Unknown,
    File(PathBuf),
    Entry { archive: String, entry: String },
    /// Synthesized by the pipeline, e.g. a lambda class; carries the type of
    /// the context it was synthesized from.
    Synthesized(DexType),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Unknown => f.write_str("<unknown>"),
            Origin::File(path) => write!(f, "{}", path.display()),
            Origin::Entry { archive, entry } => write!(f, "{archive}:{entry}"),
            Origin::Synthesized(context) => write!(f, "synthesized from {context}"),
        }
    }
}

/// How a class participates in the compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// Subject to shrinking, rewriting and renaming.
    Program,
    /// Referenced but never rewritten.
    Classpath,
    /// Runtime classes, never rewritten.
    Library,
}

/// Encoded constant used by static field values, annotation elements and
/// call-site bootstrap arguments.
#[derive(Debug, Clone)]
pub enum DexValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(DexString),
    Type(DexType),
    /// Enum constants and annotation field references encode as field refs.
    Field(DexField),
    Method(DexMethod),
    MethodHandle(MethodHandle),
    MethodType(DexProto),
    Array(Vec<DexValue>),
    Annotation(Box<DexAnnotation>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationVisibility {
    Build,
    Runtime,
    System,
}

/// One annotation instance with its named elements.
#[derive(Debug, Clone)]
pub struct DexAnnotation {
    pub annotation_type: DexType,
    pub visibility: AnnotationVisibility,
    pub elements: Vec<(DexString, DexValue)>,
}

/// A field definition owned by exactly one class.
#[derive(Debug, Clone)]
pub struct DexEncodedField {
    pub field: DexField,
    pub access_flags: AccessFlags,
    pub annotations: Vec<DexAnnotation>,
    /// Initial value for static fields, when the input carried one.
    pub static_value: Option<DexValue>,
}

impl DexEncodedField {
    pub fn new(field: DexField, access_flags: AccessFlags) -> DexEncodedField {
        DexEncodedField {
            field,
            access_flags,
            annotations: Vec::new(),
            static_value: None,
        }
    }
}

/// Inlining decision recorded on a method by later passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InliningConstraint {
    #[default]
    Default,
    Always,
    Never,
}

/// Mutable optimization facts populated by passes after the first round.
/// Passes that change these rebuild the holder class, so the struct itself
/// stays plain data.
#[derive(Debug, Clone, Default)]
pub struct OptimizationInfo {
    pub abstract_return_value: Option<DexValue>,
    /// Bit i set means parameter i is known non-null at every call site.
    pub non_null_params: u64,
    pub inlining: InliningConstraint,
    /// Set by `-assumenosideeffects`.
    pub no_side_effects: bool,
}

/// A method definition owned by exactly one class.
#[derive(Debug, Clone)]
pub struct DexEncodedMethod {
    pub method: DexMethod,
    pub access_flags: AccessFlags,
    pub annotations: Vec<DexAnnotation>,
    /// Per-parameter annotations, outer index is the parameter position.
    pub parameter_annotations: Vec<Vec<DexAnnotation>>,
    pub code: Option<Code>,
    pub optimization_info: OptimizationInfo,
}

impl DexEncodedMethod {
    pub fn new(method: DexMethod, access_flags: AccessFlags) -> DexEncodedMethod {
        DexEncodedMethod {
            method,
            access_flags,
            annotations: Vec::new(),
            parameter_annotations: Vec::new(),
            code: None,
            optimization_info: OptimizationInfo::default(),
        }
    }

    pub fn with_code(mut self, code: Code) -> DexEncodedMethod {
        self.code = Some(code);
        self
    }

    #[inline]
    pub fn is_virtual(&self) -> bool {
        self.access_flags.is_virtual() && !self.method.is_class_initializer()
    }
}

/// A class definition.
///
/// Invariants checked at construction: the class is not its own supertype or
/// interface, members are unique by reference, and every member names this
/// class as its holder. Instances are immutable once built; passes that
/// change a class rebuild it.
#[derive(Debug, Clone)]
pub struct DexClass {
    pub kind: ClassKind,
    pub class_type: DexType,
    /// `None` only for the root object type.
    pub super_type: Option<DexType>,
    pub interfaces: Vec<DexType>,
    pub access_flags: AccessFlags,
    pub direct_methods: Vec<DexEncodedMethod>,
    pub virtual_methods: Vec<DexEncodedMethod>,
    pub static_fields: Vec<DexEncodedField>,
    pub instance_fields: Vec<DexEncodedField>,
    pub annotations: Vec<DexAnnotation>,
    pub source_file: Option<DexString>,
    pub origin: Origin,
    /// Feature split this class ships in, `None` for the base.
    pub feature: Option<String>,
}

impl DexClass {
    /// Validates the construction invariants and builds the class.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: ClassKind,
        class_type: DexType,
        super_type: Option<DexType>,
        interfaces: Vec<DexType>,
        access_flags: AccessFlags,
        direct_methods: Vec<DexEncodedMethod>,
        virtual_methods: Vec<DexEncodedMethod>,
        static_fields: Vec<DexEncodedField>,
        instance_fields: Vec<DexEncodedField>,
        origin: Origin,
    ) -> Result<DexClass, ModelError> {
        if super_type.as_ref() == Some(&class_type) {
            return Err(ModelError::SelfInheritance(class_type));
        }
        if interfaces.contains(&class_type) {
            return Err(ModelError::SelfInheritance(class_type));
        }

        let mut seen_methods = AHashSet::new();
        for method in direct_methods.iter().chain(&virtual_methods) {
            if method.method.holder() != &class_type {
                return Err(ModelError::WrongHolder {
                    member: method.method.smali_string(),
                    class: class_type,
                });
            }
            if !seen_methods.insert(method.method.clone()) {
                return Err(ModelError::DuplicateMember {
                    member: method.method.smali_string(),
                });
            }
        }
        let mut seen_fields = AHashSet::new();
        for field in static_fields.iter().chain(&instance_fields) {
            if field.field.holder() != &class_type {
                return Err(ModelError::WrongHolder {
                    member: field.field.smali_string(),
                    class: class_type,
                });
            }
            if !seen_fields.insert(field.field.clone()) {
                return Err(ModelError::DuplicateMember {
                    member: field.field.smali_string(),
                });
            }
        }

        Ok(DexClass {
            kind,
            class_type,
            super_type,
            interfaces,
            access_flags,
            direct_methods,
            virtual_methods,
            static_fields,
            instance_fields,
            annotations: Vec::new(),
            source_file: None,
            origin,
            feature: None,
        })
    }

    #[inline]
    pub fn is_program(&self) -> bool {
        self.kind == ClassKind::Program
    }

    #[inline]
    pub fn is_interface(&self) -> bool {
        self.access_flags.is_interface()
    }

    pub fn methods(&self) -> impl Iterator<Item = &DexEncodedMethod> {
        self.direct_methods.iter().chain(&self.virtual_methods)
    }

    pub fn fields(&self) -> impl Iterator<Item = &DexEncodedField> {
        self.static_fields.iter().chain(&self.instance_fields)
    }

    pub fn lookup_method(&self, reference: &DexMethod) -> Option<&DexEncodedMethod> {
        self.methods()
            .find(|m| m.method.name() == reference.name() && m.method.proto() == reference.proto())
    }

    pub fn lookup_field(&self, reference: &DexField) -> Option<&DexEncodedField> {
        self.fields().find(|f| {
            f.field.name() == reference.name() && f.field.field_type() == reference.field_type()
        })
    }

    /// The declared `<init>` matching the given prototype.
    pub fn lookup_instance_initializer(&self, proto: &DexProto) -> Option<&DexEncodedMethod> {
        self.direct_methods
            .iter()
            .find(|m| m.method.is_instance_initializer() && m.method.proto() == proto)
    }

    pub fn class_initializer(&self) -> Option<&DexEncodedMethod> {
        self.direct_methods
            .iter()
            .find(|m| m.method.is_class_initializer())
    }

}

/// Shared handle used across stages; tracing reads immutable snapshots.
pub type ClassRef = Arc<DexClass>;
