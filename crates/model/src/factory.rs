use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::errors::ModelError;
use crate::item::{
    DexField, DexMethod, DexProto, DexString, DexType, FieldData, MethodData, ProtoData, TypeData,
};

/// Process-wide registry for one compilation.
///
/// Every name, descriptor and member reference passes through here; two calls
/// with equal arguments return the same instance, so the rest of the pipeline
/// compares and hashes references by identity. The tables are concurrent
/// get-or-insert maps and the factory is shared by all stages.
pub struct ItemFactory {
    strings: DashMap<Box<str>, DexString, ahash::RandomState>,
    types: DashMap<DexString, DexType, ahash::RandomState>,
    protos: DashMap<DexString, DexProto, ahash::RandomState>,
    fields: DashMap<(DexType, DexString, DexType), DexField, ahash::RandomState>,
    methods: DashMap<(DexType, DexString, DexProto), DexMethod, ahash::RandomState>,
    known: OnceCell<WellKnownItems>,
}

impl ItemFactory {
    pub fn new() -> Arc<ItemFactory> {
        let factory = ItemFactory {
            strings: DashMap::default(),
            types: DashMap::default(),
            protos: DashMap::default(),
            fields: DashMap::default(),
            methods: DashMap::default(),
            known: OnceCell::new(),
        };
        let known = WellKnownItems::materialize(&factory);
        factory.known.set(known).ok();
        Arc::new(factory)
    }

    /// References other components compare against by identity.
    #[inline]
    pub fn known(&self) -> &WellKnownItems {
        self.known.get().expect("materialized at construction")
    }

    /// Canonical instance for the given text.
    pub fn create_string(&self, text: &str) -> DexString {
        if let Some(existing) = self.strings.get(text) {
            return existing.clone();
        }
        self.strings
            .entry(Box::from(text))
            .or_insert_with(|| DexString(Arc::from(text)))
            .clone()
    }

    /// Canonical type for a field/type descriptor.
    ///
    /// Fails only when the descriptor is syntactically malformed.
    pub fn create_type(&self, descriptor: &str) -> Result<DexType, ModelError> {
        validate_type_descriptor(descriptor)?;
        let descriptor = self.create_string(descriptor);
        Ok(self
            .types
            .entry(descriptor.clone())
            .or_insert_with(|| DexType(Arc::new(TypeData { descriptor })))
            .clone())
    }

    /// Canonical prototype for the given return type and parameters.
    pub fn create_proto(
        &self,
        return_type: DexType,
        parameters: &[DexType],
    ) -> Result<DexProto, ModelError> {
        for param in parameters {
            if param.is_void() {
                return Err(ModelError::InvalidDescriptor("V as parameter".to_owned()));
            }
        }

        let mut descriptor = String::with_capacity(2 + parameters.len() * 2);
        descriptor.push('(');
        for param in parameters {
            descriptor.push_str(param.descriptor().as_str());
        }
        descriptor.push(')');
        descriptor.push_str(return_type.descriptor().as_str());

        let descriptor = self.create_string(&descriptor);
        Ok(self
            .protos
            .entry(descriptor.clone())
            .or_insert_with(|| {
                DexProto(Arc::new(ProtoData {
                    descriptor,
                    return_type,
                    parameters: parameters.iter().cloned().collect(),
                }))
            })
            .clone())
    }

    /// Canonical field reference.
    pub fn create_field(&self, holder: DexType, name: &str, field_type: DexType) -> DexField {
        let name = self.create_string(name);
        self.fields
            .entry((holder.clone(), name.clone(), field_type.clone()))
            .or_insert_with(|| {
                DexField(Arc::new(FieldData {
                    holder,
                    name,
                    field_type,
                }))
            })
            .clone()
    }

    /// Canonical method reference.
    pub fn create_method(&self, holder: DexType, name: &str, proto: DexProto) -> DexMethod {
        let name = self.create_string(name);
        self.methods
            .entry((holder.clone(), name.clone(), proto.clone()))
            .or_insert_with(|| {
                DexMethod(Arc::new(MethodData {
                    holder,
                    name,
                    proto,
                }))
            })
            .clone()
    }

    /// Parse a full method descriptor like `(ILjava/lang/String;)V`.
    pub fn create_proto_from_descriptor(&self, descriptor: &str) -> Result<DexProto, ModelError> {
        let inner = descriptor
            .strip_prefix('(')
            .ok_or_else(|| ModelError::InvalidDescriptor(descriptor.to_owned()))?;
        let (params, return_part) = inner
            .split_once(')')
            .ok_or_else(|| ModelError::InvalidDescriptor(descriptor.to_owned()))?;

        let mut parameters = Vec::new();
        let mut rest = params;
        while !rest.is_empty() {
            let (ty, remaining) = split_first_descriptor(rest)
                .ok_or_else(|| ModelError::InvalidDescriptor(descriptor.to_owned()))?;
            parameters.push(self.create_type(ty)?);
            rest = remaining;
        }

        let return_type = self.create_type(return_part)?;
        self.create_proto(return_type, &parameters)
    }
}

/// Splits the first type descriptor off a concatenated parameter list.
fn split_first_descriptor(input: &str) -> Option<(&str, &str)> {
    let bytes = input.as_bytes();
    let mut pos = 0;
    while bytes.get(pos) == Some(&b'[') {
        pos += 1;
    }
    match bytes.get(pos)? {
        b'L' => {
            let end = input[pos..].find(';')? + pos;
            Some((&input[..=end], &input[end + 1..]))
        }
        b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D' => {
            Some((&input[..=pos], &input[pos + 1..]))
        }
        _ => None,
    }
}

fn validate_type_descriptor(descriptor: &str) -> Result<(), ModelError> {
    let invalid = || ModelError::InvalidDescriptor(descriptor.to_owned());

    let stripped = descriptor.trim_start_matches('[');
    if stripped.is_empty() {
        return Err(invalid());
    }

    match stripped.as_bytes()[0] {
        b'V' => {
            // void is valid only as a plain return type
            if stripped.len() != 1 || descriptor.starts_with('[') {
                return Err(invalid());
            }
            Ok(())
        }
        b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D' => {
            if stripped.len() != 1 {
                return Err(invalid());
            }
            Ok(())
        }
        b'L' => {
            let inner = stripped
                .strip_prefix('L')
                .and_then(|s| s.strip_suffix(';'))
                .ok_or_else(invalid)?;
            if inner.is_empty() || inner.starts_with('/') || inner.ends_with('/') {
                return Err(invalid());
            }
            for segment in inner.split('/') {
                if segment.is_empty() {
                    return Err(invalid());
                }
                if segment
                    .chars()
                    .any(|c| matches!(c, '.' | ';' | '[' | '/' | '(' | ')'))
                {
                    return Err(invalid());
                }
            }
            Ok(())
        }
        _ => Err(invalid()),
    }
}

/// References materialized at factory construction and compared against by
/// identity throughout the pipeline.
pub struct WellKnownItems {
    pub object_type: DexType,
    pub string_type: DexType,
    pub class_type: DexType,
    pub throwable_type: DexType,
    pub enum_type: DexType,
    pub annotation_type: DexType,
    pub method_handle_type: DexType,
    pub method_type_type: DexType,
    pub service_loader_type: DexType,
    pub kotlin_metadata_type: DexType,

    pub boxed_boolean_type: DexType,
    pub boxed_byte_type: DexType,
    pub boxed_short_type: DexType,
    pub boxed_char_type: DexType,
    pub boxed_int_type: DexType,
    pub boxed_long_type: DexType,
    pub boxed_float_type: DexType,
    pub boxed_double_type: DexType,

    /// `java.lang.Object.<init>()V`, the root of every constructor chain.
    pub object_init: DexMethod,
    /// `ServiceLoader.load(Class)` recognized syntactically during tracing.
    pub service_loader_load: DexMethod,
    /// `LambdaMetafactory.metafactory(...)` bootstrap.
    pub lambda_metafactory: DexMethod,
    /// `LambdaMetafactory.altMetafactory(...)` bootstrap.
    pub lambda_alt_metafactory: DexMethod,

    pub class_for_name: DexMethod,
    pub class_get_method: DexMethod,
    pub class_get_declared_method: DexMethod,
    pub class_get_field: DexMethod,
    pub class_get_declared_field: DexMethod,
}

impl WellKnownItems {
    fn materialize(factory: &ItemFactory) -> WellKnownItems {
        let ty = |descriptor: &str| {
            factory
                .create_type(descriptor)
                .expect("well-known descriptor is valid")
        };

        let object_type = ty("Ljava/lang/Object;");
        let string_type = ty("Ljava/lang/String;");
        let class_type = ty("Ljava/lang/Class;");
        let class_array_type = ty("[Ljava/lang/Class;");
        let object_array_type = ty("[Ljava/lang/Object;");
        let method_type = ty("Ljava/lang/reflect/Method;");
        let field_type = ty("Ljava/lang/reflect/Field;");
        let method_handle_type = ty("Ljava/lang/invoke/MethodHandle;");
        let method_type_type = ty("Ljava/lang/invoke/MethodType;");
        let method_handles_lookup_type = ty("Ljava/lang/invoke/MethodHandles$Lookup;");
        let call_site_type = ty("Ljava/lang/invoke/CallSite;");
        let metafactory_type = ty("Ljava/lang/invoke/LambdaMetafactory;");
        let service_loader_type = ty("Ljava/util/ServiceLoader;");
        let void_type = ty("V");

        let proto = |ret: &DexType, params: &[&DexType]| {
            let params: Vec<DexType> = params.iter().map(|&t| t.clone()).collect();
            factory
                .create_proto(ret.clone(), &params)
                .expect("well-known proto is valid")
        };

        let object_init = factory.create_method(
            object_type.clone(),
            "<init>",
            proto(&void_type, &[]),
        );
        let service_loader_load = factory.create_method(
            service_loader_type.clone(),
            "load",
            proto(&service_loader_type, &[&class_type]),
        );
        let metafactory_proto = proto(
            &call_site_type,
            &[
                &method_handles_lookup_type,
                &string_type,
                &method_type_type,
                &method_type_type,
                &method_handle_type,
                &method_type_type,
            ],
        );
        let lambda_metafactory =
            factory.create_method(metafactory_type.clone(), "metafactory", metafactory_proto);
        let alt_metafactory_proto = proto(
            &call_site_type,
            &[
                &method_handles_lookup_type,
                &string_type,
                &method_type_type,
                &object_array_type,
            ],
        );
        let lambda_alt_metafactory =
            factory.create_method(metafactory_type, "altMetafactory", alt_metafactory_proto);

        let class_for_name = factory.create_method(
            class_type.clone(),
            "forName",
            proto(&class_type, &[&string_type]),
        );
        let method_lookup_proto = proto(&method_type, &[&string_type, &class_array_type]);
        let class_get_method =
            factory.create_method(class_type.clone(), "getMethod", method_lookup_proto.clone());
        let class_get_declared_method =
            factory.create_method(class_type.clone(), "getDeclaredMethod", method_lookup_proto);
        let field_lookup_proto = proto(&field_type, &[&string_type]);
        let class_get_field =
            factory.create_method(class_type.clone(), "getField", field_lookup_proto.clone());
        let class_get_declared_field =
            factory.create_method(class_type.clone(), "getDeclaredField", field_lookup_proto);

        WellKnownItems {
            object_type,
            string_type,
            class_type,
            throwable_type: ty("Ljava/lang/Throwable;"),
            enum_type: ty("Ljava/lang/Enum;"),
            annotation_type: ty("Ljava/lang/annotation/Annotation;"),
            method_handle_type,
            method_type_type,
            service_loader_type,
            kotlin_metadata_type: ty("Lkotlin/Metadata;"),
            boxed_boolean_type: ty("Ljava/lang/Boolean;"),
            boxed_byte_type: ty("Ljava/lang/Byte;"),
            boxed_short_type: ty("Ljava/lang/Short;"),
            boxed_char_type: ty("Ljava/lang/Character;"),
            boxed_int_type: ty("Ljava/lang/Integer;"),
            boxed_long_type: ty("Ljava/lang/Long;"),
            boxed_float_type: ty("Ljava/lang/Float;"),
            boxed_double_type: ty("Ljava/lang/Double;"),
            object_init,
            service_loader_load,
            lambda_metafactory,
            lambda_alt_metafactory,
            class_for_name,
            class_get_method,
            class_get_declared_method,
            class_get_field,
            class_get_declared_field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_descriptors_share_identity() {
        let factory = ItemFactory::new();
        let a = factory.create_type("Lcom/example/Foo;").unwrap();
        let b = factory.create_type("Lcom/example/Foo;").unwrap();
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn distinct_descriptors_differ() {
        let factory = ItemFactory::new();
        let a = factory.create_type("Lcom/example/Foo;").unwrap();
        let b = factory.create_type("Lcom/example/Bar;").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn proto_interning_includes_parameters() {
        let factory = ItemFactory::new();
        let int = factory.create_type("I").unwrap();
        let void = factory.create_type("V").unwrap();
        let a = factory.create_proto(void.clone(), &[int.clone()]).unwrap();
        let b = factory.create_proto(void.clone(), &[int.clone()]).unwrap();
        let c = factory.create_proto(void, &[int.clone(), int]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.descriptor().as_str(), "(I)V");
    }

    #[test]
    fn method_interning() {
        let factory = ItemFactory::new();
        let holder = factory.create_type("LA;").unwrap();
        let void = factory.create_type("V").unwrap();
        let proto = factory.create_proto(void, &[]).unwrap();
        let a = factory.create_method(holder.clone(), "run", proto.clone());
        let b = factory.create_method(holder, "run", proto);
        assert_eq!(a, b);
        assert_eq!(a.smali_string(), "LA;->run()V");
    }

    #[test]
    fn rejects_malformed_descriptors() {
        let factory = ItemFactory::new();
        for bad in ["", "Lcom/example/Foo", "X", "[", "L;", "Lcom//Foo;", "[V"] {
            assert!(
                matches!(factory.create_type(bad), Err(ModelError::InvalidDescriptor(_))),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn proto_from_descriptor_round_trips() {
        let factory = ItemFactory::new();
        let proto = factory
            .create_proto_from_descriptor("(I[Ljava/lang/String;J)V")
            .unwrap();
        assert_eq!(proto.parameters().len(), 3);
        assert_eq!(proto.descriptor().as_str(), "(I[Ljava/lang/String;J)V");
        assert!(proto.return_type().is_void());
    }

    #[test]
    fn well_known_items_are_canonical() {
        let factory = ItemFactory::new();
        let object = factory.create_type("Ljava/lang/Object;").unwrap();
        assert_eq!(object, factory.known().object_type);
    }
}
