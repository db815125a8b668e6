use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use smallvec::SmallVec;

/// Interned string.
///
/// All strings pass through the [item factory](crate::factory::ItemFactory),
/// which guarantees that two references to the same text share one allocation.
/// Equality and hashing are by pointer; ordering is by text so that emitted
/// artifacts are deterministic.
#[derive(Clone)]
pub struct DexString(pub(crate) Arc<str>);

impl DexString {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for DexString {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DexString {}

impl Hash for DexString {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const u8 as usize).hash(state);
    }
}

impl Ord for DexString {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_ref().cmp(other.0.as_ref())
    }
}

impl PartialOrd for DexString {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

#[derive(Debug)]
pub(crate) struct TypeData {
    pub(crate) descriptor: DexString,
}

/// Interned type reference.
///
/// A type names itself by descriptor (`Lcom/example/Foo;`, `I`, `[B`, ...)
/// and may exist without a definition (library or missing class).
#[derive(Clone)]
pub struct DexType(pub(crate) Arc<TypeData>);

impl DexType {
    /// The raw descriptor, e.g. `Lcom/example/Foo;`.
    #[inline]
    pub fn descriptor(&self) -> &DexString {
        &self.0.descriptor
    }

    /// Class types are `L...;` descriptors.
    #[inline]
    pub fn is_class(&self) -> bool {
        self.0.descriptor.as_str().starts_with('L')
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.0.descriptor.as_str().starts_with('[')
    }

    #[inline]
    pub fn is_primitive(&self) -> bool {
        !self.is_class() && !self.is_array()
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        self.0.descriptor.as_str() == "V"
    }

    /// Descriptor of the innermost element for array types, `None` otherwise.
    pub fn array_element_descriptor(&self) -> Option<&str> {
        if !self.is_array() {
            return None;
        }
        Some(self.0.descriptor.as_str().trim_start_matches('['))
    }

    /// Package part of a class descriptor with `/` separators, `""` for the
    /// default package, `None` for non-class types.
    pub fn package(&self) -> Option<&str> {
        if !self.is_class() {
            return None;
        }
        let inner = self.internal_name()?;
        Some(inner.rsplit_once('/').map_or("", |(pkg, _)| pkg))
    }

    /// Internal binary name of a class descriptor, e.g. `com/example/Foo`.
    pub fn internal_name(&self) -> Option<&str> {
        let d = self.0.descriptor.as_str();
        d.strip_prefix('L').and_then(|d| d.strip_suffix(';'))
    }

    /// Source-style name: `com.example.Foo`, `int`, `java.lang.String[]`.
    pub fn java_name(&self) -> String {
        let descriptor = self.0.descriptor.as_str();
        let depth = descriptor.len() - descriptor.trim_start_matches('[').len();
        let base = &descriptor[depth..];
        let mut name = match base {
            "V" => "void".to_owned(),
            "Z" => "boolean".to_owned(),
            "B" => "byte".to_owned(),
            "S" => "short".to_owned(),
            "C" => "char".to_owned(),
            "I" => "int".to_owned(),
            "J" => "long".to_owned(),
            "F" => "float".to_owned(),
            "D" => "double".to_owned(),
            _ => base
                .strip_prefix('L')
                .and_then(|b| b.strip_suffix(';'))
                .map_or_else(|| base.to_owned(), |b| b.replace('/', ".")),
        };
        for _ in 0..depth {
            name.push_str("[]");
        }
        name
    }

    /// Last segment of the binary name, `None` for non-class types.
    pub fn simple_name(&self) -> Option<&str> {
        let inner = self.internal_name()?;
        Some(inner.rsplit_once('/').map_or(inner, |(_, name)| name))
    }

    #[inline]
    pub fn is_same_package(&self, other: &DexType) -> bool {
        self.package().is_some() && self.package() == other.package()
    }
}

impl PartialEq for DexType {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DexType {}

impl Hash for DexType {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl Ord for DexType {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.descriptor.cmp(&other.0.descriptor)
    }
}

impl PartialOrd for DexType {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.java_name())
    }
}

impl fmt::Debug for DexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DexType({})", self.0.descriptor)
    }
}

#[derive(Debug)]
pub(crate) struct ProtoData {
    pub(crate) descriptor: DexString,
    pub(crate) return_type: DexType,
    pub(crate) parameters: SmallVec<[DexType; 4]>,
}

/// Interned method prototype: return type plus ordered parameter types.
#[derive(Clone)]
pub struct DexProto(pub(crate) Arc<ProtoData>);

impl DexProto {
    /// Full descriptor, e.g. `(ILjava/lang/String;)V`.
    #[inline]
    pub fn descriptor(&self) -> &DexString {
        &self.0.descriptor
    }

    #[inline]
    pub fn return_type(&self) -> &DexType {
        &self.0.return_type
    }

    #[inline]
    pub fn parameters(&self) -> &[DexType] {
        &self.0.parameters
    }
}

impl PartialEq for DexProto {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DexProto {}

impl Hash for DexProto {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl Ord for DexProto {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.descriptor.cmp(&other.0.descriptor)
    }
}

impl PartialOrd for DexProto {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for DexProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DexProto({})", self.0.descriptor)
    }
}

#[derive(Debug)]
pub(crate) struct FieldData {
    pub(crate) holder: DexType,
    pub(crate) name: DexString,
    pub(crate) field_type: DexType,
}

/// Interned field reference: holder, name and field type.
#[derive(Clone)]
pub struct DexField(pub(crate) Arc<FieldData>);

impl DexField {
    #[inline]
    pub fn holder(&self) -> &DexType {
        &self.0.holder
    }

    #[inline]
    pub fn name(&self) -> &DexString {
        &self.0.name
    }

    #[inline]
    pub fn field_type(&self) -> &DexType {
        &self.0.field_type
    }

    /// `Lcom/example/Foo;->bar:I` form used in diagnostics and seeds output.
    pub fn smali_string(&self) -> String {
        format!(
            "{}->{}:{}",
            self.0.holder.descriptor(),
            self.0.name,
            self.0.field_type.descriptor()
        )
    }
}

impl PartialEq for DexField {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DexField {}

impl Hash for DexField {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl Ord for DexField {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .holder
            .cmp(&other.0.holder)
            .then_with(|| self.0.name.cmp(&other.0.name))
            .then_with(|| self.0.field_type.cmp(&other.0.field_type))
    }
}

impl PartialOrd for DexField {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DexField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0.holder, self.0.name)
    }
}

impl fmt::Debug for DexField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DexField({})", self.smali_string())
    }
}

#[derive(Debug)]
pub(crate) struct MethodData {
    pub(crate) holder: DexType,
    pub(crate) name: DexString,
    pub(crate) proto: DexProto,
}

/// Interned method reference: holder, name and prototype.
#[derive(Clone)]
pub struct DexMethod(pub(crate) Arc<MethodData>);

impl DexMethod {
    #[inline]
    pub fn holder(&self) -> &DexType {
        &self.0.holder
    }

    #[inline]
    pub fn name(&self) -> &DexString {
        &self.0.name
    }

    #[inline]
    pub fn proto(&self) -> &DexProto {
        &self.0.proto
    }

    #[inline]
    pub fn is_instance_initializer(&self) -> bool {
        self.0.name.as_str() == "<init>"
    }

    #[inline]
    pub fn is_class_initializer(&self) -> bool {
        self.0.name.as_str() == "<clinit>"
    }

    /// `Lcom/example/Foo;->run(I)V` form used in diagnostics and seeds output.
    pub fn smali_string(&self) -> String {
        format!(
            "{}->{}{}",
            self.0.holder.descriptor(),
            self.0.name,
            self.0.proto.descriptor()
        )
    }

    /// Matches another reference by name and prototype, ignoring the holder.
    #[inline]
    pub fn matches_signature(&self, other: &DexMethod) -> bool {
        self.0.name == other.0.name && self.0.proto == other.0.proto
    }
}

impl PartialEq for DexMethod {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DexMethod {}

impl Hash for DexMethod {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl Ord for DexMethod {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .holder
            .cmp(&other.0.holder)
            .then_with(|| self.0.name.cmp(&other.0.name))
            .then_with(|| self.0.proto.cmp(&other.0.proto))
    }
}

impl PartialOrd for DexMethod {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DexMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}()", self.0.holder, self.0.name)
    }
}

impl fmt::Debug for DexMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DexMethod({})", self.smali_string())
    }
}

/// A reference to any program item, used by pinned sets, reachability
/// reasons and the check-discard verifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum ItemRef {
    Type(DexType),
    Field(DexField),
    Method(DexMethod),
}

impl ItemRef {
    pub fn holder_type(&self) -> &DexType {
        match self {
            ItemRef::Type(ty) => ty,
            ItemRef::Field(field) => field.holder(),
            ItemRef::Method(method) => method.holder(),
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRef::Type(ty) => write!(f, "{}", ty.descriptor()),
            ItemRef::Field(field) => f.write_str(&field.smali_string()),
            ItemRef::Method(method) => f.write_str(&method.smali_string()),
        }
    }
}

impl From<DexType> for ItemRef {
    fn from(ty: DexType) -> Self {
        ItemRef::Type(ty)
    }
}

impl From<DexField> for ItemRef {
    fn from(field: DexField) -> Self {
        ItemRef::Field(field)
    }
}

impl From<DexMethod> for ItemRef {
    fn from(method: DexMethod) -> Self {
        ItemRef::Method(method)
    }
}

#[cfg(test)]
mod tests {
    use crate::factory::ItemFactory;

    #[test]
    fn package_of_class_type() {
        let factory = ItemFactory::new();
        let ty = factory.create_type("Lcom/example/Foo;").unwrap();
        assert_eq!(ty.package(), Some("com/example"));
        assert_eq!(ty.simple_name(), Some("Foo"));
        assert_eq!(ty.java_name(), "com.example.Foo");
    }

    #[test]
    fn default_package_is_empty() {
        let factory = ItemFactory::new();
        let ty = factory.create_type("LFoo;").unwrap();
        assert_eq!(ty.package(), Some(""));
        assert_eq!(ty.simple_name(), Some("Foo"));
    }

    #[test]
    fn primitives_have_no_package() {
        let factory = ItemFactory::new();
        let ty = factory.create_type("I").unwrap();
        assert!(ty.is_primitive());
        assert_eq!(ty.package(), None);
    }

    #[test]
    fn array_element_descriptor() {
        let factory = ItemFactory::new();
        let ty = factory.create_type("[[Ljava/lang/String;").unwrap();
        assert!(ty.is_array());
        assert_eq!(ty.array_element_descriptor(), Some("Ljava/lang/String;"));
    }
}
