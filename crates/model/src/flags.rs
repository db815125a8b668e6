use bitflags::bitflags;

bitflags! {
    /// Access flags for classes, fields and methods.
    ///
    /// Each flag corresponds to a bitmask defined by the Android/Java class
    /// file format.
    ///
    /// See: <https://source.android.com/docs/core/runtime/dex-format#access-flags>
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        /// `ACC_PUBLIC (0x0001)`: Visible everywhere.
        const PUBLIC = 0x0001;

        /// `ACC_PRIVATE (0x0002)`: Visible only to the defining class.
        const PRIVATE = 0x0002;

        /// `ACC_PROTECTED (0x0004)`: Visible to the package and subclasses.
        const PROTECTED = 0x0004;

        /// `ACC_STATIC (0x0008)`: Static modifier.
        const STATIC = 0x0008;

        /// `ACC_FINAL (0x0010)`: Not subclassable / overridable / mutable.
        const FINAL = 0x0010;

        /// `ACC_SYNCHRONIZED (0x0020)`: For methods only.
        const SYNCHRONIZED = 0x0020;

        /// `ACC_VOLATILE (0x0040)`: For fields only.
        const VOLATILE = 0x0040;

        /// `ACC_BRIDGE (0x0040)`: For methods only, compiler generated.
        const BRIDGE = 0x0040;

        /// `ACC_TRANSIENT (0x0080)`: For fields only.
        const TRANSIENT = 0x0080;

        /// `ACC_VARARGS (0x0080)`: For methods only.
        const VARARGS = 0x0080;

        /// `ACC_NATIVE (0x0100)`: For methods only.
        const NATIVE = 0x0100;

        /// `ACC_INTERFACE (0x0200)`: Class is an interface.
        const INTERFACE = 0x0200;

        /// `ACC_ABSTRACT (0x0400)`: Not instantiable / unimplemented.
        const ABSTRACT = 0x0400;

        /// `ACC_STRICT (0x0800)`: Strict floating-point rules.
        const STRICT = 0x0800;

        /// `ACC_SYNTHETIC (0x1000)`: Compiler generated.
        const SYNTHETIC = 0x1000;

        /// `ACC_ANNOTATION (0x2000)`: Declares an annotation class.
        const ANNOTATION = 0x2000;

        /// `ACC_ENUM (0x4000)`: Enum type or enum field.
        const ENUM = 0x4000;

        /// `ACC_CONSTRUCTOR (0x10000)`: Constructor or initializer method.
        const CONSTRUCTOR = 0x10000;

        /// `ACC_DECLARED_SYNCHRONIZED (0x20000)`: Declared synchronized.
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

impl AccessFlags {
    #[inline]
    pub fn is_public(self) -> bool {
        self.contains(Self::PUBLIC)
    }

    #[inline]
    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    #[inline]
    pub fn is_protected(self) -> bool {
        self.contains(Self::PROTECTED)
    }

    /// No visibility bit set: package-private access.
    #[inline]
    pub fn is_package_private(self) -> bool {
        !self.intersects(Self::PUBLIC | Self::PRIVATE | Self::PROTECTED)
    }

    #[inline]
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    #[inline]
    pub fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }

    #[inline]
    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }

    #[inline]
    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    #[inline]
    pub fn is_synthetic(self) -> bool {
        self.contains(Self::SYNTHETIC)
    }

    #[inline]
    pub fn is_annotation(self) -> bool {
        self.contains(Self::ANNOTATION)
    }

    #[inline]
    pub fn is_enum(self) -> bool {
        self.contains(Self::ENUM)
    }

    #[inline]
    pub fn is_native(self) -> bool {
        self.contains(Self::NATIVE)
    }

    #[inline]
    pub fn is_bridge(self) -> bool {
        self.contains(Self::BRIDGE)
    }

    #[inline]
    pub fn is_constructor(self) -> bool {
        self.contains(Self::CONSTRUCTOR)
    }

    /// A member that participates in virtual dispatch: instance, non-private,
    /// not a constructor.
    #[inline]
    pub fn is_virtual(self) -> bool {
        !self.intersects(Self::STATIC | Self::PRIVATE | Self::CONSTRUCTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_private_has_no_visibility_bits() {
        assert!(AccessFlags::empty().is_package_private());
        assert!(!AccessFlags::PUBLIC.is_package_private());
        assert!(!(AccessFlags::PRIVATE | AccessFlags::STATIC).is_package_private());
    }

    #[test]
    fn virtual_excludes_static_and_private() {
        assert!(AccessFlags::PUBLIC.is_virtual());
        assert!(!(AccessFlags::PUBLIC | AccessFlags::STATIC).is_virtual());
        assert!(!AccessFlags::PRIVATE.is_virtual());
        assert!(!(AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR).is_virtual());
    }
}
