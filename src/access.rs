//! Access flags as a set of named capabilities.
//!
//! The raw `u16` only leaves this type at the codec boundary, so every other
//! module asks questions like `is_bridge()` or `visibility()` instead of
//! masking bits.

use serde::Serialize;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_PRIVATE: u16 = 0x0002;
const ACC_PROTECTED: u16 = 0x0004;
const ACC_STATIC: u16 = 0x0008;
const ACC_FINAL: u16 = 0x0010;
const ACC_BRIDGE: u16 = 0x0040;
const ACC_INTERFACE: u16 = 0x0200;
const ACC_ABSTRACT: u16 = 0x0400;
const ACC_SYNTHETIC: u16 = 0x1000;

const VISIBILITY_MASK: u16 = ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Package,
    Protected,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessFlags(u16);

impl AccessFlags {
    pub const PUBLIC: AccessFlags = AccessFlags(ACC_PUBLIC);

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn visibility(self) -> Visibility {
        if self.0 & ACC_PUBLIC != 0 {
            Visibility::Public
        } else if self.0 & ACC_PROTECTED != 0 {
            Visibility::Protected
        } else if self.0 & ACC_PRIVATE != 0 {
            Visibility::Private
        } else {
            Visibility::Package
        }
    }

    pub fn with_visibility(self, visibility: Visibility) -> Self {
        let bit = match visibility {
            Visibility::Public => ACC_PUBLIC,
            Visibility::Protected => ACC_PROTECTED,
            Visibility::Private => ACC_PRIVATE,
            Visibility::Package => 0,
        };
        Self((self.0 & !VISIBILITY_MASK) | bit)
    }

    pub fn is_public(self) -> bool {
        self.visibility() == Visibility::Public
    }

    pub fn is_private(self) -> bool {
        self.visibility() == Visibility::Private
    }

    pub fn is_package_private(self) -> bool {
        self.visibility() == Visibility::Package
    }

    pub fn is_static(self) -> bool {
        self.0 & ACC_STATIC != 0
    }

    pub fn is_final(self) -> bool {
        self.0 & ACC_FINAL != 0
    }

    /// Only meaningful on methods; the same bit means `volatile` on fields.
    pub fn is_bridge(self) -> bool {
        self.0 & ACC_BRIDGE != 0
    }

    pub fn is_interface(self) -> bool {
        self.0 & ACC_INTERFACE != 0
    }

    pub fn is_abstract(self) -> bool {
        self.0 & ACC_ABSTRACT != 0
    }

    pub fn is_synthetic(self) -> bool {
        self.0 & ACC_SYNTHETIC != 0
    }
}
