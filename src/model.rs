//! In-memory class model.
//!
//! One `ClassNode` per distinct class name, built from a decoded class file,
//! or a placeholder when the real class is unavailable. Nodes refer to their
//! supertypes by name only; `hierarchy::ClassGraph` turns those names into
//! arena indices once building is over.

use serde::Serialize;

use crate::access::AccessFlags;
use crate::classfile::{ClassFile, ClassFormatError, Constant, RefKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassOrigin {
    /// Part of the set being rewritten.
    Input,
    /// Read-only context loaded from the classpath.
    Classpath,
    /// Referenced but never located.
    Unresolved,
    /// Stand-in for a missing class: public, no known members.
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeTarget {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method { bridge_target: Option<BridgeTarget> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberNode {
    pub name: String,
    pub desc: String,
    pub access: AccessFlags,
    pub signature: Option<String>,
    pub kind: MemberKind,
}

impl MemberNode {
    pub fn is_method(&self) -> bool {
        matches!(self.kind, MemberKind::Method { .. })
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }

    pub fn is_bridge(&self) -> bool {
        self.is_method() && self.access.is_bridge()
    }

    pub fn bridge_target(&self) -> Option<&BridgeTarget> {
        match &self.kind {
            MemberKind::Method { bridge_target } => bridge_target.as_ref(),
            MemberKind::Field => None,
        }
    }

    pub fn display(&self) -> String {
        if self.is_method() {
            format!("{}{}", self.name, self.desc)
        } else {
            format!("{}:{}", self.name, self.desc)
        }
    }
}

/// Something an input class's bytecode points at; used for access checks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reference {
    Class(String),
    Member {
        is_field: bool,
        owner: String,
        name: String,
        desc: String,
    },
}

#[derive(Debug, Clone)]
pub struct ClassNode {
    pub name: String,
    pub access: AccessFlags,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub members: Vec<MemberNode>,
    pub origin: ClassOrigin,
    pub references: Vec<Reference>,
}

impl ClassNode {
    pub fn from_class_file(
        class: &ClassFile,
        origin: ClassOrigin,
    ) -> Result<Self, ClassFormatError> {
        let pool = &class.constant_pool;
        let name = class.name()?.to_string();

        let mut members = Vec::with_capacity(class.fields.len() + class.methods.len());
        for field in &class.fields {
            members.push(MemberNode {
                name: field.name(pool)?.to_string(),
                desc: field.descriptor(pool)?.to_string(),
                access: field.access,
                signature: field.signature(pool)?.map(str::to_string),
                kind: MemberKind::Field,
            });
        }
        for method in &class.methods {
            let bridge_target = if method.access.is_bridge() {
                match method.code(pool)? {
                    Some(code) => code
                        .first_invocation()?
                        .map(|idx| pool.member_ref(idx))
                        .transpose()?
                        .filter(|target| target.kind != RefKind::Field)
                        .map(|target| BridgeTarget {
                            owner: target.owner.to_string(),
                            name: target.name.to_string(),
                            desc: target.desc.to_string(),
                        }),
                    None => None,
                }
            } else {
                None
            };
            members.push(MemberNode {
                name: method.name(pool)?.to_string(),
                desc: method.descriptor(pool)?.to_string(),
                access: method.access,
                signature: method.signature(pool)?.map(str::to_string),
                kind: MemberKind::Method { bridge_target },
            });
        }

        let references = if origin == ClassOrigin::Input {
            collect_references(class, &name)?
        } else {
            Vec::new()
        };

        Ok(Self {
            super_name: class.super_name()?.map(str::to_string),
            interfaces: class
                .interface_names()?
                .into_iter()
                .map(str::to_string)
                .collect(),
            access: class.access,
            name,
            members,
            origin,
            references,
        })
    }

    pub fn unresolved(name: &str) -> Self {
        Self::placeholder(name, ClassOrigin::Unresolved)
    }

    pub fn synthetic(name: &str) -> Self {
        Self::placeholder(name, ClassOrigin::Synthetic)
    }

    fn placeholder(name: &str, origin: ClassOrigin) -> Self {
        Self {
            name: name.to_string(),
            access: AccessFlags::PUBLIC,
            super_name: None,
            interfaces: Vec::new(),
            members: Vec::new(),
            origin,
            references: Vec::new(),
        }
    }

    pub fn is_input(&self) -> bool {
        self.origin == ClassOrigin::Input
    }

    pub fn is_resolved(&self) -> bool {
        self.origin != ClassOrigin::Unresolved
    }

    /// Superclass first, then interfaces in declaration order.
    pub fn supertypes(&self) -> impl Iterator<Item = &str> {
        self.super_name
            .as_deref()
            .into_iter()
            .chain(self.interfaces.iter().map(String::as_str))
    }

    pub fn find_member(&self, is_field: bool, name: &str, desc: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.is_method() != is_field && m.name == name && m.desc == desc)
    }
}

pub fn package_of(class_name: &str) -> &str {
    class_name.rsplit_once('/').map_or("", |(pkg, _)| pkg)
}

fn collect_references(class: &ClassFile, this: &str) -> Result<Vec<Reference>, ClassFormatError> {
    let pool = &class.constant_pool;
    let mut references = Vec::new();
    for (idx, constant) in pool.iter() {
        match constant {
            Constant::Class { .. } => {
                let name = pool.class_name(idx)?;
                if name != this && !name.starts_with('[') {
                    references.push(Reference::Class(name.to_string()));
                }
            }
            Constant::FieldRef { .. }
            | Constant::MethodRef { .. }
            | Constant::InterfaceMethodRef { .. } => {
                let member = pool.member_ref(idx)?;
                if member.owner.starts_with('[') {
                    continue;
                }
                references.push(Reference::Member {
                    is_field: member.kind == RefKind::Field,
                    owner: member.owner.to_string(),
                    name: member.name.to_string(),
                    desc: member.desc.to_string(),
                });
            }
            _ => {}
        }
    }
    references.sort();
    references.dedup();
    Ok(references)
}
